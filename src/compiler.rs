//! Pass pipeline and artifact output.
//!
//! Passes run in a fixed order over one tree: type check, symbol table,
//! memory layout, then both code generators. Each pass writes its artifact as
//! soon as it completes. A fatal error stops the pipeline before the failing
//! pass writes anything; a failed write is recorded and the pipeline goes on.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::{debug, info, warn};
use thiserror::Error;

use crate::ast::Node;
use crate::backend::{Backend, StackBackend, TagBackend};
use crate::error::CompileResult;
use crate::semantic::symbol_table::SymbolTable;
use crate::semantic::type_check::{self, TypeDiagnostic};
use crate::semantic::{builder, layout};

/// Destinations for the artifacts; `None` means the artifact is not written.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub errors: Option<PathBuf>,
    pub symtab: Option<PathBuf>,
    pub memsize: Option<PathBuf>,
    pub tags: Option<PathBuf>,
    pub stack: Option<PathBuf>,
}

impl ArtifactPaths {
    /// Fills every unset destination with `<dir>/<stem>.<extension>`.
    pub fn with_defaults(self, dir: &Path, stem: &str) -> Self {
        let default = |path: Option<PathBuf>, extension: &str| {
            path.or_else(|| Some(dir.join(format!("{stem}.{extension}"))))
        };
        Self {
            errors: default(self.errors, "errors"),
            symtab: default(self.symtab, "symtab"),
            memsize: default(self.memsize, "memsize.symtab"),
            tags: default(self.tags, "tags.m"),
            stack: default(self.stack, "stack.m"),
        }
    }
}

#[derive(Debug, Error)]
#[error("Writing {}", .path.display())]
pub struct ArtifactError {
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}

/// Result of running every pass over one program.
#[derive(Debug)]
pub struct Compilation {
    /// The tree with all pass attributes filled in.
    pub program: Node,
    pub table: SymbolTable,
    pub diagnostics: Vec<TypeDiagnostic>,
    pub tags: String,
    pub stack: String,
    pub write_failures: Vec<ArtifactError>,
}

impl Compilation {
    /// Generated code for the backend named `name`.
    pub fn code(&self, name: &str) -> Option<&str> {
        match name {
            "tags" => Some(&self.tags),
            "stack" => Some(&self.stack),
            _ => None,
        }
    }
}

pub fn parse_tree(source: &str) -> Result<Node> {
    serde_yaml::from_str(source).context("Parsing syntax tree")
}

pub fn load_tree(path: &Path) -> Result<Node> {
    let source =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    parse_tree(&source).with_context(|| format!("Loading {}", path.display()))
}

pub fn compile(mut program: Node, paths: &ArtifactPaths) -> CompileResult<Compilation> {
    let mut failures = Vec::new();

    let diagnostics = type_check::check(&mut program)?;
    debug!("Type check found {} errors", diagnostics.len());
    emit(
        paths.errors.as_deref(),
        &type_check::render_diagnostics(&diagnostics),
        &mut failures,
    );

    let mut table = builder::build(&mut program)?;
    emit(paths.symtab.as_deref(), &table.render(), &mut failures);

    layout::compute_layout(&program, &mut table)?;
    emit(
        paths.memsize.as_deref(),
        &table.render_with_layout(),
        &mut failures,
    );

    let tags = TagBackend.generate(&program, &table)?;
    emit(paths.tags.as_deref(), &tags, &mut failures);

    let stack = StackBackend.generate(&program, &table)?;
    emit(paths.stack.as_deref(), &stack, &mut failures);

    Ok(Compilation {
        program,
        table,
        diagnostics,
        tags,
        stack,
        write_failures: failures,
    })
}

fn emit(path: Option<&Path>, contents: &str, failures: &mut Vec<ArtifactError>) {
    let Some(path) = path else {
        return;
    };
    match fs::write(path, contents) {
        Ok(()) => info!("Wrote {}", path.display()),
        Err(source) => {
            warn!("Could not write {}: {source}", path.display());
            failures.push(ArtifactError {
                path: path.to_path_buf(),
                source,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{self, Type};
    use crate::error::CompileError;
    use pretty_assertions::assert_eq;

    fn sample() -> Node {
        ast::program(
            vec![],
            vec![],
            vec![
                ast::var_decl("int", "a", &[]),
                ast::var_decl("float", "b", &[]),
                ast::assign(ast::id("a", Type::Int), ast::num("2", Type::Int)),
                ast::assign(
                    ast::id("b", Type::Float),
                    ast::add("+", ast::id("a", Type::Int), ast::id("b", Type::Float)),
                ),
                ast::put(ast::id("a", Type::Int)),
            ],
        )
    }

    #[test]
    fn writes_every_configured_artifact() {
        let dir = tempfile::tempdir().expect("temp dir");
        let paths = ArtifactPaths::default().with_defaults(dir.path(), "sample");

        let compilation = compile(sample(), &paths).expect("compilation should succeed");
        assert!(compilation.write_failures.is_empty());

        let errors = fs::read_to_string(dir.path().join("sample.errors")).expect("errors");
        assert_eq!(errors, "AddOp type error: a(int) and b(float)\n");
        let symtab = fs::read_to_string(dir.path().join("sample.symtab")).expect("symtab");
        assert!(!symtab.contains("offset"));
        let memsize =
            fs::read_to_string(dir.path().join("sample.memsize.symtab")).expect("memsize");
        assert!(memsize.contains("| offset: 4 | size: 8"));
        for name in ["sample.tags.m", "sample.stack.m"] {
            let code = fs::read_to_string(dir.path().join(name)).expect("code");
            assert!(code.starts_with("          entry\n"));
        }
    }

    #[test]
    fn unset_destinations_write_nothing() {
        let dir = tempfile::tempdir().expect("temp dir");
        let paths = ArtifactPaths {
            tags: Some(dir.path().join("only.m")),
            ..ArtifactPaths::default()
        };

        let compilation = compile(sample(), &paths).expect("compilation should succeed");
        assert_eq!(compilation.diagnostics.len(), 1);
        let written: Vec<_> = fs::read_dir(dir.path())
            .expect("read dir")
            .map(|entry| entry.expect("entry").file_name())
            .collect();
        assert_eq!(written, vec!["only.m"]);
    }

    #[test]
    fn write_failure_does_not_stop_later_passes() {
        let dir = tempfile::tempdir().expect("temp dir");
        let paths = ArtifactPaths {
            errors: Some(dir.path().join("missing").join("sample.errors")),
            stack: Some(dir.path().join("sample.stack.m")),
            ..ArtifactPaths::default()
        };

        let compilation = compile(sample(), &paths).expect("compilation should succeed");
        assert_eq!(compilation.write_failures.len(), 1);
        assert!(compilation.write_failures[0]
            .to_string()
            .ends_with("sample.errors"));
        assert!(dir.path().join("sample.stack.m").exists());
    }

    #[test]
    fn write_failure_report_includes_io_cause() {
        let dir = tempfile::tempdir().expect("temp dir");
        let paths = ArtifactPaths {
            tags: Some(dir.path().join("missing").join("sample.tags.m")),
            ..ArtifactPaths::default()
        };

        let compilation = compile(sample(), &paths).expect("compilation should succeed");
        let failure = compilation
            .write_failures
            .into_iter()
            .next()
            .expect("one failure");
        let cause = failure.source.to_string();
        let report = format!("{:#}", anyhow::Error::from(failure));
        assert!(report.starts_with("Writing "));
        assert!(report.ends_with(&format!("sample.tags.m: {cause}")));
    }

    #[test]
    fn fatal_error_skips_remaining_artifacts() {
        let dir = tempfile::tempdir().expect("temp dir");
        let paths = ArtifactPaths::default().with_defaults(dir.path(), "bad");
        let tree = ast::program(vec![], vec![], vec![ast::var_decl("int", "a", &["x"])]);

        let error = compile(tree, &paths).expect_err("dimension is not numeric");
        assert_eq!(
            error,
            CompileError::InvalidDimension {
                text: "x".to_string()
            }
        );
        assert!(dir.path().join("bad.errors").exists());
        assert!(!dir.path().join("bad.symtab").exists());
        assert!(!dir.path().join("bad.tags.m").exists());
    }

    #[test]
    fn parses_yaml_tree() {
        let tree = parse_tree(
            "kind: Program\nchildren:\n  - { kind: ClassList }\n  - { kind: FuncDefList }\n  - { kind: ProgramBlock }\n",
        )
        .expect("tree should parse");
        let compilation =
            compile(tree, &ArtifactPaths::default()).expect("empty program should compile");
        assert_eq!(compilation.code("stack").map(str::lines).map(Iterator::count), Some(5));
    }
}
