use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Parser;

use moonc::compiler::{self, ArtifactPaths};
use moonc::vm;

/// Compile a serialized syntax tree to Moon assembly.
#[derive(Parser, Debug)]
#[clap(name = "moonc", version)]
struct Opt {
    /// YAML syntax tree produced by the parser
    tree: PathBuf,

    /// Where to write the type error log
    #[clap(long)]
    errors: Option<PathBuf>,

    /// Where to write the symbol table dump
    #[clap(long)]
    symtab: Option<PathBuf>,

    /// Where to write the symbol table dump with offsets and frame sizes
    #[clap(long)]
    memsize: Option<PathBuf>,

    /// Where to write the tag-addressed assembly
    #[clap(long)]
    tags: Option<PathBuf>,

    /// Where to write the stack-frame assembly
    #[clap(long)]
    stack: Option<PathBuf>,

    /// Write every artifact not given explicitly into this directory,
    /// named after the tree file
    #[clap(long = "out-dir")]
    out_dir: Option<PathBuf>,

    /// Run the code of one backend on the simulator and print its output
    #[clap(long, value_parser = ["tags", "stack"])]
    run: Option<String>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_default_env().init();
    let opt = Opt::parse();

    let mut paths = ArtifactPaths {
        errors: opt.errors,
        symtab: opt.symtab,
        memsize: opt.memsize,
        tags: opt.tags,
        stack: opt.stack,
    };
    if let Some(dir) = &opt.out_dir {
        let stem = opt
            .tree
            .file_stem()
            .and_then(|stem| stem.to_str())
            .with_context(|| format!("Invalid tree file name {}", opt.tree.display()))?;
        paths = paths.with_defaults(dir, stem);
    }

    let tree = compiler::load_tree(&opt.tree)?;
    let compilation = compiler::compile(tree, &paths)
        .with_context(|| format!("Compiling {}", opt.tree.display()))?;

    for diagnostic in &compilation.diagnostics {
        eprintln!("{diagnostic}");
    }

    if let Some(backend) = &opt.run {
        let code = compilation
            .code(backend)
            .with_context(|| format!("Unknown backend '{backend}'"))?;
        let output = vm::run(code).with_context(|| format!("Running {backend} code"))?;
        if !output.is_empty() {
            println!("{output}");
        }
    }

    let failed = compilation.write_failures.len();
    if failed > 0 {
        for failure in compilation.write_failures {
            eprintln!("{:#}", anyhow::Error::from(failure));
        }
        bail!("{failed} artifact(s) could not be written");
    }
    Ok(())
}
