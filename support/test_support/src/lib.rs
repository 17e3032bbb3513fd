//! Fixture loading for the integration harness and the benches.
//!
//! A case is a directory under `tests/programs` holding `case.yaml`, the
//! serialized syntax tree `tree.yaml` and the expected files named by the case.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, ensure};
use serde::Deserialize;

const CASE_FILE: &str = "case.yaml";
const TREE_FILE: &str = "tree.yaml";

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CaseClass {
    /// Compiles cleanly; each supported backend prints `output_file`.
    RuntimeSuccess,
    /// Compiles, and the error log equals `errors_file`.
    TypeError,
    /// Rejected by a pass with an error containing `error_contains_file`.
    MalformedTree,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BenchConfig {
    pub enabled: bool,
    pub tags: Vec<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ExpectedOutcome {
    pub output_file: Option<String>,
    pub errors_file: Option<String>,
    pub error_contains_file: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CaseSpec {
    pub class: CaseClass,
    #[serde(default)]
    pub unsupported_backends: Vec<String>,
    pub bench: BenchConfig,
    #[serde(default)]
    pub expected: ExpectedOutcome,
}

#[derive(Debug, Clone)]
pub struct Case {
    pub name: String,
    pub dir: PathBuf,
    pub tree_path: PathBuf,
    pub spec: CaseSpec,
}

impl Case {
    /// Reads a case directory, or returns `None` if it has no `case.yaml`.
    pub fn load(dir: &Path) -> Result<Option<Self>> {
        let case_path = dir.join(CASE_FILE);
        if !case_path.exists() {
            return Ok(None);
        }
        let tree_path = dir.join(TREE_FILE);
        ensure!(
            tree_path.exists(),
            "Missing {TREE_FILE} for case {}",
            dir.display()
        );

        let name = dir
            .file_name()
            .and_then(|value| value.to_str())
            .map(str::to_string)
            .with_context(|| format!("Invalid case directory name {}", dir.display()))?;
        let raw = fs::read_to_string(&case_path)
            .with_context(|| format!("Reading {}", case_path.display()))?;
        let spec = serde_yaml::from_str(&raw)
            .with_context(|| format!("Parsing {}", case_path.display()))?;

        Ok(Some(Self {
            name,
            dir: dir.to_path_buf(),
            tree_path,
            spec,
        }))
    }

    pub fn read_text(&self, relative_path: &str) -> Result<String> {
        fs::read_to_string(self.dir.join(relative_path))
            .with_context(|| format!("Reading {} fixture file {}", self.name, relative_path))
    }

    pub fn read_tree(&self) -> Result<String> {
        fs::read_to_string(&self.tree_path)
            .with_context(|| format!("Reading {}", self.tree_path.display()))
    }

    /// Contents of the expected file named by `file`, which the case class
    /// requires under the key `field`.
    pub fn expected_text(&self, file: Option<&str>, field: &str) -> Result<String> {
        let file = file.with_context(|| format!("Missing {field} in {}", self.name))?;
        self.read_text(file)
    }

    pub fn supports(&self, backend_name: &str) -> bool {
        !self
            .spec
            .unsupported_backends
            .iter()
            .any(|name| name == backend_name)
    }
}

/// Every case under `programs_dir`, sorted by name.
pub fn load_cases(programs_dir: &Path) -> Result<Vec<Case>> {
    let mut cases = Vec::new();
    for entry in
        fs::read_dir(programs_dir).with_context(|| format!("Reading {}", programs_dir.display()))?
    {
        let path = entry?.path();
        if path.is_dir()
            && let Some(case) = Case::load(&path)?
        {
            cases.push(case);
        }
    }

    ensure!(
        !cases.is_empty(),
        "No test cases found in {}",
        programs_dir.display()
    );
    cases.sort_by(|left, right| left.name.cmp(&right.name));
    Ok(cases)
}

pub fn normalize_output(output: &str) -> String {
    output.replace("\r\n", "\n").trim_end().to_string()
}

pub fn validate_unsupported_backends(case: &Case, known_backends: &[&str]) -> Result<()> {
    for backend in &case.spec.unsupported_backends {
        ensure!(
            known_backends.contains(&backend.as_str()),
            "Case {} contains unknown unsupported backend '{}'",
            case.name,
            backend
        );
    }
    Ok(())
}
