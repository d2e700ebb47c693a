//! Named test cases stored as JSON on disk.
//!
//! A case lives at `<root>/<suite>/<case>/` and holds an `input.json` with
//! the records to publish and an `expected.json` with the state the system
//! under test should converge to.

use serde::de::DeserializeOwned;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const INPUT_FILE: &str = "input.json";
pub const EXPECTED_FILE: &str = "expected.json";

#[derive(Debug, Error)]
pub enum FixtureError {
    #[error("Failed to read fixture {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse fixture {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Input and expected payloads of one case.
#[derive(Debug, Clone, PartialEq)]
pub struct Case<I, E> {
    pub name: String,
    pub input: I,
    pub expected: E,
}

/// Directory holding a case's files.
pub fn case_dir(root: &Path, suite: &str, case: &str) -> PathBuf {
    root.join(suite).join(case)
}

/// Read and deserialize one JSON file.
pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T, FixtureError> {
    let raw = fs::read_to_string(path).map_err(|source| FixtureError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    serde_json::from_str(&raw).map_err(|source| FixtureError::Json {
        path: path.to_path_buf(),
        source,
    })
}

/// Load `<root>/<suite>/<case>/{input,expected}.json`.
pub fn load_case<I, E>(root: &Path, suite: &str, case: &str) -> Result<Case<I, E>, FixtureError>
where
    I: DeserializeOwned,
    E: DeserializeOwned,
{
    let dir = case_dir(root, suite, case);

    Ok(Case {
        name: format!("{suite}/{case}"),
        input: load_json(&dir.join(INPUT_FILE))?,
        expected: load_json(&dir.join(EXPECTED_FILE))?,
    })
}
