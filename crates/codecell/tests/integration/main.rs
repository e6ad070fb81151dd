//! Integration tests for codecell
//!
//! These tests drive the real toolchains: python3, javac/java, gcc and g++
//! must be on PATH.
//! Run with: cargo test -p codecell --features integration-tests

#![cfg(feature = "integration-tests")]

use std::fs;
use std::path::{Path, PathBuf};

use codecell::config::Config;
use codecell::runner::Runner;

mod compilation;
mod config_loading;
mod execution;
mod resource_limits;
mod workspace_lifecycle;

const FIXTURES_PATH: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures");

/// Helper to get fixture file content
pub(crate) fn fixture_source(name: &str) -> String {
    let path = format!("{FIXTURES_PATH}/sources/{name}");
    fs::read_to_string(&path).unwrap_or_else(|e| panic!("Failed to read fixture {path}: {e}"))
}

/// A workspace root private to one test
pub(crate) fn test_root(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("codecell-it-{name}-{}", std::process::id()))
}

/// Default languages with workspaces under a private root and a short
/// wall clock limit
pub(crate) fn test_config(name: &str) -> Config {
    let mut config = Config::default();
    config.workspace_root = Some(test_root(name));
    config.default_limits.wall_time_limit = Some(2.0);
    config
}

pub(crate) fn test_runner(name: &str) -> Runner {
    Runner::new(test_config(name))
}

/// Assert no workspace survived under `root`, then remove the root
pub(crate) fn assert_clean(root: &Path) {
    let leftovers: Vec<_> = match fs::read_dir(root) {
        Ok(entries) => entries.map(|entry| entry.unwrap().path()).collect(),
        Err(_) => Vec::new(),
    };
    assert!(leftovers.is_empty(), "workspaces left behind: {leftovers:?}");
    let _ = fs::remove_dir_all(root);
}
