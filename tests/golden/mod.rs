//! Golden test harness for end-to-end ingestion cycles
//!
//! This harness:
//! 1. Loads a cycle fixture (station readings, forecast snapshot, clock)
//! 2. Serves it through scripted source clients
//! 3. Runs pipeline cycles against a fresh SQLite store
//! 4. Dumps the store and compares dumps between runs
//!
//! Usage:
//! - Place cycle fixtures in tests/golden/fixtures/
//! - Include this module from a crate's tests/ with `#[path]`

pub mod db_diff;
pub mod fixtures;

use anyhow::Result;
use std::path::PathBuf;

/// Golden test configuration
pub struct GoldenTestConfig {
    /// Path to fixture directory
    pub fixtures_dir: PathBuf,
}

impl Default for GoldenTestConfig {
    fn default() -> Self {
        Self {
            fixtures_dir: PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../tests/golden/fixtures"),
        }
    }
}

impl GoldenTestConfig {
    pub fn fixture_path(&self, name: &str) -> PathBuf {
        self.fixtures_dir.join(format!("{}.json", name))
    }

    pub fn load(&self, name: &str) -> Result<fixtures::CycleFixture> {
        fixtures::load_fixture(&self.fixture_path(name))
    }
}

/// Result of comparing two store dumps
#[derive(Debug)]
pub struct GoldenTestResult {
    pub test_name: String,
    pub passed: bool,
    pub differences: Vec<String>,
    pub actual_dump: String,
    pub expected_dump: String,
}

impl GoldenTestResult {
    pub fn compare(test_name: &str, actual: &db_diff::DbDump, expected: &db_diff::DbDump) -> Self {
        let differences = actual.diff(expected);
        Self {
            test_name: test_name.to_string(),
            passed: differences.is_empty(),
            differences,
            actual_dump: actual.to_text(),
            expected_dump: expected.to_text(),
        }
    }

    pub fn assert_passed(&self) {
        if !self.passed {
            panic!(
                "Golden test '{}' failed with {} differences:\n{}\n--- actual\n{}\n--- expected\n{}",
                self.test_name,
                self.differences.len(),
                self.differences.join("\n"),
                self.actual_dump,
                self.expected_dump
            );
        }
    }
}
