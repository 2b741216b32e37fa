//! Debug artifacts written during validation.
//!
//! Artifacts go to `<session>/debug/<test_run_id>/`. Writing them is best
//! effort: a failure is logged and never affects the validation outcome.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::io::session::timestamp;

/// Artifact directory for one validation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugRun {
    dir: PathBuf,
}

impl DebugRun {
    /// Start a pass identified by `YYYYMMDD_HHMMSS` under `debug_root`.
    pub fn start(debug_root: &Path, now: DateTime<Utc>) -> Self {
        Self {
            dir: debug_root.join(now.format("%Y%m%d_%H%M%S").to_string()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Screenshot of the playable check.
    pub fn save_page_screenshot(&self, png: &[u8]) {
        self.write("debug_image.png", png);
    }

    pub fn save_case_screenshot(&self, case_name: &str, png: &[u8]) {
        self.write(&format!("{case_name}_screenshot.png"), png);
    }

    pub fn save_case_payload(&self, case_name: &str, payload: &str) {
        self.write(&format!("{case_name}.json"), payload.as_bytes());
    }

    pub fn save_case_error(&self, case_name: &str, message: &str) {
        let report = format!(
            "Test case: {case_name}\nTimestamp: {}\n\nError:\n{message}\n",
            timestamp(Utc::now())
        );
        self.write(&format!("{case_name}_error.txt"), report.as_bytes());
    }

    fn write(&self, file_name: &str, contents: &[u8]) {
        if let Err(err) = self.try_write(file_name, contents) {
            warn!(file = file_name, err = %format!("{err:#}"), "failed to save debug artifact");
        }
    }

    fn try_write(&self, file_name: &str, contents: &[u8]) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("create directory {}", self.dir.display()))?;
        let path = self.dir.join(file_name);
        fs::write(&path, contents).with_context(|| format!("write {}", path.display()))?;
        debug!(path = %path.display(), "saved debug artifact");
        Ok(())
    }
}
