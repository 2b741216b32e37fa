//! Headless browser automation used by the playable and test-case stages.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::core::types::FileTree;
use crate::io::process::CheckedCommand;
use crate::workspace::sandbox::sync_to_dir;

/// What the browser observed after loading the page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capture {
    /// PNG bytes.
    pub screenshot: Vec<u8>,
    pub console_logs: Vec<String>,
    /// Page errors, including failures raised while loading a test case.
    pub errors: Vec<String>,
}

/// A browser session rendering a static site.
///
/// Each validation attempt calls [`Browser::reset`] then [`Browser::load`]
/// so no state leaks between attempts.
pub trait Browser {
    fn reset(&self) -> Result<()>;
    /// Stage the site files. `index.html` at the root is the entry point.
    fn load(&self, site: &FileTree) -> Result<()>;
    /// Open the page, optionally hand `test_case` to `window.loadTestCase`,
    /// and capture a screenshot with the console output.
    fn capture(&self, test_case: Option<&str>) -> Result<Capture>;
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CaptureReport {
    console_logs: Vec<String>,
    errors: Vec<String>,
}

/// Browser driven by an external automation script.
///
/// The script is invoked as `<command...> <site_dir> <screenshot_path> [<test_case_path>]`.
/// It must write a PNG to `screenshot_path` and may print
/// `{"console_logs": [...], "errors": [...]}` on stdout.
#[derive(Debug, Clone)]
pub struct ScriptBrowser {
    command: CheckedCommand,
    stage_dir: PathBuf,
}

impl ScriptBrowser {
    pub fn new(command: CheckedCommand, stage_dir: PathBuf) -> Self {
        Self { command, stage_dir }
    }

    fn site_dir(&self) -> PathBuf {
        self.stage_dir.join("site")
    }
}

impl Browser for ScriptBrowser {
    fn reset(&self) -> Result<()> {
        if self.stage_dir.exists() {
            fs::remove_dir_all(&self.stage_dir)
                .with_context(|| format!("remove {}", self.stage_dir.display()))?;
        }
        fs::create_dir_all(&self.stage_dir)
            .with_context(|| format!("create directory {}", self.stage_dir.display()))
    }

    fn load(&self, site: &FileTree) -> Result<()> {
        if site.is_empty() {
            return Err(anyhow!("nothing to load: build output is empty"));
        }
        sync_to_dir(site, &self.site_dir(), &[])
    }

    #[instrument(skip_all, fields(stage_dir = %self.stage_dir.display(), test_case = test_case.is_some()))]
    fn capture(&self, test_case: Option<&str>) -> Result<Capture> {
        let screenshot_path = self.stage_dir.join("screenshot.png");
        if screenshot_path.exists() {
            fs::remove_file(&screenshot_path)
                .with_context(|| format!("remove {}", screenshot_path.display()))?;
        }
        let mut args = vec![self.site_dir().into_os_string(), screenshot_path.clone().into_os_string()];
        if let Some(payload) = test_case {
            let case_path = self.stage_dir.join("test_case.json");
            fs::write(&case_path, payload)
                .with_context(|| format!("write {}", case_path.display()))?;
            args.push(case_path.into_os_string());
        }

        let output = self
            .command
            .run(&args, None, Some(&self.stage_dir))
            .context("invoke browser automation")?;
        let stdout = output.stdout_lossy();
        let report: CaptureReport = if stdout.trim().is_empty() {
            CaptureReport::default()
        } else {
            serde_json::from_str(stdout.trim()).context("parse browser report json")?
        };
        let screenshot = fs::read(&screenshot_path)
            .with_context(|| format!("read screenshot {}", screenshot_path.display()))?;
        debug!(
            console_logs = report.console_logs.len(),
            errors = report.errors.len(),
            "captured page"
        );
        Ok(Capture {
            screenshot,
            console_logs: report.console_logs,
            errors: report.errors,
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::test_support::tree;
    use std::time::Duration;

    fn browser(stage: PathBuf, script: &str) -> ScriptBrowser {
        ScriptBrowser::new(
            CheckedCommand::new(
                vec!["sh".to_string(), "-c".to_string(), script.to_string(), "browser".to_string()],
                Duration::from_secs(10),
                10_000,
            ),
            stage,
        )
    }

    #[test]
    fn capture_reads_screenshot_and_report() {
        let temp = tempfile::tempdir().expect("tempdir");
        let script = r#"cp "$1/index.html" "$2"; echo '{"console_logs":["[log] ready"]}'"#;
        let browser = browser(temp.path().join("stage"), script);
        browser.reset().expect("reset");
        browser.load(&tree(&[("index.html", "pixels")])).expect("load");
        let capture = browser.capture(None).expect("capture");
        assert_eq!(capture.screenshot, b"pixels");
        assert_eq!(capture.console_logs, vec!["[log] ready".to_string()]);
        assert!(capture.errors.is_empty());
    }

    #[test]
    fn capture_hands_test_case_path_to_script() {
        let temp = tempfile::tempdir().expect("tempdir");
        let script = r#"cp "$3" "$2""#;
        let browser = browser(temp.path().join("stage"), script);
        browser.reset().expect("reset");
        browser.load(&tree(&[("index.html", "")])).expect("load");
        let capture = browser.capture(Some(r#"{"expectedOutput":"x"}"#)).expect("capture");
        assert_eq!(capture.screenshot, br#"{"expectedOutput":"x"}"#);
    }

    #[test]
    fn missing_screenshot_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let browser = browser(temp.path().join("stage"), "true");
        browser.reset().expect("reset");
        browser.load(&tree(&[("index.html", "")])).expect("load");
        assert!(browser.capture(None).is_err());
    }
}
