//! Forge configuration loaded from `forge.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::paths::PathPolicy;
use crate::core::retry::RetryPolicy;

/// Forge configuration (TOML).
///
/// Every field has a default, so an absent file or a partial file is valid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ForgeConfig {
    /// Consecutive validation failures tolerated before the run stops.
    pub max_retries: u32,

    /// Hard ceiling on state transitions per run.
    pub max_transitions: u32,

    /// Route plain-text replies to a human on stdin instead of stopping.
    pub interactive: bool,

    /// Directory holding one subdirectory per session.
    pub games_dir: PathBuf,

    pub workspace: WorkspaceConfig,
    pub build: BuildConfig,
    pub test_cases: TestCaseConfig,
    pub oracles: OracleConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// Writable path prefixes. Empty means unrestricted.
    pub allowed: Vec<String>,
    /// Path prefixes the agent may never write or delete.
    pub protected: Vec<String>,
    pub exec_timeout_secs: u64,
    pub output_limit_bytes: usize,
    /// Prefixes kept out of the workspace tree when reading sandbox results.
    pub ignore: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BuildConfig {
    pub check_command: Vec<String>,
    pub build_command: Vec<String>,
    pub output_dir: String,
    /// Files copied from the workspace root into the output dir. All are required.
    pub metadata_files: Vec<String>,
    /// Extension of the single rendered entry point, without the dot.
    pub entry_extension: String,
    /// Canonical name the entry point is copied to.
    pub entry_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TestCaseConfig {
    pub max_cases: usize,
    /// Where passing test cases are moved after a successful run.
    pub debug_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OracleConfig {
    /// Reads an LLM request as JSON on stdin, prints a reply as JSON.
    pub llm_command: Vec<String>,
    /// Receives the screenshot path as its last argument and the prompt on stdin.
    pub vision_command: Vec<String>,
    /// Renders the staged game and writes `screenshot.png` into its working directory.
    pub browser_command: Vec<String>,
    pub timeout_secs: u64,
    pub output_limit_bytes: usize,
}

impl Default for ForgeConfig {
    fn default() -> Self {
        Self {
            max_retries: RetryPolicy::default().max_retries,
            max_transitions: 1000,
            interactive: true,
            games_dir: PathBuf::from("games"),
            workspace: WorkspaceConfig::default(),
            build: BuildConfig::default(),
            test_cases: TestCaseConfig::default(),
            oracles: OracleConfig::default(),
        }
    }
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            allowed: Vec::new(),
            protected: Vec::new(),
            exec_timeout_secs: 600,
            output_limit_bytes: 100_000,
            ignore: vec!["node_modules/".to_string(), ".git/".to_string()],
        }
    }
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            check_command: argv(&["npx", "tsc", "--noEmit"]),
            build_command: argv(&["npm", "run", "build"]),
            output_dir: "dist".to_string(),
            metadata_files: argv(&["config.json", "MANIFEST.json"]),
            entry_extension: "html".to_string(),
            entry_name: "index.html".to_string(),
        }
    }
}

impl Default for TestCaseConfig {
    fn default() -> Self {
        Self {
            max_cases: 5,
            debug_dir: "debug_tests".to_string(),
        }
    }
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            llm_command: argv(&["forge-llm"]),
            vision_command: argv(&["forge-vision"]),
            browser_command: argv(&["forge-browser"]),
            timeout_secs: 300,
            output_limit_bytes: 1_000_000,
        }
    }
}

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(ToString::to_string).collect()
}

fn non_empty_command(name: &str, command: &[String]) -> Result<()> {
    if command.first().is_none_or(|program| program.trim().is_empty()) {
        return Err(anyhow!("{name} must be a non-empty array"));
    }
    Ok(())
}

impl ForgeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_retries == 0 {
            return Err(anyhow!("max_retries must be > 0"));
        }
        if self.max_transitions == 0 {
            return Err(anyhow!("max_transitions must be > 0"));
        }
        if self.workspace.exec_timeout_secs == 0 {
            return Err(anyhow!("workspace.exec_timeout_secs must be > 0"));
        }
        if self.workspace.output_limit_bytes == 0 {
            return Err(anyhow!("workspace.output_limit_bytes must be > 0"));
        }
        non_empty_command("build.check_command", &self.build.check_command)?;
        non_empty_command("build.build_command", &self.build.build_command)?;
        if self.build.output_dir.trim().is_empty() {
            return Err(anyhow!("build.output_dir must not be empty"));
        }
        if self.build.entry_extension.trim().is_empty() || self.build.entry_name.trim().is_empty() {
            return Err(anyhow!("build.entry_extension and build.entry_name must not be empty"));
        }
        if self.test_cases.max_cases == 0 {
            return Err(anyhow!("test_cases.max_cases must be > 0"));
        }
        non_empty_command("oracles.llm_command", &self.oracles.llm_command)?;
        non_empty_command("oracles.vision_command", &self.oracles.vision_command)?;
        non_empty_command("oracles.browser_command", &self.oracles.browser_command)?;
        if self.oracles.timeout_secs == 0 {
            return Err(anyhow!("oracles.timeout_secs must be > 0"));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries)
    }

    pub fn oracle_timeout(&self) -> Duration {
        Duration::from_secs(self.oracles.timeout_secs)
    }
}

impl WorkspaceConfig {
    pub fn policy(&self) -> PathPolicy {
        PathPolicy::new(self.allowed.clone(), self.protected.clone())
    }

    pub fn exec_timeout(&self) -> Duration {
        Duration::from_secs(self.exec_timeout_secs)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `ForgeConfig::default()`.
pub fn load_config(path: &Path) -> Result<ForgeConfig> {
    if !path.exists() {
        let cfg = ForgeConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: ForgeConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &ForgeConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, buf).with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, ForgeConfig::default());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("nested/forge.toml");
        let mut cfg = ForgeConfig::default();
        cfg.workspace.allowed = vec!["src/".to_string()];
        write_config(&path, &cfg).expect("write");
        assert_eq!(load_config(&path).expect("load"), cfg);
    }

    #[test]
    fn partial_file_keeps_defaults_for_omitted_fields() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("forge.toml");
        fs::write(
            &path,
            "max_retries = 2\n[workspace]\nprotected = [\"assets/\"]\n[build]\noutput_dir = \"out\"\n",
        )
        .expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.max_retries, 2);
        assert_eq!(cfg.workspace.protected, vec!["assets/".to_string()]);
        assert_eq!(cfg.workspace.exec_timeout_secs, 600);
        assert_eq!(cfg.build.output_dir, "out");
        assert_eq!(cfg.build.entry_name, "index.html");
        assert_eq!(cfg.test_cases.max_cases, 5);
    }

    #[test]
    fn zero_retries_is_rejected() {
        let cfg = ForgeConfig {
            max_retries: 0,
            ..ForgeConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn empty_build_command_is_rejected() {
        let mut cfg = ForgeConfig::default();
        cfg.build.build_command = Vec::new();
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("build.build_command"));
    }
}
