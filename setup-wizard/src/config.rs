// Wizard configuration
//
// Sources, later ones win:
// 1. embedded defaults
// 2. <config dir>/school-setup-wizard/config.toml (if present)
// 3. explicit --config file
// 4. SETUP_WIZARD__<SECTION>__<KEY> environment variables

use crate::api::installer::DEFAULT_PHASE_LABELS;
use crate::utils::path_resolver;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const APP_DIR_NAME: &str = "school-setup-wizard";
pub const ENV_PREFIX: &str = "SETUP_WIZARD";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Root folder for the file store. Empty = platform data dir.
    pub dir: String,
    pub namespace: String,
    pub key: String,
    /// Seal the saved form with AES-256-GCM.
    pub encrypt: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dir: String::new(),
            namespace: "school-setup".to_string(),
            key: "setup-wizard-form".to_string(),
            encrypt: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub save_debounce_ms: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            save_debounce_ms: 250,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallConfig {
    pub phases: Vec<String>,
    pub phase_delay_ms: u64,
    pub phase_timeout_secs: u64,
}

impl Default for InstallConfig {
    fn default() -> Self {
        Self {
            phases: DEFAULT_PHASE_LABELS.iter().map(|s| s.to_string()).collect(),
            phase_delay_ms: 1500,
            phase_timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Setup service base URL. Empty = dry-run backend.
    pub base_url: String,
    pub timeout_secs: u64,
    pub max_retries: usize,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            timeout_secs: 30,
            max_retries: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log folder. Empty = resolved next to the store.
    pub dir: String,
    /// "trace" | "debug" | "info" | "warn" | "error"
    pub level: String,
    /// Mirror log lines to stdout in the non-interactive modes.
    pub stdout: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: String::new(),
            level: "debug".to_string(),
            stdout: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WizardConfig {
    pub store: StoreConfig,
    pub persistence: PersistenceConfig,
    pub install: InstallConfig,
    pub backend: BackendConfig,
    pub logging: LoggingConfig,
}

impl WizardConfig {
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join(APP_DIR_NAME).join("config.toml"))
    }

    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        // Embedded defaults so the wizard runs without any config file
        let defaults_json = serde_json::to_string(&WizardConfig::default())
            .context("Failed to serialize default config")?;

        let mut builder = config::Config::builder().add_source(config::File::from_str(
            &defaults_json,
            config::FileFormat::Json,
        ));

        if let Some(user_config) = Self::user_config_path() {
            if user_config.exists() {
                builder = builder.add_source(config::File::from(user_config));
            }
        }

        if let Some(path) = config_path {
            builder = builder.add_source(config::File::from(path.to_path_buf()).required(true));
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("install.phases"),
        );

        let cfg = builder.build().context("Failed to load configuration")?;
        let parsed: WizardConfig = cfg
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        parsed.validate()?;
        Ok(parsed)
    }

    pub fn validate(&self) -> Result<()> {
        crate::utils::validation::validate_store_key(&self.store.namespace)
            .context("store.namespace")?;
        crate::utils::validation::validate_store_key(&self.store.key).context("store.key")?;
        if self.install.phase_timeout_secs == 0 {
            anyhow::bail!("install.phase_timeout_secs must be greater than zero");
        }
        if self.logging.level.trim().parse::<log::LevelFilter>().is_err() {
            anyhow::bail!("logging.level '{}' is not a log level", self.logging.level);
        }
        Ok(())
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize config to TOML")
    }

    pub fn store_root(&self) -> PathBuf {
        if self.store.dir.trim().is_empty() {
            path_resolver::resolve_data_folder()
        } else {
            PathBuf::from(self.store.dir.trim())
        }
    }

    pub fn log_dir(&self) -> PathBuf {
        if self.logging.dir.trim().is_empty() {
            path_resolver::resolve_log_folder(&self.store_root())
        } else {
            PathBuf::from(self.logging.dir.trim())
        }
    }

    /// The interactive wizard draws on stdout, so it never gets the stdout chain.
    pub fn log_to_stdout(&self, owns_terminal: bool) -> bool {
        self.logging.stdout && !owns_terminal
    }

    pub fn save_debounce(&self) -> Duration {
        Duration::from_millis(self.persistence.save_debounce_ms)
    }

    pub fn phase_delay(&self) -> Duration {
        Duration::from_millis(self.install.phase_delay_ms)
    }

    pub fn phase_timeout(&self) -> Duration {
        Duration::from_secs(self.install.phase_timeout_secs)
    }

    pub fn backend_timeout(&self) -> Duration {
        Duration::from_secs(self.backend.timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = WizardConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.install.phases.len(), 5);
        assert_eq!(cfg.store.key, "setup-wizard-form");
        assert!(cfg.store.encrypt);
    }

    #[test]
    fn explicit_file_overrides_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("wizard.toml");
        std::fs::write(
            &path,
            r#"
[store]
namespace = "district-42"

[install]
phases = ["Schema", "Modules"]
phase_delay_ms = 0

[backend]
base_url = "https://api.school.test"
"#,
        )
        .unwrap();

        let cfg = WizardConfig::load(Some(&path)).unwrap();
        assert_eq!(cfg.store.namespace, "district-42");
        assert_eq!(cfg.store.key, "setup-wizard-form");
        assert_eq!(cfg.install.phases, vec!["Schema", "Modules"]);
        assert_eq!(cfg.install.phase_timeout_secs, 120);
        assert_eq!(cfg.backend.base_url, "https://api.school.test");
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut cfg = WizardConfig::default();
        cfg.store.key = "../x".into();
        assert!(cfg.validate().is_err());

        let mut cfg = WizardConfig::default();
        cfg.logging.level = "loud".into();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn stdout_logging_is_opt_in_and_never_under_the_tui() {
        assert!(!WizardConfig::default().log_to_stdout(false));

        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("wizard.toml");
        std::fs::write(&path, "[logging]\nstdout = true\nlevel = \"info\"\n").unwrap();
        let cfg = WizardConfig::load(Some(&path)).unwrap();
        assert!(cfg.logging.stdout);
        assert!(cfg.log_to_stdout(false));
        assert!(!cfg.log_to_stdout(true));
    }

    #[test]
    fn toml_roundtrip() {
        let cfg = WizardConfig::default();
        let text = cfg.to_toml_string().unwrap();
        assert!(text.contains("[store]"));
        let back: WizardConfig = toml::from_str(&text).unwrap();
        assert_eq!(back, cfg);
    }
}
