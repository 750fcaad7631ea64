use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default autosave period in seconds (30 minutes).
pub const DEFAULT_AUTOSAVE_PERIOD_SECS: u64 = 30 * 60;

/// Application configuration. Keeps the lifecycle knobs small and explicit;
/// everything here can also be changed through the facade setters before
/// launch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Period in seconds after which application state is saved
    /// automatically. Zero disables autosave.
    pub autosave_period_secs: u64,

    /// Request application exit on SIGTERM/SIGINT.
    pub handle_signals: bool,
}

impl AppConfig {
    /// Loads the configuration from a file (any format the `config` crate
    /// understands by extension).
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let cfg = config::Config::builder()
            .add_source(config::File::from(path))
            .build()
            .with_context(|| format!("failed to read config from {}", path.display()))?;

        cfg.try_deserialize()
            .with_context(|| format!("failed to deserialize config from {}", path.display()))
    }

    pub fn autosave_period(&self) -> Duration {
        Duration::from_secs(self.autosave_period_secs)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            autosave_period_secs: DEFAULT_AUTOSAVE_PERIOD_SECS,
            handle_signals: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.autosave_period(), Duration::from_secs(1800));
        assert!(cfg.handle_signals);
    }

    #[test]
    fn partial_config_files_fall_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.toml");
        std::fs::write(&path, "autosave_period_secs = 60\n").unwrap();

        let cfg = AppConfig::load(&path).unwrap();
        assert_eq!(cfg.autosave_period_secs, 60);
        assert!(cfg.handle_signals);
    }
}
