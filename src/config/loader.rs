use anyhow::{anyhow, Result};
use config::{Config, Environment, File};
use std::path::Path;
use tracing::info;

use super::AppConfig;

pub const ENV_PREFIX: &str = "PREDICTOR";

/// Resolves the configuration: compiled defaults, then the optional TOML file,
/// then `PREDICTOR_<SECTION>__<KEY>` environment variables.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    let mut builder = Config::builder().add_source(Config::try_from(&AppConfig::default())?);

    if let Some(path) = path {
        builder = builder.add_source(File::from(path).required(false));
    }

    let settings = builder
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("stream.symbols"),
        )
        .build()?;

    let config: AppConfig = settings.try_deserialize()?;
    config
        .validate()
        .map_err(|errors| anyhow!("Invalid configuration:\n  - {}", errors.join("\n  - ")))?;

    Ok(config)
}

/// Writes the default configuration as TOML.
pub fn write_default_config(path: &Path) -> Result<()> {
    let body = toml::to_string_pretty(&AppConfig::default())?;
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, body)?;
    info!("Default configuration written to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{TimeFrame, TradingPair};

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(config.model.symbol, TradingPair::BTCUSDT);
        assert_eq!(config.model.bar_timeframe, TimeFrame::H1);
    }

    #[test]
    fn test_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("predictor.toml");
        std::fs::write(
            &path,
            r#"
[model]
symbol = "ETHUSDT"
lookback_hours = 72

[scheduler]
interval_secs = 300
"#,
        )
        .unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.model.symbol, TradingPair::ETHUSDT);
        assert_eq!(config.model.lookback_hours, 72);
        assert_eq!(config.scheduler.interval_secs, 300);
        // Untouched keys keep their defaults
        assert_eq!(config.model.max_records, 50_000);
        assert_eq!(config.model.gbt.max_depth, 8);
    }

    #[test]
    fn test_written_defaults_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        write_default_config(&path).unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.stream.symbols, AppConfig::default().stream.symbols);
        assert_eq!(config.scheduler.max_predictions, Some(10));
    }

    #[test]
    fn test_invalid_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[scheduler]\ninterval_secs = 0\n").unwrap();

        let err = load_config(Some(&path)).unwrap_err();
        assert!(err.to_string().contains("interval_secs"));
    }
}
