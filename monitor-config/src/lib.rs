use config::{Config, Environment, File};
use monitor_core::{MonitorConfig, MonitorError, Result, MAX_COOLDOWN_MINUTES};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tracing::info;

const ENV_PREFIX: &str = "FUNDING_MONITOR";

pub struct ConfigManager {
    path: Option<PathBuf>,
    monitor_config: MonitorConfig,
}

impl ConfigManager {
    pub fn new() -> Result<Self> {
        Self::from_file("config.yaml")
    }

    /// Loads a YAML file, then lets `FUNDING_MONITOR_*` variables override it,
    /// e.g. `FUNDING_MONITOR_DETECTION__MIN_VOLUME=10000000`.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let monitor_config = Self::load(Some(&path))?;

        info!("Configuration loaded from {}", path.display());

        Ok(Self {
            path: Some(path),
            monitor_config,
        })
    }

    pub fn from_env() -> Result<Self> {
        let monitor_config = Self::load(None)?;

        info!("Configuration loaded from environment");

        Ok(Self {
            path: None,
            monitor_config,
        })
    }

    fn load(path: Option<&Path>) -> Result<MonitorConfig> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }

        builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|config| config.try_deserialize())
            .map_err(|e| MonitorError::Configuration(e.to_string()))
    }

    pub fn get_config(&self) -> &MonitorConfig {
        &self.monitor_config
    }

    pub fn get_config_mut(&mut self) -> &mut MonitorConfig {
        &mut self.monitor_config
    }

    /// Re-reads the same file and environment the manager was built from.
    pub fn reload(&mut self) -> Result<()> {
        self.monitor_config = Self::load(self.path.as_deref())?;

        info!("Configuration reloaded");
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        validate_config(&self.monitor_config)?;

        info!("Configuration validation passed");
        Ok(())
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml = serde_yaml::to_string(&self.monitor_config)
            .map_err(|e| MonitorError::Configuration(e.to_string()))?;

        std::fs::write(path.as_ref(), yaml)
            .map_err(|e| MonitorError::Configuration(e.to_string()))?;

        info!("Configuration saved to {}", path.as_ref().display());
        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> MonitorError {
    MonitorError::Configuration(message.into())
}

pub fn validate_config(config: &MonitorConfig) -> Result<()> {
    if !config.sources.iter().any(|s| s.enabled) {
        return Err(invalid("No enabled sources configured"));
    }

    let detection = &config.detection;
    if detection.history_capacity == 0 || detection.ledger_capacity == 0 {
        return Err(invalid("History and ledger capacities must be positive"));
    }
    if detection.min_history < 2 {
        return Err(invalid("min_history must be at least 2"));
    }
    if detection.min_history > detection.history_capacity {
        return Err(invalid(format!(
            "min_history {} exceeds history_capacity {}",
            detection.min_history, detection.history_capacity
        )));
    }
    // A run of n changes needs n + 1 entries.
    let longest_run = detection.min_funding_decreases.max(detection.min_oi_increases);
    if longest_run == 0 || longest_run >= detection.history_capacity {
        return Err(invalid(format!(
            "Run thresholds must be between 1 and {}",
            detection.history_capacity - 1
        )));
    }
    if detection.cooldown_minutes <= 0 || detection.cooldown_minutes > MAX_COOLDOWN_MINUTES {
        return Err(invalid(format!(
            "cooldown_minutes must be between 1 and {}",
            MAX_COOLDOWN_MINUTES
        )));
    }
    if !detection.min_volume.is_finite() || detection.min_volume < 0.0 {
        return Err(invalid("min_volume must be a non-negative number"));
    }

    if config.polling.interval_secs == 0 {
        return Err(invalid("Polling interval must be positive"));
    }

    if config.api.enabled && config.api.bind_address.parse::<SocketAddr>().is_err() {
        return Err(invalid(format!(
            "Invalid API bind address {}",
            config.api.bind_address
        )));
    }

    let telegram = &config.notification.telegram;
    if telegram.enabled && telegram.bot_token.is_empty() {
        return Err(invalid("Telegram enabled without a bot token"));
    }

    let email = &config.notification.email;
    if email.enabled && (email.smtp_host.is_empty() || email.from_address.is_empty()) {
        return Err(invalid("Email enabled without an SMTP host or sender"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use monitor_core::{SourceConfig, SourceKind};

    fn binance() -> SourceConfig {
        SourceConfig {
            kind: SourceKind::Binance,
            enabled: true,
            base_url: None,
            symbols: vec![],
            quote_suffix: "USDT".to_string(),
            request_timeout_secs: 10,
        }
    }

    fn valid_config() -> MonitorConfig {
        MonitorConfig {
            sources: vec![binance()],
            ..Default::default()
        }
    }

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("funding-monitor-{}-{}.yaml", name, std::process::id()))
    }

    #[test]
    fn test_defaults_validate() {
        assert!(validate_config(&valid_config()).is_ok());
    }

    #[test]
    fn test_rejects_missing_sources() {
        let mut config = valid_config();
        config.sources[0].enabled = false;
        assert!(validate_config(&config).is_err());

        config.sources.clear();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_rejects_bad_detection() {
        let mut config = valid_config();
        config.detection.min_history = 1;
        assert!(validate_config(&config).is_err());

        let mut config = valid_config();
        config.detection.min_funding_decreases = 10;
        assert!(validate_config(&config).is_err());

        let mut config = valid_config();
        config.detection.ledger_capacity = 0;
        assert!(validate_config(&config).is_err());

        let mut config = valid_config();
        config.detection.cooldown_minutes = 0;
        assert!(validate_config(&config).is_err());

        let mut config = valid_config();
        config.detection.cooldown_minutes = i64::MAX;
        assert!(validate_config(&config).is_err());

        let mut config = valid_config();
        config.detection.cooldown_minutes = MAX_COOLDOWN_MINUTES;
        assert!(validate_config(&config).is_ok());

        let mut config = valid_config();
        config.detection.min_volume = -1.0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_rejects_bad_api_and_polling() {
        let mut config = valid_config();
        config.polling.interval_secs = 0;
        assert!(validate_config(&config).is_err());

        let mut config = valid_config();
        config.api.bind_address = "not-an-address".to_string();
        assert!(validate_config(&config).is_err());

        config.api.enabled = false;
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_load_yaml_with_defaults() {
        let path = temp_path("load");
        std::fs::write(
            &path,
            r#"
sources:
  - kind: bybit
    symbols: ["BTCUSDT", "ETHUSDT"]
detection:
  cooldown_minutes: 15
polling:
  interval_secs: 60
"#,
        )
        .unwrap();

        let manager = ConfigManager::from_file(&path).unwrap();
        std::fs::remove_file(&path).ok();

        let config = manager.get_config();
        assert_eq!(config.sources.len(), 1);
        assert_eq!(config.sources[0].kind, SourceKind::Bybit);
        assert!(config.sources[0].enabled);
        assert_eq!(config.sources[0].quote_suffix, "USDT");
        assert_eq!(config.detection.cooldown_minutes, 15);
        assert_eq!(config.detection.history_capacity, 10);
        assert_eq!(config.detection.min_volume, 50_000_000.0);
        assert_eq!(config.polling.interval_secs, 60);
        assert!(manager.validate().is_ok());
    }

    #[test]
    fn test_save_and_reload() {
        let path = temp_path("save");
        let mut manager = ConfigManager {
            path: None,
            monitor_config: valid_config(),
        };
        manager.get_config_mut().detection.min_volume = 10_000_000.0;
        manager.save_to_file(&path).unwrap();

        let mut loaded = ConfigManager::from_file(&path).unwrap();
        assert_eq!(loaded.get_config().detection.min_volume, 10_000_000.0);

        std::fs::write(&path, "sources:\n  - kind: binance\npolling:\n  interval_secs: 30\n").unwrap();
        loaded.reload().unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(loaded.get_config().polling.interval_secs, 30);
        assert_eq!(loaded.get_config().detection.min_volume, 50_000_000.0);
    }

    #[test]
    fn test_missing_file_is_configuration_error() {
        let err = ConfigManager::from_file(temp_path("missing")).err().unwrap();
        assert!(matches!(err, MonitorError::Configuration(_)));
    }
}
