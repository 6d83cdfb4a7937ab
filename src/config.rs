//! Configuration accepted by the Sampler Supervisor (§6 "Configuration
//! options"). Any option beyond these three is rejected rather than
//! silently ignored.

#[derive(Debug, Clone, PartialEq)]
pub struct SupervisorConfig {
    pub interval: f64,
    pub artifact_name: String,
    pub create_card: bool,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        SupervisorConfig {
            interval: 1.0,
            artifact_name: "resource_tracker_data".to_string(),
            create_card: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    UnknownOption(String),
    InvalidValue { option: String, reason: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::UnknownOption(name) => write!(f, "unknown configuration option: {name}"),
            ConfigError::InvalidValue { option, reason } => {
                write!(f, "invalid value for {option}: {reason}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl SupervisorConfig {
    /// Build from `(key, value)` pairs, e.g. parsed `key=value` CLI
    /// arguments. Rejects anything outside the three documented options.
    pub fn from_options(options: &[(&str, &str)]) -> Result<SupervisorConfig, ConfigError> {
        let mut config = SupervisorConfig::default();
        for (key, value) in options {
            match *key {
                "interval" => {
                    let interval: f64 = value
                        .parse()
                        .map_err(|_| ConfigError::InvalidValue {
                            option: "interval".to_string(),
                            reason: format!("not a number: {value}"),
                        })?;
                    if interval <= 0.0 {
                        return Err(ConfigError::InvalidValue {
                            option: "interval".to_string(),
                            reason: "must be positive".to_string(),
                        });
                    }
                    config.interval = interval;
                }
                "artifact_name" => config.artifact_name = value.to_string(),
                "create_card" => {
                    config.create_card = value
                        .parse()
                        .map_err(|_| ConfigError::InvalidValue {
                            option: "create_card".to_string(),
                            reason: format!("not a bool: {value}"),
                        })?;
                }
                other => return Err(ConfigError::UnknownOption(other.to_string())),
            }
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = SupervisorConfig::default();
        assert_eq!(config.interval, 1.0);
        assert_eq!(config.artifact_name, "resource_tracker_data");
        assert!(config.create_card);
    }

    #[test]
    fn rejects_unknown_option() {
        let err = SupervisorConfig::from_options(&[("bogus", "1")]).unwrap_err();
        assert_eq!(err, ConfigError::UnknownOption("bogus".to_string()));
    }

    #[test]
    fn rejects_non_positive_interval() {
        let err = SupervisorConfig::from_options(&[("interval", "0")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn accepts_overrides() {
        let config = SupervisorConfig::from_options(&[("interval", "2.5"), ("create_card", "false")]).unwrap();
        assert_eq!(config.interval, 2.5);
        assert!(!config.create_card);
    }
}
