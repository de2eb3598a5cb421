use crate::{env_or_default, ConfigError, FromEnv};

/// NATS connection configuration
#[derive(Clone, Debug)]
pub struct NatsConfig {
    pub url: String,
}

impl NatsConfig {
    pub fn new(url: String) -> Self {
        Self { url }
    }
}

impl FromEnv for NatsConfig {
    /// NATS_URL defaults to the local development broker
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            url: env_or_default("NATS_URL", "nats://localhost:4222"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nats_config_from_env_default() {
        temp_env::with_var_unset("NATS_URL", || {
            let config = NatsConfig::from_env().unwrap();
            assert_eq!(config.url, "nats://localhost:4222");
        });
    }

    #[test]
    fn test_nats_config_from_env_override() {
        temp_env::with_var("NATS_URL", Some("nats://broker:4222"), || {
            let config = NatsConfig::from_env().unwrap();
            assert_eq!(config.url, "nats://broker:4222");
        });
    }
}
