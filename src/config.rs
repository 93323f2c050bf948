//! Process-wide expiration settings.
//!
//! Settings are fixed when the engine is built. They can be assembled with
//! the builder methods or parsed from `name value` argument pairs, the form a
//! host passes when it loads the data type.

use crate::error::ConfigError;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// Default number of databases in the key space.
pub const DEFAULT_DATABASES: usize = 16;

/// Which expire index layout every database uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExpireStrategy {
    /// One index entry per container, keyed by its earliest field expiry.
    #[default]
    Coarse,
    /// One index entry per expiring field.
    Fine,
}

impl fmt::Display for ExpireStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpireStrategy::Coarse => write!(f, "coarse"),
            ExpireStrategy::Fine => write!(f, "fine"),
        }
    }
}

impl FromStr for ExpireStrategy {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("coarse") {
            Ok(ExpireStrategy::Coarse)
        } else if s.eq_ignore_ascii_case("fine") {
            Ok(ExpireStrategy::Fine)
        } else {
            Err(())
        }
    }
}

/// Configuration for field expiration.
#[derive(Debug, Clone)]
pub struct ExpireConfig {
    /// Run the timer-driven sweep (default: true)
    pub enable_active_expire: bool,

    /// Interval between sweeps (default: 1s)
    pub active_expire_period: Duration,

    /// Maximum fields deleted per database per sweep (default: 1000)
    pub keys_per_active_loop: usize,

    /// Maximum databases visited per sweep (default: 16)
    pub dbs_per_active_loop: usize,

    /// Maximum already-expired fields cleared from a container before a write (default: 10)
    pub keys_per_passive_loop: usize,

    /// Expire index layout (default: coarse)
    pub strategy: ExpireStrategy,

    /// Number of databases in the key space (default: 16)
    pub databases: usize,
}

impl Default for ExpireConfig {
    fn default() -> Self {
        Self {
            enable_active_expire: true,
            active_expire_period: Duration::from_millis(1000),
            keys_per_active_loop: 1000,
            dbs_per_active_loop: 16,
            keys_per_passive_loop: 10,
            strategy: ExpireStrategy::Coarse,
            databases: DEFAULT_DATABASES,
        }
    }
}

impl ExpireConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_active_expire(mut self, enabled: bool) -> Self {
        self.enable_active_expire = enabled;
        self
    }

    pub fn with_active_expire_period(mut self, period: Duration) -> Self {
        self.active_expire_period = period;
        self
    }

    pub fn with_keys_per_active_loop(mut self, keys: usize) -> Self {
        self.keys_per_active_loop = keys;
        self
    }

    pub fn with_dbs_per_active_loop(mut self, dbs: usize) -> Self {
        self.dbs_per_active_loop = dbs;
        self
    }

    pub fn with_keys_per_passive_loop(mut self, keys: usize) -> Self {
        self.keys_per_passive_loop = keys;
        self
    }

    pub fn with_strategy(mut self, strategy: ExpireStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Sets the number of databases. At least one database always exists.
    pub fn with_databases(mut self, databases: usize) -> Self {
        self.databases = databases.max(1);
        self
    }

    /// Parses `name value` pairs on top of the defaults.
    ///
    /// Recognized names: `enable_active_expire`, `active_expire_period`
    /// (milliseconds), `active_expire_keys_per_loop`,
    /// `active_expire_dbs_per_loop`, `passive_expire_keys_per_loop`,
    /// `expire_strategy` (`coarse` or `fine`) and `databases`. Names are
    /// case-insensitive.
    ///
    /// # Example
    ///
    /// ```
    /// use ttlhash::config::{ExpireConfig, ExpireStrategy};
    ///
    /// let config = ExpireConfig::from_args(&["active_expire_period", "100", "expire_strategy", "fine"]).unwrap();
    /// assert_eq!(config.active_expire_period.as_millis(), 100);
    /// assert_eq!(config.strategy, ExpireStrategy::Fine);
    /// ```
    pub fn from_args<S: AsRef<str>>(args: &[S]) -> Result<Self, ConfigError> {
        if args.len() % 2 != 0 {
            return Err(ConfigError::OddArguments(args.len()));
        }

        let mut config = Self::default();
        for pair in args.chunks(2) {
            let name = pair[0].as_ref();
            let value = pair[1].as_ref();
            match name.to_ascii_lowercase().as_str() {
                "enable_active_expire" => {
                    config.enable_active_expire = parse_number::<u64>(name, value)? != 0;
                }
                "active_expire_period" => {
                    config.active_expire_period =
                        Duration::from_millis(parse_number(name, value)?);
                }
                "active_expire_keys_per_loop" => {
                    config.keys_per_active_loop = parse_number(name, value)?;
                }
                "active_expire_dbs_per_loop" => {
                    config.dbs_per_active_loop = parse_number(name, value)?;
                }
                "passive_expire_keys_per_loop" => {
                    config.keys_per_passive_loop = parse_number(name, value)?;
                }
                "expire_strategy" => {
                    config.strategy = value.parse().map_err(|_| invalid(name, value))?;
                }
                "databases" => {
                    config = config.with_databases(parse_number(name, value)?);
                }
                _ => return Err(ConfigError::UnknownOption(name.to_string())),
            }
            info!(option = name, value = value, "Expire option set");
        }

        Ok(config)
    }
}

fn parse_number<T: FromStr>(option: &str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| invalid(option, value))
}

fn invalid(option: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        option: option.to_string(),
        value: value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ExpireConfig::default();
        assert!(config.enable_active_expire);
        assert_eq!(config.active_expire_period, Duration::from_millis(1000));
        assert_eq!(config.keys_per_active_loop, 1000);
        assert_eq!(config.dbs_per_active_loop, 16);
        assert_eq!(config.keys_per_passive_loop, 10);
        assert_eq!(config.strategy, ExpireStrategy::Coarse);
        assert_eq!(config.databases, DEFAULT_DATABASES);
    }

    #[test]
    fn test_builder_pattern_chaining() {
        let config = ExpireConfig::new()
            .with_active_expire(false)
            .with_keys_per_active_loop(5)
            .with_dbs_per_active_loop(2)
            .with_strategy(ExpireStrategy::Fine)
            .with_databases(0);
        assert!(!config.enable_active_expire);
        assert_eq!(config.keys_per_active_loop, 5);
        assert_eq!(config.dbs_per_active_loop, 2);
        assert_eq!(config.strategy, ExpireStrategy::Fine);
        assert_eq!(config.databases, 1);
    }

    #[test]
    fn test_from_args() {
        let config = ExpireConfig::from_args(&[
            "enable_active_expire",
            "0",
            "ACTIVE_EXPIRE_PERIOD",
            "250",
            "active_expire_keys_per_loop",
            "64",
            "active_expire_dbs_per_loop",
            "4",
            "passive_expire_keys_per_loop",
            "3",
            "databases",
            "8",
        ])
        .unwrap();

        assert!(!config.enable_active_expire);
        assert_eq!(config.active_expire_period, Duration::from_millis(250));
        assert_eq!(config.keys_per_active_loop, 64);
        assert_eq!(config.dbs_per_active_loop, 4);
        assert_eq!(config.keys_per_passive_loop, 3);
        assert_eq!(config.databases, 8);
    }

    #[test]
    fn test_from_args_rejects_bad_input() {
        assert_eq!(
            ExpireConfig::from_args(&["databases"]).unwrap_err(),
            ConfigError::OddArguments(1)
        );
        assert_eq!(
            ExpireConfig::from_args(&["verbose", "1"]).unwrap_err(),
            ConfigError::UnknownOption("verbose".to_string())
        );
        assert!(matches!(
            ExpireConfig::from_args(&["active_expire_period", "soon"]),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            ExpireConfig::from_args(&["expire_strategy", "wheel"]),
            Err(ConfigError::InvalidValue { .. })
        ));
    }
}
