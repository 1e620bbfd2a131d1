//--------------------------------------------------------------------------------------------------
// MODULE OVERVIEW
//--------------------------------------------------------------------------------------------------
// Runtime configuration loaded from the environment (and `.env` through dotenv).
//
// | Variable               | Default | Field                  |
// |------------------------|---------|------------------------|
// | STANDARD_PAYOUT        | 100     | standard_payout        |
// | MAX_CONTRACTS_PER_PROP | 10      | max_contracts_per_prop |
// | INITIAL_BALANCE        | 10000   | initial_balance        |
// | PROBABILITY_FLOOR      | 0.01    | probability_floor      |
// | PROBABILITY_CEILING    | 0.99    | probability_ceiling    |
// | DEFAULT_BOOK_DEPTH     | 10      | default_book_depth     |
// | TRADE_STATS_WINDOW     | 10      | trade_stats_window     |
// | EVENT_BUS_CAPACITY     | 1024    | event_bus_capacity     |
// | LOG_LEVEL              | info    | log_level              |
// | LOG_FORMAT             | pretty  | log_format             |
//--------------------------------------------------------------------------------------------------

use std::env;
use std::str::FromStr;

use dotenv::dotenv;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use thiserror::Error;
use tracing_subscriber::{fmt, EnvFilter};

use crate::domain::services::pricing::PricingModel;

const STANDARD_PAYOUT: &str = "STANDARD_PAYOUT";
const MAX_CONTRACTS_PER_PROP: &str = "MAX_CONTRACTS_PER_PROP";
const INITIAL_BALANCE: &str = "INITIAL_BALANCE";
const PROBABILITY_FLOOR: &str = "PROBABILITY_FLOOR";
const PROBABILITY_CEILING: &str = "PROBABILITY_CEILING";
const DEFAULT_BOOK_DEPTH: &str = "DEFAULT_BOOK_DEPTH";
const TRADE_STATS_WINDOW: &str = "TRADE_STATS_WINDOW";
const EVENT_BUS_CAPACITY: &str = "EVENT_BUS_CAPACITY";
const LOG_LEVEL: &str = "LOG_LEVEL";
const LOG_FORMAT: &str = "LOG_FORMAT";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value {value:?} for environment variable {key}")]
    Invalid { key: &'static str, value: String },

    #[error("Inconsistent configuration: {0}")]
    Inconsistent(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub standard_payout: Decimal,
    pub max_contracts_per_prop: u32,
    pub initial_balance: Decimal,
    pub probability_floor: Decimal,
    pub probability_ceiling: Decimal,
    pub default_book_depth: usize,
    pub trade_stats_window: usize,
    pub event_bus_capacity: usize,
    pub log_level: String,
    pub log_format: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            standard_payout: dec!(100),
            max_contracts_per_prop: 10,
            initial_balance: dec!(10000),
            probability_floor: dec!(0.01),
            probability_ceiling: dec!(0.99),
            default_book_depth: 10,
            trade_stats_window: 10,
            event_bus_capacity: 1024,
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
        }
    }
}

impl Config {
    pub fn try_from_env() -> Result<Config, ConfigError> {
        // Load .env file
        dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds a config from an arbitrary key lookup; unset keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Config, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();

        let config = Config {
            standard_payout: parse_or(&lookup, STANDARD_PAYOUT, defaults.standard_payout)?,
            max_contracts_per_prop: parse_or(
                &lookup,
                MAX_CONTRACTS_PER_PROP,
                defaults.max_contracts_per_prop,
            )?,
            initial_balance: parse_or(&lookup, INITIAL_BALANCE, defaults.initial_balance)?,
            probability_floor: parse_or(&lookup, PROBABILITY_FLOOR, defaults.probability_floor)?,
            probability_ceiling: parse_or(
                &lookup,
                PROBABILITY_CEILING,
                defaults.probability_ceiling,
            )?,
            default_book_depth: parse_or(&lookup, DEFAULT_BOOK_DEPTH, defaults.default_book_depth)?,
            trade_stats_window: parse_or(&lookup, TRADE_STATS_WINDOW, defaults.trade_stats_window)?,
            event_bus_capacity: parse_or(&lookup, EVENT_BUS_CAPACITY, defaults.event_bus_capacity)?,
            log_level: lookup(LOG_LEVEL).unwrap_or(defaults.log_level),
            log_format: lookup(LOG_FORMAT).unwrap_or(defaults.log_format),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.standard_payout <= Decimal::ZERO {
            return Err(ConfigError::Invalid {
                key: STANDARD_PAYOUT,
                value: self.standard_payout.to_string(),
            });
        }
        if self.initial_balance.is_sign_negative() {
            return Err(ConfigError::Invalid {
                key: INITIAL_BALANCE,
                value: self.initial_balance.to_string(),
            });
        }
        let unit = Decimal::ZERO..=Decimal::ONE;
        if !unit.contains(&self.probability_floor)
            || !unit.contains(&self.probability_ceiling)
            || self.probability_floor > self.probability_ceiling
        {
            return Err(ConfigError::Inconsistent(format!(
                "probability clamp [{}, {}] must be an ordered range within [0, 1]",
                self.probability_floor, self.probability_ceiling
            )));
        }
        Ok(())
    }

    pub fn pricing_model(&self) -> PricingModel {
        PricingModel::new(self.probability_floor, self.probability_ceiling)
    }

    /// Installs the global tracing subscriber. `RUST_LOG` overrides `log_level`.
    ///
    /// Does nothing if a subscriber is already installed.
    pub fn init_tracing(&self) {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.log_level));

        let _ = match self.log_format.as_str() {
            "json" => fmt().json().with_env_filter(filter).try_init(),
            _ => fmt().with_env_filter(filter).try_init(),
        };
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
            key,
            value: raw,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = Config::from_lookup(|_| None).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.standard_payout, dec!(100));
        assert_eq!(config.max_contracts_per_prop, 10);
    }

    #[test]
    fn test_overrides_are_parsed() {
        let config = Config::from_lookup(lookup_from(&[
            ("STANDARD_PAYOUT", "50"),
            ("INITIAL_BALANCE", " 2500.50 "),
            ("TRADE_STATS_WINDOW", "25"),
            ("LOG_FORMAT", "json"),
        ]))
        .unwrap();

        assert_eq!(config.standard_payout, dec!(50));
        assert_eq!(config.initial_balance, dec!(2500.50));
        assert_eq!(config.trade_stats_window, 25);
        assert_eq!(config.log_format, "json");
    }

    #[test]
    fn test_malformed_value_is_reported() {
        let err = Config::from_lookup(lookup_from(&[("MAX_CONTRACTS_PER_PROP", "ten")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                key: "MAX_CONTRACTS_PER_PROP",
                value: "ten".to_string(),
            }
        );
    }

    #[test]
    fn test_inverted_clamp_is_rejected() {
        let err = Config::from_lookup(lookup_from(&[
            ("PROBABILITY_FLOOR", "0.9"),
            ("PROBABILITY_CEILING", "0.1"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Inconsistent(_)));
    }

    #[test]
    fn test_pricing_model_uses_clamp() {
        let config = Config::default();
        let model = config.pricing_model();
        assert_eq!(model.probability_floor, dec!(0.01));
        assert_eq!(model.probability_ceiling, dec!(0.99));
    }
}
