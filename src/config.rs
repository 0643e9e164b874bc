//! Engine configuration: fan-out limit, per-level rates and currency precision
use super::error::{ReferralError, Result};
use super::model::Level;
use super::money::Rate;

pub const DEFAULT_FANOUT_LIMIT: u32 = 5;
pub const DEFAULT_CURRENCY_PRECISION: u32 = 2;
const MAX_CURRENCY_PRECISION: u32 = 10;

pub const ENV_LEVEL_1_RATE: &str = "LEVEL_1_COMMISSION_RATE";
pub const ENV_LEVEL_2_RATE: &str = "LEVEL_2_COMMISSION_RATE";
pub const ENV_LEVEL_3_RATE: &str = "LEVEL_3_COMMISSION_RATE";
pub const ENV_FANOUT_LIMIT: &str = "REFERRAL_FANOUT_LIMIT";
pub const ENV_CURRENCY_PRECISION: &str = "CURRENCY_PRECISION";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateTable {
    pub level_1: Rate,
    pub level_2: Rate,
    pub level_3: Rate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    pub fanout_limit: u32,
    pub rates: RateTable,
    pub currency_precision: u32,
}

impl RateTable {
    pub fn new(level_1: Rate, level_2: Rate, level_3: Rate) -> Self {
        Self {
            level_1,
            level_2,
            level_3,
        }
    }
    pub fn rate(&self, level: Level) -> Rate {
        match level {
            Level::One => self.level_1,
            Level::Two => self.level_2,
            Level::Three => self.level_3,
        }
    }
}

impl Default for RateTable {
    fn default() -> Self {
        Self {
            level_1: Rate::from_hundredths(10),
            level_2: Rate::from_hundredths(5),
            level_3: Rate::from_hundredths(2),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fanout_limit: DEFAULT_FANOUT_LIMIT,
            rates: RateTable::default(),
            currency_precision: DEFAULT_CURRENCY_PRECISION,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with_fanout_limit(mut self, limit: u32) -> Self {
        self.fanout_limit = limit;
        self
    }
    pub fn with_rates(mut self, rates: RateTable) -> Self {
        self.rates = rates;
        self
    }
    pub fn with_currency_precision(mut self, precision: u32) -> Self {
        self.currency_precision = precision;
        self
    }
    /// Read overrides from the process environment, defaults for anything unset
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }
    /// Same as [`EngineConfig::from_env`] but against any key/value source
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup(ENV_LEVEL_1_RATE) {
            config.rates.level_1 = Rate::parse(&raw)?;
        }
        if let Some(raw) = lookup(ENV_LEVEL_2_RATE) {
            config.rates.level_2 = Rate::parse(&raw)?;
        }
        if let Some(raw) = lookup(ENV_LEVEL_3_RATE) {
            config.rates.level_3 = Rate::parse(&raw)?;
        }
        if let Some(raw) = lookup(ENV_FANOUT_LIMIT) {
            config.fanout_limit = parse_u32(ENV_FANOUT_LIMIT, &raw)?;
        }
        if let Some(raw) = lookup(ENV_CURRENCY_PRECISION) {
            config.currency_precision = parse_u32(ENV_CURRENCY_PRECISION, &raw)?;
        }

        config.validate()?;
        Ok(config)
    }
    pub fn validate(&self) -> Result<()> {
        if self.fanout_limit == 0 {
            return Err(ReferralError::InvalidConfig(
                "fanout limit must be at least 1".into(),
            ));
        }
        if self.currency_precision > MAX_CURRENCY_PRECISION {
            return Err(ReferralError::InvalidConfig(format!(
                "currency precision {} exceeds {MAX_CURRENCY_PRECISION}",
                self.currency_precision
            )));
        }
        // Rate bounds are checked when a Rate is built, re-check in case of hand-built tables
        for level in Level::ALL {
            Rate::new(self.rates.rate(level).value())?;
        }
        Ok(())
    }
}

fn parse_u32(key: &str, raw: &str) -> Result<u32> {
    raw.trim()
        .parse::<u32>()
        .map_err(|e| ReferralError::InvalidConfig(format!("{key}={raw:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults() {
        let config = EngineConfig::default();

        assert_eq!(config.fanout_limit, 5);
        assert_eq!(config.currency_precision, 2);
        assert_eq!(config.rates.rate(Level::One), Rate::parse("0.10").unwrap());
        assert_eq!(config.rates.rate(Level::Two), Rate::parse("0.05").unwrap());
        assert_eq!(config.rates.rate(Level::Three), Rate::parse("0.02").unwrap());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn lookup_overrides_only_what_is_set() {
        let vars = HashMap::from([
            (ENV_LEVEL_1_RATE, "0.2"),
            (ENV_FANOUT_LIMIT, "3"),
        ]);

        let config =
            EngineConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string())).unwrap();

        assert_eq!(config.fanout_limit, 3);
        assert_eq!(config.rates.level_1, Rate::parse("0.20").unwrap());
        assert_eq!(config.rates.level_2, RateTable::default().level_2);
        assert_eq!(config.currency_precision, DEFAULT_CURRENCY_PRECISION);
    }

    #[test]
    fn malformed_values_are_rejected() {
        let bad_rate = EngineConfig::from_lookup(|key| {
            (key == ENV_LEVEL_2_RATE).then(|| "five percent".to_string())
        });
        assert!(matches!(bad_rate, Err(ReferralError::InvalidConfig(_))));

        let zero_limit =
            EngineConfig::from_lookup(|key| (key == ENV_FANOUT_LIMIT).then(|| "0".to_string()));
        assert!(matches!(zero_limit, Err(ReferralError::InvalidConfig(_))));

        let too_precise = EngineConfig::new().with_currency_precision(11);
        assert!(too_precise.validate().is_err());
    }
}
