//! Business settings loaded from a TOML file.
//!
//! Every section and field has a default, so an empty file (or no file at all) yields the
//! production constants. Loaded settings are validated before use: the HSI smoothing
//! factor must stay within 0.1-0.3 and every limit must be positive.

use crate::core::money::Money;
use crate::entities::FeeCategory;
use crate::errors::{Error, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// All tunable settings of the ledger core
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// House status index engine
    pub hsi: HsiSettings,
    /// Late-payment sweep
    pub late_payment: LatePaymentSettings,
    /// Service fee schedule
    pub fees: FeeSettings,
    /// On-time payment bonus
    pub points: PointsSettings,
    /// Advances and allowance
    pub advance: AdvanceSettings,
    /// Payment processor interaction
    pub payments: PaymentSettings,
}

/// `[hsi]` section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HsiSettings {
    /// EMA smoothing factor; higher reacts faster to recent behavior
    pub alpha: Decimal,
    /// Distance to the next lower bracket boundary that triggers a warning
    pub warning_threshold: i32,
}

impl Default for HsiSettings {
    fn default() -> Self {
        Self {
            alpha: dec!(0.2),
            warning_threshold: 2,
        }
    }
}

/// `[late_payment]` section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LatePaymentSettings {
    /// Days past due without any penalty
    pub grace_period_days: i64,
    /// Maximum points deducted for a single charge
    pub max_penalty_per_charge: i32,
}

impl Default for LatePaymentSettings {
    fn default() -> Self {
        Self {
            grace_period_days: 3,
            max_penalty_per_charge: 15,
        }
    }
}

/// `[fees]` section, base fees per charge before the HSI multiplier
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeeSettings {
    /// Base fee for utility services, in cents
    pub utility_base_fee_cents: i64,
    /// Base fee for marketplace services, in cents
    pub marketplace_base_fee_cents: i64,
}

impl Default for FeeSettings {
    fn default() -> Self {
        Self {
            utility_base_fee_cents: 200,
            marketplace_base_fee_cents: 300,
        }
    }
}

impl FeeSettings {
    /// Base fee for a category
    #[must_use]
    pub const fn base_fee(&self, category: FeeCategory) -> Money {
        match category {
            FeeCategory::Utility => Money::from_cents(self.utility_base_fee_cents),
            FeeCategory::Marketplace => Money::from_cents(self.marketplace_base_fee_cents),
        }
    }
}

/// `[points]` section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PointsSettings {
    /// Points awarded for paying a charge by its due date
    pub on_time_bonus: i32,
}

impl Default for PointsSettings {
    fn default() -> Self {
        Self { on_time_bonus: 2 }
    }
}

/// `[advance]` section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AdvanceSettings {
    /// Allowance of a house with credit multiplier 1.0, in cents
    pub base_allowance_cents: i64,
}

impl Default for AdvanceSettings {
    fn default() -> Self {
        Self {
            base_allowance_cents: 50_000,
        }
    }
}

impl AdvanceSettings {
    /// Base allowance as money
    #[must_use]
    pub const fn base_allowance(&self) -> Money {
        Money::from_cents(self.base_allowance_cents)
    }
}

/// `[payments]` section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PaymentSettings {
    /// Processor attempts allowed per idempotency key
    pub max_attempts: i32,
    /// Seconds to wait for the processor before marking the attempt failed
    pub processor_timeout_secs: u64,
}

impl Default for PaymentSettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            processor_timeout_secs: 30,
        }
    }
}

impl PaymentSettings {
    /// Processor timeout as a duration
    #[must_use]
    pub const fn processor_timeout(&self) -> Duration {
        Duration::from_secs(self.processor_timeout_secs)
    }
}

impl Settings {
    /// Checks value ranges and normalizes the smoothing factor to four decimal places.
    pub fn validate(mut self) -> Result<Self> {
        self.hsi.alpha = self.hsi.alpha.round_dp(4);
        if self.hsi.alpha < dec!(0.1) || self.hsi.alpha > dec!(0.3) {
            return Err(Error::Config {
                message: format!("hsi.alpha must be within 0.1-0.3, got {}", self.hsi.alpha),
            });
        }
        if !(0..10).contains(&self.hsi.warning_threshold) {
            return Err(Error::Config {
                message: "hsi.warning_threshold must be within 0-9".to_string(),
            });
        }
        if self.late_payment.grace_period_days < 0 || self.late_payment.max_penalty_per_charge < 0
        {
            return Err(Error::Config {
                message: "late_payment values must not be negative".to_string(),
            });
        }
        if self.fees.utility_base_fee_cents < 0 || self.fees.marketplace_base_fee_cents < 0 {
            return Err(Error::Config {
                message: "fees must not be negative".to_string(),
            });
        }
        if self.advance.base_allowance_cents < 0 {
            return Err(Error::Config {
                message: "advance.base_allowance_cents must not be negative".to_string(),
            });
        }
        if self.payments.max_attempts < 1 || self.payments.processor_timeout_secs == 0 {
            return Err(Error::Config {
                message: "payments.max_attempts and processor_timeout_secs must be positive"
                    .to_string(),
            });
        }
        Ok(self)
    }
}

/// Parses and validates settings from TOML text.
pub fn parse_settings(contents: &str) -> Result<Settings> {
    let settings: Settings = toml::from_str(contents).map_err(|e| Error::Config {
        message: format!("Failed to parse settings: {e}"),
    })?;
    settings.validate()
}

/// Loads settings from a TOML file.
///
/// # Errors
/// Returns an error if:
/// - The file cannot be read
/// - The TOML syntax is invalid
/// - A value is out of range
pub fn load_settings<P: AsRef<Path>>(path: P) -> Result<Settings> {
    let path_ref = path.as_ref();
    tracing::debug!("Loading settings from {:?}", path_ref);
    let contents = std::fs::read_to_string(path_ref).map_err(|e| Error::Config {
        message: format!("Failed to read settings file {}: {e}", path_ref.display()),
    })?;
    parse_settings(&contents)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn test_empty_file_yields_defaults() {
        let settings = parse_settings("").unwrap();
        assert_eq!(settings.hsi.alpha, dec!(0.2));
        assert_eq!(settings.hsi.warning_threshold, 2);
        assert_eq!(settings.late_payment.grace_period_days, 3);
        assert_eq!(settings.late_payment.max_penalty_per_charge, 15);
        assert_eq!(settings.payments.max_attempts, 3);
    }

    #[test]
    fn test_parse_sections() {
        let toml_str = r#"
            [hsi]
            alpha = "0.3"
            warning_threshold = 1

            [fees]
            utility_base_fee_cents = 150

            [advance]
            base_allowance_cents = 25000
        "#;

        let settings = parse_settings(toml_str).unwrap();
        assert_eq!(settings.hsi.alpha, dec!(0.3));
        assert_eq!(settings.hsi.warning_threshold, 1);
        assert_eq!(
            settings.fees.base_fee(FeeCategory::Utility),
            Money::from_cents(150)
        );
        assert_eq!(
            settings.fees.base_fee(FeeCategory::Marketplace),
            Money::from_cents(300)
        );
        assert_eq!(settings.advance.base_allowance(), Money::from_cents(25_000));
    }

    #[test]
    fn test_alpha_out_of_range_is_rejected() {
        let result = parse_settings("[hsi]\nalpha = \"0.5\"\n");
        assert!(matches!(result, Err(Error::Config { .. })));
    }

    #[test]
    fn test_invalid_toml_is_rejected() {
        assert!(matches!(
            parse_settings("[hsi\nalpha ="),
            Err(Error::Config { .. })
        ));
    }

    #[test]
    fn test_load_missing_file() {
        let result = load_settings("/definitely/not/here.toml");
        assert!(matches!(result, Err(Error::Config { .. })));
    }
}
