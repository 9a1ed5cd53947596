/// Database configuration and connection management
pub mod database;

/// Business settings loaded from a TOML file
pub mod settings;

pub use settings::{
    AdvanceSettings, FeeSettings, HsiSettings, LatePaymentSettings, PaymentSettings,
    PointsSettings, Settings, load_settings, parse_settings,
};
