//! House status index entity - The smoothed 0-100 financial health score of a house.
//!
//! Multipliers and risk factors are stored in basis points (value x 10 000). Every value
//! the HSI formulas produce has at most four decimal places, so nothing is lost.

use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// House status index database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "house_status_indexes")]
pub struct Model {
    /// Unique identifier
    #[sea_orm(primary_key)]
    pub id: i64,
    /// House the score belongs to, one row per house
    #[sea_orm(unique)]
    pub house_id: i64,
    /// Smoothed score, 0-100
    pub score: i32,
    /// `floor(score / 10)`, 0-10
    pub bracket: i32,
    /// Fee multiplier in basis points
    pub fee_multiplier_bps: i32,
    /// Credit multiplier in basis points
    pub credit_multiplier_bps: i32,
    /// Current risk factor in basis points
    pub current_risk_factor_bps: i32,
    /// Trend factor in basis points, positive when the score is falling
    pub trend_factor_bps: i32,
    /// Combined risk multiplier in basis points
    pub risk_multiplier_bps: i32,
    /// Unpaid charges in the house at the last assessment
    pub unpaid_charges_count: i32,
    /// Unpaid amount in the house at the last assessment, in cents
    pub unpaid_amount_cents: i64,
    /// When the risk fields were last computed
    pub last_risk_assessment: Option<DateTimeUtc>,
    /// Optimistic concurrency counter, bumped on every write
    pub version: i32,
    /// When the row was last modified
    pub updated_at: DateTimeUtc,
}

impl Model {
    /// Fee multiplier as a decimal
    #[must_use]
    pub fn fee_multiplier(&self) -> Decimal {
        Decimal::new(i64::from(self.fee_multiplier_bps), 4)
    }

    /// Credit multiplier as a decimal
    #[must_use]
    pub fn credit_multiplier(&self) -> Decimal {
        Decimal::new(i64::from(self.credit_multiplier_bps), 4)
    }

    /// Risk multiplier as a decimal
    #[must_use]
    pub fn risk_multiplier(&self) -> Decimal {
        Decimal::new(i64::from(self.risk_multiplier_bps), 4)
    }
}

/// `HouseStatusIndex` has no declared relations
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
