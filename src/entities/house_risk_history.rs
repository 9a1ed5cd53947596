//! House risk history entity - Append-only snapshot written on every HSI recompute.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// House risk history database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "house_risk_histories")]
pub struct Model {
    /// Unique identifier
    #[sea_orm(primary_key)]
    pub id: i64,
    /// House the snapshot belongs to
    pub house_id: i64,
    /// Score measured from member points before smoothing
    pub measured_score: i32,
    /// Stored score before this recompute, empty on cold start
    pub previous_score: Option<i32>,
    /// Smoothed score after this recompute
    pub score: i32,
    /// Bracket after this recompute
    pub bracket: i32,
    /// Current risk factor in basis points
    pub current_risk_factor_bps: i32,
    /// Trend factor in basis points
    pub trend_factor_bps: i32,
    /// Risk multiplier in basis points
    pub risk_multiplier_bps: i32,
    /// Unpaid charges at the time of the snapshot
    pub unpaid_charges_count: i32,
    /// Unpaid amount at the time of the snapshot, in cents
    pub unpaid_amount_cents: i64,
    /// When the snapshot was taken
    pub created_at: DateTimeUtc,
}

/// `HouseRiskHistory` has no declared relations
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
