//! Points entry entity - Append-only log of every change to a user's points.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Why a user's points changed
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
pub enum PointsReason {
    /// Bonus for paying a charge by its due date
    #[sea_orm(string_value = "on_time_payment")]
    OnTimePayment,
    /// Deduction from the late-payment sweep
    #[sea_orm(string_value = "late_penalty")]
    LatePenalty,
    /// Manual change by an administrator
    #[sea_orm(string_value = "admin_adjustment")]
    AdminAdjustment,
    /// Compensation for an earlier entry
    #[sea_orm(string_value = "reversal")]
    Reversal,
}

/// Points entry database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "points_entries")]
pub struct Model {
    /// Unique identifier
    #[sea_orm(primary_key)]
    pub id: i64,
    /// User whose points changed
    pub user_id: i64,
    /// Signed change
    pub delta: i32,
    /// Points before the change
    pub points_before: i32,
    /// Points after the change
    pub points_after: i32,
    /// Why the points changed
    pub reason: PointsReason,
    /// Charge the change relates to
    pub charge_id: Option<i64>,
    /// Entry this one reverses
    pub related_entry_id: Option<i64>,
    /// Free-form note
    pub note: Option<String>,
    /// When the change was recorded
    pub created_at: DateTimeUtc,
}

/// Points entries have no declared relations
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
