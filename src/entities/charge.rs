//! Charge entity - One user's share of a bill.
//!
//! `amount_cents` is `base_amount_cents + service_fee_cents`. The HSI score and fee
//! multiplier in effect when the charge was issued are snapshotted so later score
//! changes never reprice an existing charge.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Payment state of a charge
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
pub enum ChargeStatus {
    /// Still owed
    #[sea_orm(string_value = "unpaid")]
    Unpaid,
    /// Settled by a payment
    #[sea_orm(string_value = "paid")]
    Paid,
}

/// Charge database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "charges")]
pub struct Model {
    /// Unique identifier
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Bill the charge belongs to
    pub bill_id: i64,
    /// User who owes the charge
    pub user_id: i64,
    /// Display name
    pub name: String,
    /// Share of the bill, in cents
    pub base_amount_cents: i64,
    /// Service fee on top of the share, in cents
    pub service_fee_cents: i64,
    /// Total owed, in cents
    pub amount_cents: i64,
    /// Unpaid or paid
    pub status: ChargeStatus,
    /// When the charge is due
    pub due_date: Date,
    /// House score when the charge was issued
    pub hsi_at_time_of_charge: i32,
    /// Fee multiplier applied, in basis points
    pub fee_multiplier_bps: i32,
    /// Points awarded when paid on time
    pub points_potential: i32,
    /// Whether the platform fronted this charge
    pub advanced: bool,
    /// Late-payment points deducted so far for this charge
    pub late_penalty_points: i32,
    /// Last day the late-payment sweep processed this charge
    pub last_penalty_date: Option<Date>,
    /// When the charge was paid
    pub paid_at: Option<DateTimeUtc>,
    /// Payment that settled the charge
    pub payment_id: Option<i64>,
    /// When the charge was issued
    pub created_at: DateTimeUtc,
}

/// Each charge belongs to one bill
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// The parent bill
    #[sea_orm(
        belongs_to = "super::bill::Entity",
        from = "Column::BillId",
        to = "super::bill::Column::Id"
    )]
    Bill,
}

impl Related<super::bill::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Bill.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
