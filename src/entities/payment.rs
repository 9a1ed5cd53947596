//! Payment entity - One logical payment attempt, keyed by its idempotency key.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Processing state of a payment
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
pub enum PaymentStatus {
    /// Sent to the processor, outcome not yet settled locally
    #[sea_orm(string_value = "processing")]
    Processing,
    /// Charged and settled
    #[sea_orm(string_value = "completed")]
    Completed,
    /// Declined or timed out; may be retried under the same key
    #[sea_orm(string_value = "failed")]
    Failed,
}

/// Payment database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "payments")]
pub struct Model {
    /// Unique identifier
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Paying user
    pub user_id: i64,
    /// Client-supplied key, unique across all payments
    #[sea_orm(unique)]
    pub idempotency_key: String,
    /// Total charged, in cents
    pub amount_cents: i64,
    /// JSON array of the charge ids this payment covers
    pub charge_ids: String,
    /// Processing state
    pub status: PaymentStatus,
    /// Failed processor attempts so far
    pub retry_count: i32,
    /// Processor-side payment id
    pub external_payment_id: Option<String>,
    /// Last failure reason
    pub failure_reason: Option<String>,
    /// When the payment was first attempted
    pub created_at: DateTimeUtc,
    /// When the payment was last modified
    pub updated_at: DateTimeUtc,
}

/// Payments have no declared relations
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
