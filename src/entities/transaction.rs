//! Transaction entity - The append-only money movement log.
//!
//! Every balance change made by the finance module produces exactly one row here,
//! carrying the affected balance before and after the change. Rows are inserted with
//! status `COMPLETED` and never updated afterwards.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Kind of money movement. The direction it applies to a balance is defined in
/// `core::finance`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
pub enum TransactionType {
    /// A user's share of a bill is added to what they owe
    #[sea_orm(string_value = "CHARGE")]
    Charge,
    /// Money paid by a user towards their charges
    #[sea_orm(string_value = "PAYMENT")]
    Payment,
    /// The platform fronted a charge on behalf of the house
    #[sea_orm(string_value = "ADVANCE")]
    Advance,
    /// An advance paid back when the user settles the fronted charge
    #[sea_orm(string_value = "ADVANCE_REPAYMENT")]
    AdvanceRepayment,
    /// One leg of a movement between two parties
    #[sea_orm(string_value = "TRANSFER")]
    Transfer,
    /// Credit granted to a user
    #[sea_orm(string_value = "CREDIT")]
    Credit,
    /// Credit consumed by a user
    #[sea_orm(string_value = "CREDIT_USAGE")]
    CreditUsage,
    /// Manual correction, direction explicit
    #[sea_orm(string_value = "ADJUSTMENT")]
    Adjustment,
    /// Fee, direction explicit
    #[sea_orm(string_value = "FEE")]
    Fee,
    /// Refund, direction explicit
    #[sea_orm(string_value = "REFUND")]
    Refund,
}

/// Lifecycle status of a transaction row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
pub enum TransactionStatus {
    /// Recorded but not yet applied
    #[sea_orm(string_value = "PENDING")]
    Pending,
    /// Being applied
    #[sea_orm(string_value = "PROCESSING")]
    Processing,
    /// Applied to the balance
    #[sea_orm(string_value = "COMPLETED")]
    Completed,
    /// Could not be applied
    #[sea_orm(string_value = "FAILED")]
    Failed,
    /// Compensated by a later transaction
    #[sea_orm(string_value = "REVERSED")]
    Reversed,
}

/// Transaction database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "transactions")]
pub struct Model {
    /// Unique identifier for the transaction
    #[sea_orm(primary_key)]
    pub id: i64,
    /// User whose balance was affected, if any
    pub user_id: Option<i64>,
    /// House the movement belongs to; the affected balance when `user_id` is empty
    pub house_id: Option<i64>,
    /// Kind of movement
    pub transaction_type: TransactionType,
    /// Always positive, in cents
    pub amount_cents: i64,
    /// Affected balance before the movement, in cents
    pub balance_before_cents: i64,
    /// Affected balance after the movement, in cents
    pub balance_after_cents: i64,
    /// Lifecycle status
    pub status: TransactionStatus,
    /// Human-readable description
    pub description: String,
    /// Bill this movement relates to
    pub bill_id: Option<i64>,
    /// Charge this movement relates to
    pub charge_id: Option<i64>,
    /// Payment this movement relates to
    pub payment_id: Option<i64>,
    /// Paired transaction (advance for a repayment, debit leg for a transfer credit)
    pub related_transaction_id: Option<i64>,
    /// Reference in an external system (processor charge id)
    pub external_reference_id: Option<String>,
    /// Opaque JSON metadata
    pub metadata: Option<String>,
    /// Immutable ordering key
    pub created_at: DateTimeUtc,
}

/// Transactions are linked by id columns only; no foreign key relations are declared.
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
