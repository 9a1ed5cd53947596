//! House service ledger entity - One funding cycle of a recurring house service.
//!
//! At most one row per `house_service_id` is `active`; a partial unique index created
//! alongside the tables backs this up at the database level. The per-user contribution
//! list lives in `metadata` as JSON (see `core::ledger::LedgerMetadata`).

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Lifecycle of a funding cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
pub enum LedgerStatus {
    /// The current cycle, accepting contributions
    #[sea_orm(string_value = "active")]
    Active,
    /// A finished cycle, read-only
    #[sea_orm(string_value = "closed")]
    Closed,
}

/// House service ledger database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "house_service_ledgers")]
pub struct Model {
    /// Unique identifier
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Service this cycle funds
    pub house_service_id: i64,
    /// Bill that opened the cycle
    pub bill_id: Option<i64>,
    /// Amount the service needs this cycle, in cents
    pub funding_required_cents: i64,
    /// Amount contributed by members so far, in cents
    pub funded_cents: i64,
    /// Amount fronted by the platform, in cents
    pub amount_fronted_cents: i64,
    /// Service fees charged on top of the funding, in cents
    pub service_fee_total_cents: i64,
    /// `funding_required + service_fee_total`, in cents
    pub total_required_cents: i64,
    /// When the cycle opened
    pub cycle_start: DateTimeUtc,
    /// When the cycle closed, empty while active
    pub cycle_end: Option<DateTimeUtc>,
    /// Active or closed
    pub status: LedgerStatus,
    /// JSON contribution ledger
    pub metadata: String,
    /// When the row was created
    pub created_at: DateTimeUtc,
    /// When the row was last modified
    pub updated_at: DateTimeUtc,
}

/// Each ledger belongs to one house service
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// The funded service
    #[sea_orm(
        belongs_to = "super::house_service::Entity",
        from = "Column::HouseServiceId",
        to = "super::house_service::Column::Id"
    )]
    HouseService,
}

impl Related<super::house_service::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::HouseService.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
