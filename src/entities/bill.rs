//! Bill entity - The aggregate obligation of a house service for one billing cycle.
//!
//! A bill's status is never set directly; it is recomputed from its charges by
//! `core::bill::update_bill_status`.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Payment state derived from the bill's charges
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
pub enum BillStatus {
    /// No charge paid yet
    #[sea_orm(string_value = "pending")]
    Pending,
    /// Some charges paid
    #[sea_orm(string_value = "partial_paid")]
    PartialPaid,
    /// Every charge paid
    #[sea_orm(string_value = "paid")]
    Paid,
}

/// Bill database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "bills")]
pub struct Model {
    /// Unique identifier
    #[sea_orm(primary_key)]
    pub id: i64,
    /// House being billed
    pub house_id: i64,
    /// Service the bill is for
    pub house_service_id: i64,
    /// Display name
    pub name: String,
    /// Bill amount before service fees, in cents
    pub amount_cents: i64,
    /// Sum of the service fees on its charges, in cents
    pub service_fee_total_cents: i64,
    /// Derived payment state
    pub status: BillStatus,
    /// When the bill is due
    pub due_date: Date,
    /// When the bill was issued
    pub created_at: DateTimeUtc,
    /// When the status last changed
    pub updated_at: DateTimeUtc,
}

/// Relations of a bill
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// One bill has many charges
    #[sea_orm(has_many = "super::charge::Entity")]
    Charges,
    /// Each bill belongs to one house service
    #[sea_orm(
        belongs_to = "super::house_service::Entity",
        from = "Column::HouseServiceId",
        to = "super::house_service::Column::Id"
    )]
    HouseService,
}

impl Related<super::charge::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Charges.def()
    }
}

impl Related<super::house_service::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::HouseService.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
