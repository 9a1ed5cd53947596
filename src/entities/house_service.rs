//! House service entity - A recurring service (internet, power, ...) a house pays for.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Category used to look up the base service fee for charges of this service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum FeeCategory {
    /// Utility-style recurring service billed to the house
    #[sea_orm(string_value = "utility")]
    Utility,
    /// Service bought through the partner marketplace
    #[sea_orm(string_value = "marketplace")]
    Marketplace,
}

/// House service database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "house_services")]
pub struct Model {
    /// Unique identifier
    #[sea_orm(primary_key)]
    pub id: i64,
    /// House the service belongs to
    pub house_id: i64,
    /// Display name (e.g. "Internet")
    pub name: String,
    /// Fee schedule category
    pub fee_category: FeeCategory,
    /// Inactive services keep their history but get no new cycles
    pub is_active: bool,
    /// When the service was created
    pub created_at: DateTimeUtc,
}

/// One house service has many funding ledgers and bills
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Funding cycles of this service
    #[sea_orm(has_many = "super::house_service_ledger::Entity")]
    Ledgers,
    /// Bills issued for this service
    #[sea_orm(has_many = "super::bill::Entity")]
    Bills,
}

impl Related<super::house_service_ledger::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Ledgers.def()
    }
}

impl Related<super::bill::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Bills.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
