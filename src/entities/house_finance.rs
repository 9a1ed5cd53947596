//! House finance entity - Cached balance and collected-funds counter for one house.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// House finance database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "house_finances")]
pub struct Model {
    /// Unique identifier
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Owning house, one row per house
    #[sea_orm(unique)]
    pub house_id: i64,
    /// House balance, in cents
    pub balance_cents: i64,
    /// Total collected from members, in cents
    pub ledger_cents: i64,
    /// When the row was created
    pub created_at: DateTimeUtc,
    /// When the row was last modified
    pub updated_at: DateTimeUtc,
}

/// `HouseFinance` has no declared relations
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
