//! User finance entity - Cached balance, credit and points for one user.
//!
//! The row is created lazily on a user's first financial event. `balance_cents` and
//! `credit_cents` are only written by `core::finance`; `points` only by `core::points`.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// User finance database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "user_finances")]
pub struct Model {
    /// Unique identifier
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Owning user, one row per user
    #[sea_orm(unique)]
    pub user_id: i64,
    /// Amount the user owes, in cents
    pub balance_cents: i64,
    /// Credit available to the user, in cents
    pub credit_cents: i64,
    /// Reputation points, centered on zero
    pub points: i32,
    /// When the row was created
    pub created_at: DateTimeUtc,
    /// When the row was last modified
    pub updated_at: DateTimeUtc,
}

/// `UserFinance` has no declared relations
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
