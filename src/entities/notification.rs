//! Notification entity - In-app notifications shown to a user.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Notification database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "notifications")]
pub struct Model {
    /// Unique identifier
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Recipient
    pub user_id: i64,
    /// Machine-readable kind (e.g. `"hsi_warning"`)
    pub kind: String,
    /// Short title
    pub title: String,
    /// Body text
    pub message: String,
    /// Whether the user has seen it
    pub is_read: bool,
    /// When it was created
    pub created_at: DateTimeUtc,
}

/// Notifications have no declared relations
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
