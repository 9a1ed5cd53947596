//! Household registry - Users, their house membership, and house services.
//!
//! The ledger core only needs a thin slice of the household model: which users live in
//! a house (for HSI and bill splitting) and which recurring services a house pays for
//! (for funding ledgers). Everything else about users and houses lives outside this crate.

use crate::{
    entities::{FeeCategory, HouseService, User, house_service, user},
    errors::{Error, Result},
};
use sea_orm::{QueryOrder, QuerySelect, Set, prelude::*};
use tracing::info;

/// Creates a user, optionally placing them in a house.
pub async fn create_user<C>(db: &C, username: &str, house_id: Option<i64>) -> Result<user::Model>
where
    C: ConnectionTrait,
{
    if username.trim().is_empty() {
        return Err(Error::InvalidTransaction {
            message: "Username cannot be empty".to_string(),
        });
    }

    let model = user::ActiveModel {
        username: Set(username.trim().to_string()),
        house_id: Set(house_id),
        created_at: Set(chrono::Utc::now()),
        ..Default::default()
    }
    .insert(db)
    .await?;

    info!(user_id = model.id, ?house_id, "Created user");
    Ok(model)
}

/// Finds a user by id.
pub async fn get_user<C>(db: &C, user_id: i64) -> Result<Option<user::Model>>
where
    C: ConnectionTrait,
{
    User::find_by_id(user_id).one(db).await.map_err(Into::into)
}

/// Finds a user by id, failing with `NotFound` when missing.
pub async fn require_user<C>(db: &C, user_id: i64) -> Result<user::Model>
where
    C: ConnectionTrait,
{
    get_user(db, user_id)
        .await?
        .ok_or_else(|| Error::not_found("user", user_id))
}

/// Moves a user into a house (or out of any house with `None`).
pub async fn set_user_house<C>(db: &C, user_id: i64, house_id: Option<i64>) -> Result<user::Model>
where
    C: ConnectionTrait,
{
    let existing = require_user(db, user_id).await?;
    let mut active: user::ActiveModel = existing.into();
    active.house_id = Set(house_id);
    Ok(active.update(db).await?)
}

/// All users living in a house, ordered by id.
pub async fn get_house_members<C>(db: &C, house_id: i64) -> Result<Vec<user::Model>>
where
    C: ConnectionTrait,
{
    User::find()
        .filter(user::Column::HouseId.eq(house_id))
        .order_by_asc(user::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Ids of every house that has at least one member.
pub async fn houses_with_members<C>(db: &C) -> Result<Vec<i64>>
where
    C: ConnectionTrait,
{
    let ids: Vec<Option<i64>> = User::find()
        .select_only()
        .column(user::Column::HouseId)
        .distinct()
        .filter(user::Column::HouseId.is_not_null())
        .order_by_asc(user::Column::HouseId)
        .into_tuple()
        .all(db)
        .await?;
    Ok(ids.into_iter().flatten().collect())
}

/// Registers a recurring service for a house.
pub async fn create_house_service<C>(
    db: &C,
    house_id: i64,
    name: &str,
    fee_category: FeeCategory,
) -> Result<house_service::Model>
where
    C: ConnectionTrait,
{
    if name.trim().is_empty() {
        return Err(Error::InvalidTransaction {
            message: "House service name cannot be empty".to_string(),
        });
    }

    let model = house_service::ActiveModel {
        house_id: Set(house_id),
        name: Set(name.trim().to_string()),
        fee_category: Set(fee_category),
        is_active: Set(true),
        created_at: Set(chrono::Utc::now()),
        ..Default::default()
    }
    .insert(db)
    .await?;

    info!(house_service_id = model.id, house_id, "Created house service");
    Ok(model)
}

/// Finds a house service by id, failing with `NotFound` when missing.
pub async fn require_house_service<C>(db: &C, house_service_id: i64) -> Result<house_service::Model>
where
    C: ConnectionTrait,
{
    HouseService::find_by_id(house_service_id)
        .one(db)
        .await?
        .ok_or_else(|| Error::not_found("house service", house_service_id))
}

/// Active services of a house.
pub async fn get_house_services<C>(db: &C, house_id: i64) -> Result<Vec<house_service::Model>>
where
    C: ConnectionTrait,
{
    HouseService::find()
        .filter(house_service::Column::HouseId.eq(house_id))
        .filter(house_service::Column::IsActive.eq(true))
        .order_by_asc(house_service::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}
