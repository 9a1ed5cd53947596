//! Database configuration module for the ledger core.
//!
//! This module handles the database connection and table creation using `SeaORM`.
//! Tables are generated from the entity definitions with `Schema::create_table_from_entity`
//! so the schema always matches the Rust structs. The only hand-written SQL is the partial
//! unique index that allows a single active funding ledger per house service, which the
//! entity derive cannot express.

use crate::entities::{
    Bill, Charge, HouseFinance, HouseRiskHistory, HouseService, HouseServiceLedger,
    HouseStatusIndex, Notification, Payment, PointsEntry, Transaction, User, UserFinance,
};
use crate::errors::Result;
use sea_orm::{ConnectionTrait, Database, DatabaseConnection, EntityTrait, Schema};
use tracing::{debug, info, instrument};

const DEFAULT_DATABASE_URL: &str = "sqlite://data/house_ledger.sqlite?mode=rwc";

const ACTIVE_LEDGER_INDEX: &str = "CREATE UNIQUE INDEX IF NOT EXISTS idx_one_active_ledger_per_service \
     ON house_service_ledgers (house_service_id) WHERE status = 'active'";

/// Gets the database URL from the `DATABASE_URL` environment variable, falling back to a
/// local `SQLite` file.
#[must_use]
pub fn get_database_url() -> String {
    std::env::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string())
}

/// Establishes a connection to the database at `database_url`.
#[instrument]
pub async fn create_connection(database_url: &str) -> Result<DatabaseConnection> {
    debug!("Connecting to database");
    Database::connect(database_url).await.map_err(Into::into)
}

async fn create_table<E>(db: &DatabaseConnection, schema: &Schema, entity: E) -> Result<()>
where
    E: EntityTrait,
{
    let builder = db.get_database_backend();
    let mut statement = schema.create_table_from_entity(entity);
    statement.if_not_exists();
    db.execute(builder.build(&statement)).await?;
    Ok(())
}

/// Creates all tables (if missing) plus the active-ledger partial unique index.
///
/// Safe to call on every start-up.
pub async fn create_tables(db: &DatabaseConnection) -> Result<()> {
    let schema = Schema::new(db.get_database_backend());

    create_table(db, &schema, User).await?;
    create_table(db, &schema, HouseService).await?;
    create_table(db, &schema, UserFinance).await?;
    create_table(db, &schema, HouseFinance).await?;
    create_table(db, &schema, Transaction).await?;
    create_table(db, &schema, HouseServiceLedger).await?;
    create_table(db, &schema, HouseStatusIndex).await?;
    create_table(db, &schema, HouseRiskHistory).await?;
    create_table(db, &schema, Bill).await?;
    create_table(db, &schema, Charge).await?;
    create_table(db, &schema, Payment).await?;
    create_table(db, &schema, PointsEntry).await?;
    create_table(db, &schema, Notification).await?;

    db.execute_unprepared(ACTIVE_LEDGER_INDEX).await?;

    info!("Database tables ensured");
    Ok(())
}
