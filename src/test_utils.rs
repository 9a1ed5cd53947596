//! Shared test utilities for the ledger core.
//!
//! This module provides common helper functions for setting up test databases
//! and creating houses, members and bills with sensible defaults.
#![allow(clippy::expect_used)]

use crate::{
    config::{Settings, database},
    core::{
        bill::{self, IssuedBill, NewBill, Shares},
        household,
        hsi::HsiEngine,
        money::Money,
        notification::{PushMessage, PushNotifier},
    },
    entities::{Charge, ChargeStatus, FeeCategory, charge, house_service, user},
    errors::{Error, Result},
};
use chrono::NaiveDate;
use sea_orm::{DatabaseConnection, prelude::*, sea_query::Expr};
use std::sync::{Arc, Mutex};
use tracing_subscriber::EnvFilter;

/// Routes `tracing` output to the test harness. Safe to call from every test.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")),
        )
        .with_test_writer()
        .try_init();
}

/// Creates an in-memory `SQLite` database with all tables initialized.
/// This is the standard setup for all integration tests.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    init_test_tracing();
    let db = database::create_connection("sqlite::memory:").await?;
    database::create_tables(&db).await?;
    Ok(db)
}

/// Shorthand for a calendar date.
pub fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).expect("valid test date")
}

/// Default settings without service fees, so charge amounts equal bill shares.
pub fn fee_free_settings() -> Settings {
    let mut settings = Settings::default();
    settings.fees.utility_base_fee_cents = 0;
    settings.fees.marketplace_base_fee_cents = 0;
    settings
}

/// Creates a user living in `house_id`.
pub async fn create_test_member(
    db: &DatabaseConnection,
    username: &str,
    house_id: i64,
) -> Result<user::Model> {
    household::create_user(db, username, Some(house_id)).await
}

/// Creates a house with the given members and one utility service.
/// Returns (members, service) for common test scenarios.
pub async fn setup_house(
    db: &DatabaseConnection,
    house_id: i64,
    usernames: &[&str],
) -> Result<(Vec<user::Model>, house_service::Model)> {
    let mut members = Vec::with_capacity(usernames.len());
    for name in usernames {
        members.push(create_test_member(db, name, house_id).await?);
    }
    let service =
        household::create_house_service(db, house_id, "Electricity", FeeCategory::Utility).await?;
    Ok((members, service))
}

/// Issues an evenly split bill of `amount` whole dollars with custom settings.
pub async fn issue_bill_with(
    db: &DatabaseConnection,
    settings: &Settings,
    house_service_id: i64,
    amount: i64,
    due_date: NaiveDate,
) -> Result<IssuedBill> {
    bill::issue_bill(
        db,
        settings,
        NewBill {
            house_service_id,
            name: "Test bill".to_string(),
            amount: Money::from_major(amount),
            due_date,
            shares: Shares::EvenSplit,
        },
    )
    .await
}

/// Issues an evenly split bill of `amount` whole dollars with default settings.
pub async fn issue_test_bill(
    db: &DatabaseConnection,
    house_service_id: i64,
    amount: i64,
    due_date: NaiveDate,
) -> Result<IssuedBill> {
    issue_bill_with(db, &Settings::default(), house_service_id, amount, due_date).await
}

/// Flags a charge as paid without moving any money.
pub async fn mark_charge_paid(db: &DatabaseConnection, charge_id: i64) -> Result<()> {
    Charge::update_many()
        .col_expr(charge::Column::Status, Expr::value(ChargeStatus::Paid))
        .filter(charge::Column::Id.eq(charge_id))
        .exec(db)
        .await?;
    Ok(())
}

/// HSI engine with default settings and a recording notifier.
pub fn test_engine(db: &DatabaseConnection) -> HsiEngine<RecordingNotifier> {
    HsiEngine::new(db.clone(), &Settings::default(), RecordingNotifier::default())
}

/// Push notifier that keeps every message, or fails every delivery.
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<PushMessage>>>,
    fail: bool,
}

impl RecordingNotifier {
    /// A notifier whose deliveries always fail.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Messages delivered so far.
    pub fn sent(&self) -> Vec<PushMessage> {
        self.sent.lock().expect("notifier lock").clone()
    }
}

impl PushNotifier for RecordingNotifier {
    async fn send(&self, message: &PushMessage) -> Result<()> {
        if self.fail {
            return Err(Error::InsufficientConfiguration {
                message: "push delivery unavailable".to_string(),
            });
        }
        self.sent.lock().expect("notifier lock").push(message.clone());
        Ok(())
    }
}
