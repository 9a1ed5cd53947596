//! House service ledger - Funding cycles of recurring house services.
//!
//! Each house service moves through `no ledger -> active -> closed -> active -> ...`.
//! A new bill opens a cycle (closing the previous one), member payments contribute to
//! the active cycle, and advances record what the platform fronted.
//!
//! `add_contribution` is the only code path that increments `funded`, and it records
//! each charge at most once, so a retried settlement can never double-fund a cycle.

use crate::{
    core::money::Money,
    entities::{HouseServiceLedger, LedgerStatus, house_service_ledger},
    errors::{Error, Result},
};
use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use sea_orm::{QueryOrder, Set, TransactionTrait, prelude::*, sea_query::Expr};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

/// A member payment credited to a funding cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Contribution {
    /// Paying user
    pub user_id: i64,
    /// Amount contributed
    pub amount: Money,
    /// Charge the payment settled, used to record each charge once
    pub charge_id: Option<i64>,
}

/// One entry of the contribution list stored in the ledger metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContributionRecord {
    /// Paying user
    pub user_id: i64,
    /// Amount in cents
    pub amount_cents: i64,
    /// Settled charge
    pub charge_id: Option<i64>,
    /// When the contribution was recorded
    pub recorded_at: DateTime<Utc>,
}

/// JSON document kept in `house_service_ledgers.metadata`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerMetadata {
    /// Contributions in the order they were recorded
    pub contributions: Vec<ContributionRecord>,
    /// Set once `funded` went past `total_required`
    pub overfunded: bool,
}

impl LedgerMetadata {
    /// Decodes the metadata column. An empty column is an empty document.
    pub fn from_json(raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_json::from_str(raw)?)
    }

    fn has_charge(&self, charge_id: i64) -> bool {
        self.contributions
            .iter()
            .any(|c| c.charge_id == Some(charge_id))
    }
}

/// Result of [`add_contribution`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContributionOutcome {
    /// Ledger after the call
    pub ledger: house_service_ledger::Model,
    /// Whether the contribution was recorded (false for a repeated charge)
    pub recorded: bool,
    /// Whether `funded` now exceeds `total_required`
    pub overfunded: bool,
}

/// Derived funding figures of a ledger
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FundingStatus {
    /// Funding plus service fees
    pub total_required: Money,
    /// Contributed so far
    pub funded: Money,
    /// Still missing, never negative
    pub remaining: Money,
    /// Funded share in percent, two decimal places
    pub percent_funded: Decimal,
    /// Whether the cycle is fully funded
    pub fully_funded: bool,
}

/// Funding figures of a ledger.
#[must_use]
pub fn funding_status(ledger: &house_service_ledger::Model) -> FundingStatus {
    let total_required = Money::from_cents(ledger.total_required_cents);
    let funded = Money::from_cents(ledger.funded_cents);
    let remaining = if funded >= total_required {
        Money::ZERO
    } else {
        total_required - funded
    };
    let percent_funded = if ledger.total_required_cents > 0 {
        (Decimal::from(ledger.funded_cents) * Decimal::ONE_HUNDRED
            / Decimal::from(ledger.total_required_cents))
        .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
    } else {
        Decimal::ONE_HUNDRED
    };

    FundingStatus {
        total_required,
        funded,
        remaining,
        percent_funded,
        fully_funded: funded >= total_required,
    }
}

/// The active ledger of a service, if any.
pub async fn get_active_ledger<C>(
    db: &C,
    house_service_id: i64,
) -> Result<Option<house_service_ledger::Model>>
where
    C: ConnectionTrait,
{
    HouseServiceLedger::find()
        .filter(house_service_ledger::Column::HouseServiceId.eq(house_service_id))
        .filter(house_service_ledger::Column::Status.eq(LedgerStatus::Active))
        .order_by_desc(house_service_ledger::Column::CreatedAt)
        .order_by_desc(house_service_ledger::Column::Id)
        .one(db)
        .await
        .map_err(Into::into)
}

async fn require_active_ledger<C>(db: &C, house_service_id: i64) -> Result<house_service_ledger::Model>
where
    C: ConnectionTrait,
{
    if let Some(active) = get_active_ledger(db, house_service_id).await? {
        return Ok(active);
    }

    let any = HouseServiceLedger::find()
        .filter(house_service_ledger::Column::HouseServiceId.eq(house_service_id))
        .one(db)
        .await?;
    match any {
        Some(_) => Err(Error::LedgerState {
            message: format!("the funding cycle of house service {house_service_id} is closed"),
        }),
        None => Err(Error::InsufficientConfiguration {
            message: format!("house service {house_service_id} has no funding ledger"),
        }),
    }
}

async fn close_ledger_row<C>(conn: &C, ledger: &house_service_ledger::Model) -> Result<()>
where
    C: ConnectionTrait,
{
    let now = Utc::now();
    let result = HouseServiceLedger::update_many()
        .col_expr(
            house_service_ledger::Column::Status,
            Expr::value(LedgerStatus::Closed),
        )
        .col_expr(house_service_ledger::Column::CycleEnd, Expr::value(now))
        .col_expr(house_service_ledger::Column::UpdatedAt, Expr::value(now))
        .filter(house_service_ledger::Column::Id.eq(ledger.id))
        .filter(house_service_ledger::Column::Status.eq(LedgerStatus::Active))
        .exec(conn)
        .await?;
    if result.rows_affected == 0 {
        return Err(Error::ConcurrencyConflict {
            resource: format!("house service ledger {}", ledger.id),
        });
    }
    Ok(())
}

/// Closes the active cycle of a service (if any) and opens a new one, atomically.
#[instrument(skip(db))]
pub async fn open_cycle<C>(
    db: &C,
    house_service_id: i64,
    bill_id: Option<i64>,
    funding_required: Money,
    service_fee_total: Money,
) -> Result<house_service_ledger::Model>
where
    C: ConnectionTrait + TransactionTrait,
{
    let funding_required = funding_required.ensure_positive()?;
    if service_fee_total.is_negative() {
        return Err(Error::InvalidAmount {
            reason: "service fee total cannot be negative".to_string(),
        });
    }

    let txn = db.begin().await?;

    if let Some(previous) = get_active_ledger(&txn, house_service_id).await? {
        close_ledger_row(&txn, &previous).await?;
        info!(
            ledger_id = previous.id,
            house_service_id, "Closed funding cycle"
        );
    }

    let now = Utc::now();
    let ledger = house_service_ledger::ActiveModel {
        house_service_id: Set(house_service_id),
        bill_id: Set(bill_id),
        funding_required_cents: Set(funding_required.cents()),
        funded_cents: Set(0),
        amount_fronted_cents: Set(0),
        service_fee_total_cents: Set(service_fee_total.cents()),
        total_required_cents: Set((funding_required + service_fee_total).cents()),
        cycle_start: Set(now),
        cycle_end: Set(None),
        status: Set(LedgerStatus::Active),
        metadata: Set(serde_json::to_string(&LedgerMetadata::default())?),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(&txn)
    .await?;

    txn.commit().await?;

    info!(
        ledger_id = ledger.id,
        house_service_id,
        "Opened funding cycle requiring {}",
        Money::from_cents(ledger.total_required_cents)
    );
    Ok(ledger)
}

/// Credits a member contribution to the active cycle of a service.
///
/// # Errors
/// * `InsufficientConfiguration` - the service never had a ledger
/// * `LedgerState` - the service only has closed cycles
/// * `ConcurrencyConflict` - the ledger changed while the contribution was recorded
#[instrument(skip(db))]
pub async fn add_contribution<C>(
    db: &C,
    house_service_id: i64,
    contribution: Contribution,
) -> Result<ContributionOutcome>
where
    C: ConnectionTrait + TransactionTrait,
{
    let amount = contribution.amount.ensure_positive()?;

    let txn = db.begin().await?;
    let ledger = require_active_ledger(&txn, house_service_id).await?;
    let mut metadata = LedgerMetadata::from_json(&ledger.metadata)?;

    if let Some(charge_id) = contribution.charge_id
        && metadata.has_charge(charge_id)
    {
        txn.commit().await?;
        info!(
            ledger_id = ledger.id,
            charge_id, "Contribution already recorded, skipping"
        );
        let overfunded = ledger.funded_cents > ledger.total_required_cents;
        return Ok(ContributionOutcome {
            ledger,
            recorded: false,
            overfunded,
        });
    }

    let funded = ledger.funded_cents + amount.cents();
    let overfunded = funded > ledger.total_required_cents;
    metadata.contributions.push(ContributionRecord {
        user_id: contribution.user_id,
        amount_cents: amount.cents(),
        charge_id: contribution.charge_id,
        recorded_at: Utc::now(),
    });
    metadata.overfunded |= overfunded;

    let result = HouseServiceLedger::update_many()
        .col_expr(house_service_ledger::Column::FundedCents, Expr::value(funded))
        .col_expr(
            house_service_ledger::Column::Metadata,
            Expr::value(serde_json::to_string(&metadata)?),
        )
        .col_expr(house_service_ledger::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(house_service_ledger::Column::Id.eq(ledger.id))
        .filter(house_service_ledger::Column::FundedCents.eq(ledger.funded_cents))
        .filter(house_service_ledger::Column::Status.eq(LedgerStatus::Active))
        .exec(&txn)
        .await?;
    if result.rows_affected == 0 {
        return Err(Error::ConcurrencyConflict {
            resource: format!("house service ledger {}", ledger.id),
        });
    }

    let updated = HouseServiceLedger::find_by_id(ledger.id)
        .one(&txn)
        .await?
        .ok_or_else(|| Error::not_found("house service ledger", ledger.id))?;
    txn.commit().await?;

    if overfunded {
        warn!(
            ledger_id = updated.id,
            house_service_id,
            "Funding cycle overfunded: {} of {}",
            Money::from_cents(updated.funded_cents),
            Money::from_cents(updated.total_required_cents)
        );
    }
    info!(
        ledger_id = updated.id,
        user_id = contribution.user_id,
        "Recorded contribution of {}",
        amount
    );
    Ok(ContributionOutcome {
        ledger: updated,
        recorded: true,
        overfunded,
    })
}

/// Adds an amount fronted by the platform to the active cycle of a service.
pub async fn record_fronted<C>(
    db: &C,
    house_service_id: i64,
    amount: Money,
) -> Result<house_service_ledger::Model>
where
    C: ConnectionTrait + TransactionTrait,
{
    let amount = amount.ensure_positive()?;

    let txn = db.begin().await?;
    let ledger = require_active_ledger(&txn, house_service_id).await?;
    HouseServiceLedger::update_many()
        .col_expr(
            house_service_ledger::Column::AmountFrontedCents,
            Expr::col(house_service_ledger::Column::AmountFrontedCents).add(amount.cents()),
        )
        .col_expr(house_service_ledger::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(house_service_ledger::Column::Id.eq(ledger.id))
        .exec(&txn)
        .await?;
    let updated = HouseServiceLedger::find_by_id(ledger.id)
        .one(&txn)
        .await?
        .ok_or_else(|| Error::not_found("house service ledger", ledger.id))?;
    txn.commit().await?;

    info!(ledger_id = updated.id, "Recorded {} fronted", amount);
    Ok(updated)
}

/// Closes the active cycle without opening a new one.
pub async fn close_active_ledger<C>(db: &C, house_service_id: i64) -> Result<house_service_ledger::Model>
where
    C: ConnectionTrait + TransactionTrait,
{
    let txn = db.begin().await?;
    let ledger = get_active_ledger(&txn, house_service_id)
        .await?
        .ok_or_else(|| Error::LedgerState {
            message: format!("house service {house_service_id} has no active funding cycle"),
        })?;
    close_ledger_row(&txn, &ledger).await?;
    let closed = HouseServiceLedger::find_by_id(ledger.id)
        .one(&txn)
        .await?
        .ok_or_else(|| Error::not_found("house service ledger", ledger.id))?;
    txn.commit().await?;

    info!(ledger_id = closed.id, house_service_id, "Closed funding cycle");
    Ok(closed)
}

/// Every cycle of a service, newest first.
pub async fn ledger_history<C>(db: &C, house_service_id: i64) -> Result<Vec<house_service_ledger::Model>>
where
    C: ConnectionTrait,
{
    HouseServiceLedger::find()
        .filter(house_service_ledger::Column::HouseServiceId.eq(house_service_id))
        .order_by_desc(house_service_ledger::Column::CreatedAt)
        .order_by_desc(house_service_ledger::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}
