//! Advances - The platform fronting charges on behalf of a house.
//!
//! Outstanding advance amounts are never stored. They are aggregated from the completed
//! ADVANCE and ADVANCE_REPAYMENT transactions of the house whenever they are needed, so
//! they cannot drift from the log.

use crate::{
    config::settings::{AdvanceSettings, Settings},
    core::{
        bill,
        finance::{self, TransactionLinks, TransactionParams},
        hsi, ledger,
        money::Money,
    },
    entities::{
        Charge, ChargeStatus, Transaction, TransactionStatus, TransactionType, charge,
        house_service_ledger, transaction,
    },
    errors::{Error, Result},
};
use rust_decimal::Decimal;
use sea_orm::{QuerySelect, Select, TransactionTrait, prelude::*, sea_query::Expr};
use tracing::{info, instrument};

/// Result of [`advance_charge`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvanceOutcome {
    /// The charge, now flagged as advanced
    pub charge: charge::Model,
    /// House ADVANCE transaction
    pub transaction: transaction::Model,
    /// Funding cycle with the fronted amount recorded
    pub ledger: house_service_ledger::Model,
}

fn net_advanced(rows: Vec<(TransactionType, i64)>) -> Money {
    rows.into_iter()
        .map(|(kind, cents)| match kind {
            TransactionType::AdvanceRepayment => -Money::from_cents(cents),
            _ => Money::from_cents(cents),
        })
        .sum()
}

fn advance_rows() -> Select<Transaction> {
    Transaction::find()
        .select_only()
        .column(transaction::Column::TransactionType)
        .column(transaction::Column::AmountCents)
        .filter(transaction::Column::UserId.is_null())
        .filter(transaction::Column::Status.eq(TransactionStatus::Completed))
        .filter(
            transaction::Column::TransactionType
                .is_in([TransactionType::Advance, TransactionType::AdvanceRepayment]),
        )
}

/// Advanced amount of a house not yet repaid.
pub async fn outstanding_advances<C>(db: &C, house_id: i64) -> Result<Money>
where
    C: ConnectionTrait,
{
    let rows = advance_rows()
        .filter(transaction::Column::HouseId.eq(house_id))
        .into_tuple()
        .all(db)
        .await?;
    Ok(net_advanced(rows))
}

/// Advanced amount of one charge not yet repaid.
pub async fn outstanding_advance_for_charge<C>(db: &C, charge_id: i64) -> Result<Money>
where
    C: ConnectionTrait,
{
    let rows = advance_rows()
        .filter(transaction::Column::ChargeId.eq(charge_id))
        .into_tuple()
        .all(db)
        .await?;
    Ok(net_advanced(rows))
}

/// How much more the platform would front for a house: the base allowance scaled by
/// the HSI credit multiplier, minus what is still outstanding, never below zero.
pub async fn available_allowance<C>(db: &C, settings: &AdvanceSettings, house_id: i64) -> Result<Money>
where
    C: ConnectionTrait,
{
    let multiplier = hsi::get_house_hsi(db, house_id)
        .await?
        .map_or(Decimal::ONE, |index| index.credit_multiplier());
    let limit = settings.base_allowance().mul_decimal(multiplier)?;
    let outstanding = outstanding_advances(db, house_id).await?;

    Ok(if outstanding >= limit {
        Money::ZERO
    } else {
        limit - outstanding
    })
}

/// Fronts an unpaid charge on behalf of its house.
///
/// # Errors
/// * `LedgerState` - the charge is paid or already advanced
/// * `AdvanceLimitExceeded` - the charge does not fit in the house allowance
/// * `InsufficientConfiguration` - the service has no active funding cycle
#[instrument(skip(db, settings))]
pub async fn advance_charge<C>(db: &C, settings: &Settings, charge_id: i64) -> Result<AdvanceOutcome>
where
    C: ConnectionTrait + TransactionTrait,
{
    let txn = db.begin().await?;

    let target = bill::require_charge(&txn, charge_id).await?;
    if target.status == ChargeStatus::Paid {
        return Err(Error::LedgerState {
            message: format!("charge {charge_id} is already paid"),
        });
    }
    if target.advanced {
        return Err(Error::LedgerState {
            message: format!("charge {charge_id} was already advanced"),
        });
    }
    let parent = bill::require_bill(&txn, target.bill_id).await?;
    let amount = Money::from_cents(target.amount_cents);

    let available = available_allowance(&txn, &settings.advance, parent.house_id).await?;
    if amount > available {
        return Err(Error::AdvanceLimitExceeded {
            available,
            requested: amount,
        });
    }

    let transaction = finance::apply_transaction(
        &txn,
        TransactionParams::for_house(
            parent.house_id,
            TransactionType::Advance,
            amount,
            format!("Advance for {}", target.name),
        )
        .with_links(TransactionLinks {
            bill_id: Some(parent.id),
            charge_id: Some(target.id),
            ..Default::default()
        }),
    )
    .await?;

    let flagged = Charge::update_many()
        .col_expr(charge::Column::Advanced, Expr::value(true))
        .filter(charge::Column::Id.eq(charge_id))
        .filter(charge::Column::Advanced.eq(false))
        .exec(&txn)
        .await?;
    if flagged.rows_affected == 0 {
        return Err(Error::ConcurrencyConflict {
            resource: format!("charge {charge_id}"),
        });
    }

    let ledger = ledger::record_fronted(&txn, parent.house_service_id, amount).await?;
    let charge = bill::require_charge(&txn, charge_id).await?;

    txn.commit().await?;

    info!(
        charge_id,
        house_id = parent.house_id,
        "Advanced {} for charge",
        amount
    );
    Ok(AdvanceOutcome {
        charge,
        transaction,
        ledger,
    })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::panic)]
    use super::*;
    use crate::{core::points, test_utils::*};

    #[tokio::test]
    async fn test_advance_charge_records_everything() -> Result<()> {
        let db = setup_test_db().await?;
        let settings = fee_free_settings();
        let (_, service) = setup_house(&db, 1, &["alice"]).await?;
        let issued = issue_bill_with(&db, &settings, service.id, 100, date(2026, 3, 1)).await?;
        let charge_id = issued.charges[0].id;

        let outcome = advance_charge(&db, &settings, charge_id).await?;
        assert!(outcome.charge.advanced);
        assert_eq!(outcome.transaction.transaction_type, TransactionType::Advance);
        assert_eq!(outcome.transaction.house_id, Some(1));
        assert_eq!(outcome.transaction.user_id, None);
        assert_eq!(outcome.transaction.charge_id, Some(charge_id));
        assert_eq!(outcome.ledger.amount_fronted_cents, 10_000);

        assert_eq!(outstanding_advances(&db, 1).await?, Money::from_major(100));
        assert_eq!(
            outstanding_advance_for_charge(&db, charge_id).await?,
            Money::from_major(100)
        );
        assert_eq!(
            available_allowance(&db, &settings.advance, 1).await?,
            Money::from_major(400)
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_charge_cannot_be_advanced_twice() -> Result<()> {
        let db = setup_test_db().await?;
        let settings = fee_free_settings();
        let (_, service) = setup_house(&db, 1, &["alice"]).await?;
        let issued = issue_bill_with(&db, &settings, service.id, 10, date(2026, 3, 1)).await?;

        advance_charge(&db, &settings, issued.charges[0].id).await?;
        assert!(matches!(
            advance_charge(&db, &settings, issued.charges[0].id).await,
            Err(Error::LedgerState { .. })
        ));
        assert_eq!(outstanding_advances(&db, 1).await?, Money::from_major(10));
        Ok(())
    }

    #[tokio::test]
    async fn test_allowance_limits_advances() -> Result<()> {
        let db = setup_test_db().await?;
        let mut settings = fee_free_settings();
        settings.advance.base_allowance_cents = 15_000;
        let (_, service) = setup_house(&db, 1, &["alice", "bob"]).await?;
        let issued = issue_bill_with(&db, &settings, service.id, 200, date(2026, 3, 1)).await?;

        advance_charge(&db, &settings, issued.charges[0].id).await?;
        let result = advance_charge(&db, &settings, issued.charges[1].id).await;
        match result {
            Err(Error::AdvanceLimitExceeded {
                available,
                requested,
            }) => {
                assert_eq!(available, Money::from_major(50));
                assert_eq!(requested, Money::from_major(100));
            }
            other => panic!("expected AdvanceLimitExceeded, got {other:?}"),
        }
        assert!(!bill::require_charge(&db, issued.charges[1].id).await?.advanced);
        Ok(())
    }

    #[tokio::test]
    async fn test_allowance_scales_with_credit_multiplier() -> Result<()> {
        let db = setup_test_db().await?;
        let settings = fee_free_settings();
        let (members, _) = setup_house(&db, 1, &["alice"]).await?;
        let engine = test_engine(&db);

        engine.update_house_hsi(1).await?;
        points::adjust_points(&db, members[0].id, -20, "late").await?;
        engine.update_house_hsi(1).await?;

        // Score 46 gives a credit multiplier of 0.92
        assert_eq!(
            available_allowance(&db, &settings.advance, 1).await?,
            Money::from_major(460)
        );
        Ok(())
    }
}
