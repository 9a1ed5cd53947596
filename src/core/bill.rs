//! Bills and charges - Splitting a house service bill into per-user charges.
//!
//! Issuing a bill is one atomic unit: the bill row, one charge per member with the HSI
//! service fee snapshotted on it, a CHARGE transaction per member, and the rollover of
//! the service's funding cycle.

use crate::{
    config::settings::Settings,
    core::{
        finance::{self, TransactionLinks, TransactionParams},
        household, hsi, ledger,
        money::Money,
    },
    entities::{
        Bill, BillStatus, Charge, ChargeStatus, TransactionType, bill, charge,
        house_service_ledger,
    },
    errors::{Error, Result},
};
use chrono::{NaiveDate, Utc};
use sea_orm::{QueryOrder, Set, TransactionTrait, prelude::*};
use std::collections::HashSet;
use tracing::{info, instrument};

/// One member's share of a bill, before service fees
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BillShare {
    /// Member paying the share
    pub user_id: i64,
    /// Share of the bill amount
    pub amount: Money,
}

/// How a bill is divided between members
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Shares {
    /// Evenly over the current house members, remainder cents to the first members
    EvenSplit,
    /// Explicit shares; they must add up to the bill amount
    Explicit(Vec<BillShare>),
}

/// Input for [`issue_bill`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBill {
    /// Service the bill belongs to
    pub house_service_id: i64,
    /// Display name, copied onto the charges
    pub name: String,
    /// Bill amount without service fees
    pub amount: Money,
    /// Due date of every charge
    pub due_date: NaiveDate,
    /// How the amount is divided
    pub shares: Shares,
}

/// Result of [`issue_bill`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedBill {
    /// The bill
    pub bill: bill::Model,
    /// One charge per member, in share order
    pub charges: Vec<charge::Model>,
    /// The funding cycle opened for the bill
    pub ledger: house_service_ledger::Model,
}

async fn resolve_shares<C>(db: &C, house_id: i64, amount: Money, shares: Shares) -> Result<Vec<BillShare>>
where
    C: ConnectionTrait,
{
    match shares {
        Shares::EvenSplit => {
            let members = household::get_house_members(db, house_id).await?;
            if members.is_empty() {
                return Err(Error::InsufficientConfiguration {
                    message: format!("house {house_id} has no members to split a bill between"),
                });
            }
            let amounts = amount.split_evenly(members.len())?;
            if amounts.iter().any(|share| !share.is_positive()) {
                return Err(Error::InvalidAmount {
                    reason: format!(
                        "{amount} cannot be split between {} members without a zero share",
                        members.len()
                    ),
                });
            }
            Ok(members
                .iter()
                .zip(amounts)
                .map(|(member, amount)| BillShare {
                    user_id: member.id,
                    amount,
                })
                .collect())
        }
        Shares::Explicit(shares) => {
            if shares.is_empty() {
                return Err(Error::InvalidTransaction {
                    message: "a bill needs at least one share".to_string(),
                });
            }
            let mut seen = HashSet::new();
            for share in &shares {
                share.amount.ensure_positive()?;
                if !seen.insert(share.user_id) {
                    return Err(Error::InvalidTransaction {
                        message: format!("user {} has more than one share", share.user_id),
                    });
                }
                let user = household::require_user(db, share.user_id).await?;
                if user.house_id != Some(house_id) {
                    return Err(Error::InvalidTransaction {
                        message: format!("user {} is not a member of house {house_id}", user.id),
                    });
                }
            }
            let total: Money = shares.iter().map(|s| s.amount).sum();
            if total != amount {
                return Err(Error::InvalidAmount {
                    reason: format!("shares add up to {total}, bill amount is {amount}"),
                });
            }
            Ok(shares)
        }
    }
}

/// Issues a bill for a house service and charges every member their share plus the
/// service fee of their house.
///
/// # Errors
/// * `InsufficientConfiguration` - the service is inactive or the house has no members
/// * `InvalidAmount` - non-positive amount or explicit shares that do not add up
/// * `InvalidTransaction` - a share for a non-member or a duplicate share
#[instrument(skip(db, settings, new_bill), fields(house_service_id = new_bill.house_service_id))]
pub async fn issue_bill<C>(db: &C, settings: &Settings, new_bill: NewBill) -> Result<IssuedBill>
where
    C: ConnectionTrait + TransactionTrait,
{
    let amount = new_bill.amount.ensure_positive()?;
    if new_bill.name.trim().is_empty() {
        return Err(Error::InvalidTransaction {
            message: "Bill name cannot be empty".to_string(),
        });
    }

    let txn = db.begin().await?;

    let service = household::require_house_service(&txn, new_bill.house_service_id).await?;
    if !service.is_active {
        return Err(Error::InsufficientConfiguration {
            message: format!("house service {} is not active", service.id),
        });
    }
    let house_id = service.house_id;
    let shares = resolve_shares(&txn, house_id, amount, new_bill.shares).await?;

    let fee = hsi::service_fee_for(&txn, &settings.fees, house_id, service.fee_category).await?;
    let (score, fee_multiplier_bps) = hsi::get_house_hsi(&txn, house_id)
        .await?
        .map_or((hsi::BASELINE_SCORE, 10_000), |index| {
            (index.score, index.fee_multiplier_bps)
        });
    let service_fee_total: Money = shares.iter().map(|_| fee.fee).sum();

    let now = Utc::now();
    let bill = bill::ActiveModel {
        house_id: Set(house_id),
        house_service_id: Set(service.id),
        name: Set(new_bill.name.trim().to_string()),
        amount_cents: Set(amount.cents()),
        service_fee_total_cents: Set(service_fee_total.cents()),
        status: Set(BillStatus::Pending),
        due_date: Set(new_bill.due_date),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(&txn)
    .await?;

    let mut charges = Vec::with_capacity(shares.len());
    for share in shares {
        let charge_amount = share.amount + fee.fee;
        let charge = charge::ActiveModel {
            bill_id: Set(bill.id),
            user_id: Set(share.user_id),
            name: Set(bill.name.clone()),
            base_amount_cents: Set(share.amount.cents()),
            service_fee_cents: Set(fee.fee.cents()),
            amount_cents: Set(charge_amount.cents()),
            status: Set(ChargeStatus::Unpaid),
            due_date: Set(bill.due_date),
            hsi_at_time_of_charge: Set(score),
            fee_multiplier_bps: Set(fee_multiplier_bps),
            points_potential: Set(settings.points.on_time_bonus),
            advanced: Set(false),
            late_penalty_points: Set(0),
            last_penalty_date: Set(None),
            paid_at: Set(None),
            payment_id: Set(None),
            created_at: Set(now),
            ..Default::default()
        }
        .insert(&txn)
        .await?;

        finance::apply_transaction(
            &txn,
            TransactionParams::for_user(
                share.user_id,
                TransactionType::Charge,
                charge_amount,
                format!("{} (share {}, fee {})", bill.name, share.amount, fee.fee),
            )
            .in_house(house_id)
            .with_links(TransactionLinks {
                bill_id: Some(bill.id),
                charge_id: Some(charge.id),
                ..Default::default()
            }),
        )
        .await?;

        charges.push(charge);
    }

    let ledger =
        ledger::open_cycle(&txn, service.id, Some(bill.id), amount, service_fee_total).await?;

    txn.commit().await?;

    info!(
        bill_id = bill.id,
        house_id,
        charges = charges.len(),
        "Issued bill of {} plus {} in fees",
        amount,
        service_fee_total
    );
    Ok(IssuedBill {
        bill,
        charges,
        ledger,
    })
}

/// Finds a bill by id, failing with `NotFound` when missing.
pub async fn require_bill<C>(db: &C, bill_id: i64) -> Result<bill::Model>
where
    C: ConnectionTrait,
{
    Bill::find_by_id(bill_id)
        .one(db)
        .await?
        .ok_or_else(|| Error::not_found("bill", bill_id))
}

/// Finds a charge by id, failing with `NotFound` when missing.
pub async fn require_charge<C>(db: &C, charge_id: i64) -> Result<charge::Model>
where
    C: ConnectionTrait,
{
    Charge::find_by_id(charge_id)
        .one(db)
        .await?
        .ok_or_else(|| Error::not_found("charge", charge_id))
}

/// Charges of a bill, ordered by id.
pub async fn get_charges_for_bill<C>(db: &C, bill_id: i64) -> Result<Vec<charge::Model>>
where
    C: ConnectionTrait,
{
    Charge::find()
        .filter(charge::Column::BillId.eq(bill_id))
        .order_by_asc(charge::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Unpaid charges of a user, oldest due date first.
pub async fn get_unpaid_charges_for_user<C>(db: &C, user_id: i64) -> Result<Vec<charge::Model>>
where
    C: ConnectionTrait,
{
    Charge::find()
        .filter(charge::Column::UserId.eq(user_id))
        .filter(charge::Column::Status.eq(ChargeStatus::Unpaid))
        .order_by_asc(charge::Column::DueDate)
        .order_by_asc(charge::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Status of a bill derived from its charges.
#[must_use]
pub fn derive_bill_status(charges: &[charge::Model]) -> BillStatus {
    let paid = charges
        .iter()
        .filter(|c| c.status == ChargeStatus::Paid)
        .count();
    if paid == 0 {
        BillStatus::Pending
    } else if paid == charges.len() {
        BillStatus::Paid
    } else {
        BillStatus::PartialPaid
    }
}

/// Recomputes and stores the status of a bill from its charges.
pub async fn update_bill_status<C>(db: &C, bill_id: i64) -> Result<bill::Model>
where
    C: ConnectionTrait,
{
    let existing = require_bill(db, bill_id).await?;
    let charges = get_charges_for_bill(db, bill_id).await?;
    let status = derive_bill_status(&charges);
    if status == existing.status {
        return Ok(existing);
    }

    let mut active: bill::ActiveModel = existing.into();
    active.status = Set(status);
    active.updated_at = Set(Utc::now());
    let updated = active.update(db).await?;
    info!(bill_id, status = ?updated.status, "Updated bill status");
    Ok(updated)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::panic)]
    use super::*;
    use crate::{
        core::finance::get_user_finance,
        entities::{FeeCategory, LedgerStatus, Transaction},
        test_utils::*,
    };

    #[tokio::test]
    async fn test_even_split_with_fees() -> Result<()> {
        let db = setup_test_db().await?;
        let (members, service) = setup_house(&db, 1, &["alice", "bob", "carol"]).await?;

        let issued = issue_bill(
            &db,
            &Settings::default(),
            NewBill {
                house_service_id: service.id,
                name: "Electricity".to_string(),
                amount: Money::from_major(100),
                due_date: date(2026, 3, 1),
                shares: Shares::EvenSplit,
            },
        )
        .await?;

        let bases: Vec<i64> = issued.charges.iter().map(|c| c.base_amount_cents).collect();
        assert_eq!(bases, vec![3334, 3333, 3333]);
        assert!(issued.charges.iter().all(|c| c.service_fee_cents == 200));
        assert!(issued.charges.iter().all(|c| c.hsi_at_time_of_charge == 50));
        assert!(issued.charges.iter().all(|c| c.fee_multiplier_bps == 10_000));
        assert!(issued.charges.iter().all(|c| c.points_potential == 2));
        assert_eq!(issued.bill.service_fee_total_cents, 600);
        assert_eq!(issued.bill.status, BillStatus::Pending);

        assert_eq!(issued.ledger.status, LedgerStatus::Active);
        assert_eq!(issued.ledger.bill_id, Some(issued.bill.id));
        assert_eq!(issued.ledger.funding_required_cents, 10_000);
        assert_eq!(issued.ledger.total_required_cents, 10_600);

        let alice = get_user_finance(&db, members[0].id).await?.unwrap();
        assert_eq!(alice.balance_cents, 3534);
        assert_eq!(Transaction::find().all(&db).await?.len(), 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_explicit_shares_must_add_up() -> Result<()> {
        let db = setup_test_db().await?;
        let (members, service) = setup_house(&db, 1, &["alice", "bob"]).await?;

        let result = issue_bill(
            &db,
            &Settings::default(),
            NewBill {
                house_service_id: service.id,
                name: "Internet".to_string(),
                amount: Money::from_major(60),
                due_date: date(2026, 3, 1),
                shares: Shares::Explicit(vec![
                    BillShare {
                        user_id: members[0].id,
                        amount: Money::from_major(40),
                    },
                    BillShare {
                        user_id: members[1].id,
                        amount: Money::from_major(10),
                    },
                ]),
            },
        )
        .await;
        assert!(matches!(result, Err(Error::InvalidAmount { .. })));
        assert!(Bill::find().all(&db).await?.is_empty());
        assert!(Transaction::find().all(&db).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_explicit_share_for_outsider_rejected() -> Result<()> {
        let db = setup_test_db().await?;
        let (members, service) = setup_house(&db, 1, &["alice"]).await?;
        let outsider = household::create_user(&db, "mallory", Some(2)).await?;

        let result = issue_bill(
            &db,
            &Settings::default(),
            NewBill {
                house_service_id: service.id,
                name: "Water".to_string(),
                amount: Money::from_major(30),
                due_date: date(2026, 3, 1),
                shares: Shares::Explicit(vec![
                    BillShare {
                        user_id: members[0].id,
                        amount: Money::from_major(15),
                    },
                    BillShare {
                        user_id: outsider.id,
                        amount: Money::from_major(15),
                    },
                ]),
            },
        )
        .await;
        assert!(matches!(result, Err(Error::InvalidTransaction { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_even_split_smaller_than_members_rejected() -> Result<()> {
        let db = setup_test_db().await?;
        let (_, service) = setup_house(&db, 1, &["alice", "bob", "carol"]).await?;

        let result = issue_bill(
            &db,
            &fee_free_settings(),
            NewBill {
                house_service_id: service.id,
                name: "Stamps".to_string(),
                amount: Money::from_cents(2),
                due_date: date(2026, 3, 1),
                shares: Shares::EvenSplit,
            },
        )
        .await;
        match result {
            Err(Error::InvalidAmount { reason }) => assert!(reason.contains("3 members")),
            other => panic!("expected InvalidAmount, got {other:?}"),
        }
        assert!(Bill::find().all(&db).await?.is_empty());
        assert!(Transaction::find().all(&db).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_bill_for_empty_house_needs_members() -> Result<()> {
        let db = setup_test_db().await?;
        let service =
            household::create_house_service(&db, 5, "Trash", FeeCategory::Utility).await?;

        let result = issue_test_bill(&db, service.id, 20, date(2026, 3, 1)).await;
        assert!(matches!(
            result,
            Err(Error::InsufficientConfiguration { .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_new_bill_rolls_funding_cycle() -> Result<()> {
        let db = setup_test_db().await?;
        let (_, service) = setup_house(&db, 1, &["alice"]).await?;

        let first = issue_test_bill(&db, service.id, 50, date(2026, 2, 1)).await?;
        let second = issue_test_bill(&db, service.id, 55, date(2026, 3, 1)).await?;

        let history = ledger::ledger_history(&db, service.id).await?;
        assert_eq!(history.len(), 2);
        let active = ledger::get_active_ledger(&db, service.id).await?.unwrap();
        assert_eq!(active.id, second.ledger.id);
        let closed = history.iter().find(|l| l.id == first.ledger.id).unwrap();
        assert_eq!(closed.status, LedgerStatus::Closed);
        Ok(())
    }

    #[tokio::test]
    async fn test_bill_status_follows_charges() -> Result<()> {
        let db = setup_test_db().await?;
        let (_, service) = setup_house(&db, 1, &["alice", "bob"]).await?;
        let issued = issue_test_bill(&db, service.id, 40, date(2026, 3, 1)).await?;

        mark_charge_paid(&db, issued.charges[0].id).await?;
        let bill = update_bill_status(&db, issued.bill.id).await?;
        assert_eq!(bill.status, BillStatus::PartialPaid);

        mark_charge_paid(&db, issued.charges[1].id).await?;
        let bill = update_bill_status(&db, issued.bill.id).await?;
        assert_eq!(bill.status, BillStatus::Paid);
        Ok(())
    }

    #[tokio::test]
    async fn test_unpaid_charges_for_user() -> Result<()> {
        let db = setup_test_db().await?;
        let (members, service) = setup_house(&db, 1, &["alice", "bob"]).await?;
        issue_test_bill(&db, service.id, 40, date(2026, 3, 1)).await?;
        let later = issue_test_bill(&db, service.id, 20, date(2026, 4, 1)).await?;
        mark_charge_paid(&db, later.charges[0].id).await?;

        let unpaid = get_unpaid_charges_for_user(&db, members[0].id).await?;
        assert_eq!(unpaid.len(), 1);
        assert_eq!(unpaid[0].due_date, date(2026, 3, 1));
        assert_eq!(get_unpaid_charges_for_user(&db, members[1].id).await?.len(), 2);
        Ok(())
    }
}
