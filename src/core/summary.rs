//! House summary generation.
//!
//! Read-only aggregation of the finance, advance and HSI state of a house into one
//! structure that dashboards can render directly.

use crate::{
    core::{advance, finance, household, hsi, money::Money},
    entities::{house_status_index, transaction},
    errors::Result,
};
use sea_orm::ConnectionTrait;

/// Financial overview of a house.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HouseSummary {
    /// The house
    pub house_id: i64,
    /// Current house balance
    pub balance: Money,
    /// Total collected from members
    pub ledger_total: Money,
    /// Advances not yet repaid
    pub outstanding_advances: Money,
    /// Stored HSI, if computed
    pub hsi: Option<house_status_index::Model>,
    /// Number of unpaid charges
    pub unpaid_charges_count: i32,
    /// Total of unpaid charges
    pub unpaid_amount: Money,
    /// Number of members
    pub member_count: usize,
    /// Most recent movements on the house balance
    pub recent_transactions: Vec<transaction::Model>,
}

/// Builds the summary of a house.
///
/// # Arguments
/// * `db` - Database connection
/// * `house_id` - House to summarize
/// * `transaction_limit` - Maximum number of recent transactions to include (default 10)
pub async fn house_summary<C>(
    db: &C,
    house_id: i64,
    transaction_limit: Option<u64>,
) -> Result<HouseSummary>
where
    C: ConnectionTrait,
{
    let finance = finance::get_house_finance(db, house_id).await?;
    let outstanding_advances = advance::outstanding_advances(db, house_id).await?;
    let hsi = hsi::get_house_hsi(db, house_id).await?;
    let (unpaid_charges_count, unpaid_amount) = hsi::unpaid_charge_stats(db, house_id).await?;
    let member_count = household::get_house_members(db, house_id).await?.len();

    let recent_transactions = finance::get_recent_transactions_for_house(
        db,
        house_id,
        transaction_limit.unwrap_or(10),
    )
    .await?;

    Ok(HouseSummary {
        house_id,
        balance: Money::from_cents(finance.as_ref().map_or(0, |f| f.balance_cents)),
        ledger_total: Money::from_cents(finance.as_ref().map_or(0, |f| f.ledger_cents)),
        outstanding_advances,
        hsi,
        unpaid_charges_count,
        unpaid_amount,
        member_count,
        recent_transactions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        core::{bill, payment::settle_payment},
        entities::{Payment, PaymentStatus, payment},
        test_utils::*,
    };
    use chrono::Utc;
    use sea_orm::{ActiveModelTrait, EntityTrait, Set};

    #[tokio::test]
    async fn test_empty_house_summary() -> Result<()> {
        let db = setup_test_db().await?;
        let summary = house_summary(&db, 9, None).await?;
        assert_eq!(summary.balance, Money::ZERO);
        assert_eq!(summary.member_count, 0);
        assert!(summary.hsi.is_none());
        assert!(summary.recent_transactions.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_summary_after_bill_advance_and_payment() -> Result<()> {
        let db = setup_test_db().await?;
        let settings = fee_free_settings();
        let (members, service) = setup_house(&db, 1, &["alice", "bob"]).await?;
        let issued = issue_bill_with(&db, &settings, service.id, 80, date(2026, 3, 1)).await?;
        advance::advance_charge(&db, &settings, issued.charges[1].id).await?;

        let now = Utc::now();
        let pending = payment::ActiveModel {
            user_id: Set(members[0].id),
            idempotency_key: Set("direct".to_string()),
            amount_cents: Set(4000),
            charge_ids: Set(format!("[{}]", issued.charges[0].id)),
            status: Set(PaymentStatus::Processing),
            retry_count: Set(0),
            external_payment_id: Set(None),
            failure_reason: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(&db)
        .await?;
        settle_payment(&db, pending.id, Some("ext".to_string()), date(2026, 2, 28)).await?;
        let stored = Payment::find_by_id(pending.id).one(&db).await?;
        assert_eq!(stored.map(|p| p.status), Some(PaymentStatus::Completed));

        let summary = house_summary(&db, 1, Some(1)).await?;
        assert_eq!(summary.member_count, 2);
        assert_eq!(summary.balance, Money::from_major(80));
        assert_eq!(summary.ledger_total, Money::from_major(40));
        assert_eq!(summary.outstanding_advances, Money::from_major(40));
        assert_eq!(summary.unpaid_charges_count, 1);
        assert_eq!(summary.unpaid_amount, Money::from_major(40));
        assert_eq!(summary.recent_transactions.len(), 1);
        assert_eq!(
            bill::require_bill(&db, issued.bill.id).await?.status,
            crate::entities::BillStatus::PartialPaid
        );
        Ok(())
    }
}
