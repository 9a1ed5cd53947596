//! Late-payment sweep - Points penalties for overdue charges.
//!
//! The sweep is a plain function run by an external scheduler, usually once a day. It
//! brings the cumulative penalty of every overdue charge up to the target for its days
//! late, so running it twice on the same day changes nothing and skipping days catches
//! up on the next run.

use crate::{
    config::settings::{LatePaymentSettings, Settings},
    core::points::{self, PointsChange},
    entities::{Bill, Charge, ChargeStatus, PointsReason, charge},
    errors::{Error, Result},
};
use chrono::NaiveDate;
use sea_orm::{QueryOrder, TransactionTrait, prelude::*, sea_query::Expr};
use std::collections::BTreeSet;
use tracing::{debug, info, instrument, warn};

/// Result of one sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LateSweepSummary {
    /// Overdue unpaid charges looked at
    pub charges_examined: usize,
    /// Charges that received a new penalty
    pub charges_penalized: usize,
    /// Total points deducted
    pub points_deducted: i64,
    /// Houses whose members were penalized, ascending
    pub houses_affected: Vec<i64>,
    /// Charges whose penalty could not be applied
    pub failures: usize,
}

/// Cumulative penalty a charge should carry after `days_late` days.
///
/// No penalty within the grace period, 1 point up to a week late, 3 points up to two
/// weeks late, then one more point for every further two days, capped at `max`.
#[must_use]
pub fn penalty_target(days_late: i64, settings: &LatePaymentSettings) -> i32 {
    let target: i64 = if days_late <= settings.grace_period_days {
        0
    } else if days_late <= 7 {
        1
    } else if days_late <= 14 {
        3
    } else {
        3 + (days_late - 14 + 1) / 2
    };
    i32::try_from(target)
        .unwrap_or(i32::MAX)
        .min(settings.max_penalty_per_charge)
}

async fn penalize_charge<C>(
    db: &C,
    charge: &charge::Model,
    target: i32,
    days_late: i64,
    today: NaiveDate,
) -> Result<i32>
where
    C: ConnectionTrait + TransactionTrait,
{
    let deduction = target - charge.late_penalty_points;
    let txn = db.begin().await?;

    let stamped = Charge::update_many()
        .col_expr(charge::Column::LatePenaltyPoints, Expr::value(target))
        .col_expr(charge::Column::LastPenaltyDate, Expr::value(Some(today)))
        .filter(charge::Column::Id.eq(charge.id))
        .filter(charge::Column::Status.eq(ChargeStatus::Unpaid))
        .filter(charge::Column::LatePenaltyPoints.eq(charge.late_penalty_points))
        .exec(&txn)
        .await?;
    if stamped.rows_affected == 0 {
        return Err(Error::ConcurrencyConflict {
            resource: format!("charge {}", charge.id),
        });
    }

    points::apply_points(
        &txn,
        charge.user_id,
        -deduction,
        PointsChange::for_charge(PointsReason::LatePenalty, charge.id)
            .with_note(format!("{days_late} days late")),
    )
    .await?;

    txn.commit().await?;
    Ok(deduction)
}

/// Applies late penalties to every overdue unpaid charge as of `today`.
///
/// Each charge is penalized in its own database transaction; a failure is logged and
/// counted and the sweep moves on.
#[instrument(skip(db, settings))]
pub async fn process_late_charges<C>(
    db: &C,
    settings: &Settings,
    today: NaiveDate,
) -> Result<LateSweepSummary>
where
    C: ConnectionTrait + TransactionTrait,
{
    let overdue = Charge::find()
        .find_also_related(Bill)
        .filter(charge::Column::Status.eq(ChargeStatus::Unpaid))
        .filter(charge::Column::DueDate.lt(today))
        .order_by_asc(charge::Column::Id)
        .all(db)
        .await?;

    let mut summary = LateSweepSummary::default();
    let mut houses = BTreeSet::new();

    for (charge, bill) in overdue {
        summary.charges_examined += 1;

        let days_late = (today - charge.due_date).num_days();
        let target = penalty_target(days_late, &settings.late_payment);
        if target <= charge.late_penalty_points || charge.last_penalty_date == Some(today) {
            continue;
        }

        match penalize_charge(db, &charge, target, days_late, today).await {
            Ok(deduction) => {
                debug!(charge_id = charge.id, days_late, deduction, "Penalized late charge");
                summary.charges_penalized += 1;
                summary.points_deducted += i64::from(deduction);
                if let Some(bill) = bill {
                    houses.insert(bill.house_id);
                }
            }
            Err(e) => {
                warn!(charge_id = charge.id, "Failed to apply late penalty: {e}");
                summary.failures += 1;
            }
        }
    }

    summary.houses_affected = houses.into_iter().collect();
    info!(
        examined = summary.charges_examined,
        penalized = summary.charges_penalized,
        points = summary.points_deducted,
        failures = summary.failures,
        "Late payment sweep finished for {}",
        today
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        core::{bill, points::get_points},
        test_utils::*,
    };
    use rstest::rstest;

    #[rstest]
    #[case(0, 0)]
    #[case(3, 0)]
    #[case(4, 1)]
    #[case(7, 1)]
    #[case(8, 3)]
    #[case(14, 3)]
    #[case(15, 4)]
    #[case(16, 4)]
    #[case(17, 5)]
    #[case(36, 14)]
    #[case(37, 15)]
    #[case(400, 15)]
    fn test_penalty_target(#[case] days_late: i64, #[case] expected: i32) {
        assert_eq!(
            penalty_target(days_late, &LatePaymentSettings::default()),
            expected
        );
    }

    #[tokio::test]
    async fn test_grace_period_has_no_penalty() -> Result<()> {
        let db = setup_test_db().await?;
        let (members, service) = setup_house(&db, 1, &["alice"]).await?;
        issue_test_bill(&db, service.id, 30, date(2026, 3, 1)).await?;

        let summary = process_late_charges(&db, &Settings::default(), date(2026, 3, 4)).await?;
        assert_eq!(summary.charges_examined, 1);
        assert_eq!(summary.charges_penalized, 0);
        assert_eq!(get_points(&db, members[0].id).await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_penalty_applied_once_per_day() -> Result<()> {
        let db = setup_test_db().await?;
        let (members, service) = setup_house(&db, 1, &["alice"]).await?;
        let issued = issue_test_bill(&db, service.id, 30, date(2026, 3, 1)).await?;
        let settings = Settings::default();

        let first = process_late_charges(&db, &settings, date(2026, 3, 5)).await?;
        assert_eq!(first.charges_penalized, 1);
        assert_eq!(first.points_deducted, 1);
        assert_eq!(first.houses_affected, vec![1]);
        assert_eq!(get_points(&db, members[0].id).await?, -1);

        let again = process_late_charges(&db, &settings, date(2026, 3, 5)).await?;
        assert_eq!(again.charges_penalized, 0);
        assert_eq!(get_points(&db, members[0].id).await?, -1);

        let charge = bill::require_charge(&db, issued.charges[0].id).await?;
        assert_eq!(charge.late_penalty_points, 1);
        assert_eq!(charge.last_penalty_date, Some(date(2026, 3, 5)));
        Ok(())
    }

    #[tokio::test]
    async fn test_sweep_catches_up_after_missed_days() -> Result<()> {
        let db = setup_test_db().await?;
        let (members, service) = setup_house(&db, 1, &["alice"]).await?;
        issue_test_bill(&db, service.id, 30, date(2026, 3, 1)).await?;
        let settings = Settings::default();

        process_late_charges(&db, &settings, date(2026, 3, 5)).await?;
        let week_two = process_late_charges(&db, &settings, date(2026, 3, 9)).await?;
        assert_eq!(week_two.points_deducted, 2);
        let later = process_late_charges(&db, &settings, date(2026, 3, 17)).await?;
        assert_eq!(later.points_deducted, 1);

        assert_eq!(get_points(&db, members[0].id).await?, -4);
        let history = points::points_history(&db, members[0].id).await?;
        assert_eq!(history.len(), 3);
        assert!(history.iter().all(|e| e.reason == PointsReason::LatePenalty));
        Ok(())
    }

    #[tokio::test]
    async fn test_paid_charges_are_skipped() -> Result<()> {
        let db = setup_test_db().await?;
        let (members, service) = setup_house(&db, 1, &["alice", "bob"]).await?;
        let issued = issue_test_bill(&db, service.id, 30, date(2026, 3, 1)).await?;
        mark_charge_paid(&db, issued.charges[0].id).await?;

        let summary = process_late_charges(&db, &Settings::default(), date(2026, 3, 10)).await?;
        assert_eq!(summary.charges_examined, 1);
        assert_eq!(get_points(&db, members[0].id).await?, 0);
        assert_eq!(get_points(&db, members[1].id).await?, -3);
        Ok(())
    }
}
