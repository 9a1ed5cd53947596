//! Points ledger - The only writer of `UserFinance.points`.
//!
//! Every change appends a `points_entries` row with the before/after snapshot, so the
//! running total can always be rebuilt from the entries. Corrections are made with a
//! compensating reversal entry rather than by editing history.

use crate::{
    core::finance,
    entities::{PointsEntry, PointsReason, UserFinance, points_entry, user_finance},
    errors::{Error, Result},
};
use chrono::Utc;
use sea_orm::{QueryOrder, Set, TransactionTrait, prelude::*, sea_query::Expr};
use tracing::info;

/// Context recorded alongside a points change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointsChange {
    /// Why the points changed
    pub reason: PointsReason,
    /// Charge that caused the change
    pub charge_id: Option<i64>,
    /// Entry this one compensates
    pub related_entry_id: Option<i64>,
    /// Free-form note
    pub note: Option<String>,
}

impl PointsChange {
    /// A change with only a reason.
    #[must_use]
    pub const fn new(reason: PointsReason) -> Self {
        Self {
            reason,
            charge_id: None,
            related_entry_id: None,
            note: None,
        }
    }

    /// A change caused by a charge.
    #[must_use]
    pub const fn for_charge(reason: PointsReason, charge_id: i64) -> Self {
        Self {
            reason,
            charge_id: Some(charge_id),
            related_entry_id: None,
            note: None,
        }
    }

    /// Attaches a note.
    #[must_use]
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

async fn write_entry<C>(conn: &C, user_id: i64, delta: i32, change: PointsChange) -> Result<points_entry::Model>
where
    C: ConnectionTrait,
{
    let finance = finance::ensure_user_finance(conn, user_id).await?;
    let before = finance.points;
    let after = before
        .checked_add(delta)
        .ok_or_else(|| Error::InvalidTransaction {
            message: format!("points overflow for user {user_id}"),
        })?;

    let result = UserFinance::update_many()
        .col_expr(user_finance::Column::Points, Expr::value(after))
        .col_expr(user_finance::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(user_finance::Column::UserId.eq(user_id))
        .filter(user_finance::Column::Points.eq(before))
        .exec(conn)
        .await?;
    if result.rows_affected == 0 {
        return Err(Error::ConcurrencyConflict {
            resource: format!("points of user {user_id}"),
        });
    }

    let entry = points_entry::ActiveModel {
        user_id: Set(user_id),
        delta: Set(delta),
        points_before: Set(before),
        points_after: Set(after),
        reason: Set(change.reason),
        charge_id: Set(change.charge_id),
        related_entry_id: Set(change.related_entry_id),
        note: Set(change.note),
        created_at: Set(Utc::now()),
        ..Default::default()
    }
    .insert(conn)
    .await?;
    Ok(entry)
}

/// Adds `delta` (which may be negative) to a user's points and records the entry.
///
/// A zero delta is rejected; callers skip the call instead.
pub async fn apply_points<C>(
    db: &C,
    user_id: i64,
    delta: i32,
    change: PointsChange,
) -> Result<points_entry::Model>
where
    C: ConnectionTrait + TransactionTrait,
{
    if delta == 0 {
        return Err(Error::InvalidTransaction {
            message: "points delta cannot be zero".to_string(),
        });
    }

    let txn = db.begin().await?;
    let entry = write_entry(&txn, user_id, delta, change).await?;
    txn.commit().await?;

    info!(
        user_id,
        delta,
        points = entry.points_after,
        reason = ?entry.reason,
        "Applied points change"
    );
    Ok(entry)
}

/// Manual correction of a user's points.
pub async fn adjust_points<C>(db: &C, user_id: i64, delta: i32, note: &str) -> Result<points_entry::Model>
where
    C: ConnectionTrait + TransactionTrait,
{
    apply_points(
        db,
        user_id,
        delta,
        PointsChange::new(PointsReason::AdminAdjustment).with_note(note),
    )
    .await
}

/// Compensates an earlier entry with an entry of the opposite delta.
///
/// # Errors
/// * `NotFound` - no such entry
/// * `LedgerState` - the entry is itself a reversal or was already reversed
pub async fn reverse_entry<C>(db: &C, entry_id: i64, note: &str) -> Result<points_entry::Model>
where
    C: ConnectionTrait + TransactionTrait,
{
    let txn = db.begin().await?;

    let original = PointsEntry::find_by_id(entry_id)
        .one(&txn)
        .await?
        .ok_or_else(|| Error::not_found("points entry", entry_id))?;
    if original.reason == PointsReason::Reversal {
        return Err(Error::LedgerState {
            message: format!("points entry {entry_id} is a reversal"),
        });
    }
    let already = PointsEntry::find()
        .filter(points_entry::Column::RelatedEntryId.eq(entry_id))
        .filter(points_entry::Column::Reason.eq(PointsReason::Reversal))
        .one(&txn)
        .await?;
    if already.is_some() {
        return Err(Error::LedgerState {
            message: format!("points entry {entry_id} was already reversed"),
        });
    }

    let change = PointsChange {
        reason: PointsReason::Reversal,
        charge_id: original.charge_id,
        related_entry_id: Some(original.id),
        note: Some(note.to_string()),
    };
    let entry = write_entry(&txn, original.user_id, -original.delta, change).await?;
    txn.commit().await?;

    info!(entry_id, reversal_id = entry.id, "Reversed points entry");
    Ok(entry)
}

/// Current points of a user (zero when no finance row exists).
pub async fn get_points<C>(db: &C, user_id: i64) -> Result<i32>
where
    C: ConnectionTrait,
{
    Ok(finance::get_user_finance(db, user_id)
        .await?
        .map_or(0, |f| f.points))
}

/// Points entries of a user, newest first.
pub async fn points_history<C>(db: &C, user_id: i64) -> Result<Vec<points_entry::Model>>
where
    C: ConnectionTrait,
{
    PointsEntry::find()
        .filter(points_entry::Column::UserId.eq(user_id))
        .order_by_desc(points_entry::Column::CreatedAt)
        .order_by_desc(points_entry::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;

    #[test]
    fn test_change_for_charge() {
        const LATE: PointsChange = PointsChange::for_charge(PointsReason::LatePenalty, 42);
        assert_eq!(LATE.charge_id, Some(42));
        assert_eq!(LATE.related_entry_id, None);
        assert_eq!(LATE.with_note("5 days late").note.as_deref(), Some("5 days late"));
    }

    #[tokio::test]
    async fn test_points_entries_track_running_total() -> Result<()> {
        let db = setup_test_db().await?;

        let first = apply_points(&db, 1, 2, PointsChange::for_charge(PointsReason::OnTimePayment, 10)).await?;
        assert_eq!((first.points_before, first.points_after), (0, 2));

        let second = apply_points(&db, 1, -3, PointsChange::for_charge(PointsReason::LatePenalty, 11)).await?;
        assert_eq!((second.points_before, second.points_after), (2, -1));
        assert_eq!(get_points(&db, 1).await?, -1);

        let history = points_history(&db, 1).await?;
        assert_eq!(history.len(), 2);
        assert_eq!(history.iter().map(|e| e.delta).sum::<i32>(), -1);
        Ok(())
    }

    #[tokio::test]
    async fn test_zero_delta_rejected() -> Result<()> {
        let db = setup_test_db().await?;
        assert!(adjust_points(&db, 1, 0, "nothing").await.is_err());
        assert_eq!(get_points(&db, 1).await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_reverse_entry_only_once() -> Result<()> {
        let db = setup_test_db().await?;
        let entry = adjust_points(&db, 5, 7, "welcome").await?;

        let reversal = reverse_entry(&db, entry.id, "granted by mistake").await?;
        assert_eq!(reversal.delta, -7);
        assert_eq!(reversal.related_entry_id, Some(entry.id));
        assert_eq!(get_points(&db, 5).await?, 0);

        assert!(matches!(
            reverse_entry(&db, entry.id, "again").await,
            Err(Error::LedgerState { .. })
        ));
        assert!(matches!(
            reverse_entry(&db, reversal.id, "undo the undo").await,
            Err(Error::LedgerState { .. })
        ));
        assert!(matches!(
            reverse_entry(&db, 999, "missing").await,
            Err(Error::NotFound { .. })
        ));
        Ok(())
    }
}
