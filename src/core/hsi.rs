//! House Status Index engine - Risk scoring of houses.
//!
//! The HSI is a 0-100 score blended from the points of the house members with an
//! exponential moving average. It drives the service fee multiplier, the credit
//! multiplier (advance allowance) and a risk assessment that is snapshotted to
//! `house_risk_histories` on every recompute.
//!
//! Multipliers are stored as basis points. With an integer score every formula below
//! lands on a whole number of basis points, so nothing is lost when persisting.

use crate::{
    config::settings::{FeeSettings, HsiSettings, Settings},
    core::{household, money::Money, notification::{self, PushNotifier}},
    entities::{
        Charge, ChargeStatus, FeeCategory, HouseRiskHistory, HouseStatusIndex,
        UserFinance, bill, charge, house_risk_history, house_status_index, user_finance,
    },
    errors::{Error, Result, is_unique_violation},
};
use chrono::Utc;
use dashmap::DashMap;
use rust_decimal::{Decimal, RoundingStrategy, prelude::ToPrimitive};
use sea_orm::{
    DatabaseConnection, JoinType, QueryOrder, QuerySelect, Set, TransactionTrait, prelude::*,
    sea_query::Expr,
};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

/// Score of a house with no history and no members
pub const BASELINE_SCORE: i32 = 50;
/// Notification kind used for HSI warnings
pub const HSI_WARNING_KIND: &str = "hsi_warning";

const MIN_SCORE: i32 = 0;
const MAX_SCORE: i32 = 100;
const BPS: i32 = 10_000;
const MIN_RISK_MULTIPLIER_BPS: i32 = 5_000;
const MAX_RISK_MULTIPLIER_BPS: i32 = 20_000;

fn round_score(value: Decimal) -> i32 {
    value
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .clamp(Decimal::from(MIN_SCORE), Decimal::from(MAX_SCORE))
        .to_i32()
        .unwrap_or(BASELINE_SCORE)
}

/// Score measured from the current points of the members: average points plus 50,
/// clamped to 0-100. A house without members measures the baseline.
#[must_use]
pub fn measured_score(member_points: &[i32]) -> i32 {
    if member_points.is_empty() {
        return BASELINE_SCORE;
    }
    let total: i64 = member_points.iter().map(|&p| i64::from(p)).sum();
    let average = Decimal::from(total) / Decimal::from(member_points.len());
    round_score(average + Decimal::from(BASELINE_SCORE))
}

/// Exponential moving average of the measured and previous scores.
#[must_use]
pub fn smooth_score(measured: i32, previous: i32, alpha: Decimal) -> i32 {
    let blended =
        alpha * Decimal::from(measured) + (Decimal::ONE - alpha) * Decimal::from(previous);
    round_score(blended)
}

/// Bracket (0-10) of a score.
#[must_use]
pub const fn bracket_for(score: i32) -> i32 {
    let bounded = if score < MIN_SCORE {
        MIN_SCORE
    } else if score > MAX_SCORE {
        MAX_SCORE
    } else {
        score
    };
    bounded / 10
}

// fee = 1 + (50 - s) / 250, i.e. 40 bps per point below 50
const fn fee_multiplier_bps(score: i32) -> i32 {
    BPS + (BASELINE_SCORE - score) * 40
}

// credit = s / 50, i.e. 200 bps per point
const fn credit_multiplier_bps(score: i32) -> i32 {
    score * 200
}

/// Service fee multiplier: 1.2 at score 0, 1.0 at 50, 0.8 at 100.
#[must_use]
pub fn fee_multiplier(score: i32) -> Decimal {
    Decimal::new(i64::from(fee_multiplier_bps(score)), 4)
}

/// Credit multiplier: 0 at score 0, 1.0 at 50, 2.0 at 100.
#[must_use]
pub fn credit_multiplier(score: i32) -> Decimal {
    Decimal::new(i64::from(credit_multiplier_bps(score)), 4)
}

/// Risk assessment figures in basis points
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RiskFactors {
    /// `(100 - score) / 100`
    pub current_risk_factor_bps: i32,
    /// `(previous - score) / 100`, positive when the score fell
    pub trend_factor_bps: i32,
    /// `clamp(1 + current / 2 + trend, 0.5, 2)`
    pub risk_multiplier_bps: i32,
}

impl RiskFactors {
    /// Risk multiplier as a decimal
    #[must_use]
    pub fn risk_multiplier(&self) -> Decimal {
        Decimal::new(i64::from(self.risk_multiplier_bps), 4)
    }
}

/// Risk factors for a score change.
#[must_use]
pub const fn risk_factors(previous: i32, score: i32) -> RiskFactors {
    let current_risk_factor_bps = (MAX_SCORE - score) * 100;
    let trend_factor_bps = (previous - score) * 100;
    let raw = BPS + current_risk_factor_bps / 2 + trend_factor_bps;
    let risk_multiplier_bps = if raw < MIN_RISK_MULTIPLIER_BPS {
        MIN_RISK_MULTIPLIER_BPS
    } else if raw > MAX_RISK_MULTIPLIER_BPS {
        MAX_RISK_MULTIPLIER_BPS
    } else {
        raw
    };
    RiskFactors {
        current_risk_factor_bps,
        trend_factor_bps,
        risk_multiplier_bps,
    }
}

/// Lower boundary of the bracket a score sits in; falling below it drops the bracket.
#[must_use]
pub const fn warning_boundary(score: i32) -> i32 {
    bracket_for(score) * 10
}

/// Whether members should be warned: the house fell into a lower bracket, or it sits
/// within `threshold` points of the next lower bracket.
#[must_use]
pub fn warning_for(previous: Option<i32>, score: i32, threshold: i32) -> bool {
    let bracket = bracket_for(score);
    let dropped = previous.is_some_and(|p| bracket < bracket_for(p));
    let near_boundary = bracket > 0 && score - 10 * bracket <= threshold;
    dropped || near_boundary
}

/// Service fee for one charge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceFee {
    /// Base fee of the category
    pub base: Money,
    /// HSI fee multiplier applied
    pub multiplier: Decimal,
    /// `base × multiplier`, rounded to cents
    pub fee: Money,
}

/// Result of one recompute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HsiUpdate {
    /// Stored index after the recompute
    pub index: house_status_index::Model,
    /// Snapshot appended for this recompute
    pub history: house_risk_history::Model,
    /// Whether a warning was sent to the members
    pub warning_sent: bool,
}

/// Result of [`HsiEngine::recompute_all`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecomputeSummary {
    /// Houses considered
    pub houses: usize,
    /// Houses recomputed successfully
    pub updated: usize,
    /// Houses whose recompute failed
    pub failures: usize,
}

/// Stored HSI of a house, if it was ever computed.
pub async fn get_house_hsi<C>(db: &C, house_id: i64) -> Result<Option<house_status_index::Model>>
where
    C: ConnectionTrait,
{
    HouseStatusIndex::find()
        .filter(house_status_index::Column::HouseId.eq(house_id))
        .one(db)
        .await
        .map_err(Into::into)
}

/// Service fee for a charge of a house in a category. Houses without an HSI pay the
/// base fee.
pub async fn service_fee_for<C>(
    db: &C,
    fees: &FeeSettings,
    house_id: i64,
    category: FeeCategory,
) -> Result<ServiceFee>
where
    C: ConnectionTrait,
{
    let base = fees.base_fee(category);
    let multiplier = get_house_hsi(db, house_id)
        .await?
        .map_or(Decimal::ONE, |hsi| hsi.fee_multiplier());
    let fee = base.mul_decimal(multiplier)?;
    Ok(ServiceFee {
        base,
        multiplier,
        fee,
    })
}

/// Count and total of the unpaid charges of a house.
pub async fn unpaid_charge_stats<C>(db: &C, house_id: i64) -> Result<(i32, Money)>
where
    C: ConnectionTrait,
{
    let amounts: Vec<i64> = Charge::find()
        .select_only()
        .column(charge::Column::AmountCents)
        .join(JoinType::InnerJoin, charge::Relation::Bill.def())
        .filter(bill::Column::HouseId.eq(house_id))
        .filter(charge::Column::Status.eq(ChargeStatus::Unpaid))
        .into_tuple()
        .all(db)
        .await?;
    let count = i32::try_from(amounts.len())?;
    let total = amounts.into_iter().map(Money::from_cents).sum();
    Ok((count, total))
}

async fn member_points<C>(db: &C, member_ids: &[i64]) -> Result<Vec<i32>>
where
    C: ConnectionTrait,
{
    if member_ids.is_empty() {
        return Ok(Vec::new());
    }
    let rows = UserFinance::find()
        .filter(user_finance::Column::UserId.is_in(member_ids.iter().copied()))
        .all(db)
        .await?;
    // Members without a finance row have never earned or lost points
    Ok(member_ids
        .iter()
        .map(|id| {
            rows.iter()
                .find(|row| row.user_id == *id)
                .map_or(0, |row| row.points)
        })
        .collect())
}

/// Computes house scores and keeps `house_status_indexes` current.
///
/// Recomputes of the same house are serialized in-process; writes from other processes
/// are detected through the row version.
pub struct HsiEngine<N> {
    db: DatabaseConnection,
    hsi: HsiSettings,
    fees: FeeSettings,
    notifier: N,
    locks: DashMap<i64, Arc<Mutex<()>>>,
}

impl<N> HsiEngine<N>
where
    N: PushNotifier,
{
    /// Creates an engine over a connection.
    pub fn new(db: DatabaseConnection, settings: &Settings, notifier: N) -> Self {
        Self {
            db,
            hsi: settings.hsi.clone(),
            fees: settings.fees.clone(),
            notifier,
            locks: DashMap::new(),
        }
    }

    /// The connection the engine works on
    pub const fn db(&self) -> &DatabaseConnection {
        &self.db
    }

    fn lock_for(&self, house_id: i64) -> Arc<Mutex<()>> {
        Arc::clone(self.locks.entry(house_id).or_default().value())
    }

    /// Recomputes the HSI of a house from the current points of its members.
    ///
    /// # Errors
    /// * `ConcurrencyConflict` - another process updated the index concurrently
    /// * `Database` - the write failed; nothing was stored
    #[instrument(skip(self))]
    pub async fn update_house_hsi(&self, house_id: i64) -> Result<HsiUpdate> {
        let lock = self.lock_for(house_id);
        let _guard = lock.lock().await;

        let txn = self.db.begin().await?;

        let members = household::get_house_members(&txn, house_id).await?;
        let member_ids: Vec<i64> = members.iter().map(|m| m.id).collect();
        let points = member_points(&txn, &member_ids).await?;

        let existing = get_house_hsi(&txn, house_id).await?;
        let measured = measured_score(&points);
        let previous_score = existing.as_ref().map(|hsi| hsi.score);
        let previous = previous_score.unwrap_or(measured);
        let score = smooth_score(measured, previous, self.hsi.alpha);
        let bracket = bracket_for(score);
        let risk = risk_factors(previous, score);
        let (unpaid_count, unpaid_amount) = unpaid_charge_stats(&txn, house_id).await?;
        let now = Utc::now();

        debug!(
            house_id,
            measured, previous, score, bracket, "Computed house status index"
        );

        match &existing {
            Some(current) => {
                let result = HouseStatusIndex::update_many()
                    .col_expr(house_status_index::Column::Score, Expr::value(score))
                    .col_expr(house_status_index::Column::Bracket, Expr::value(bracket))
                    .col_expr(
                        house_status_index::Column::FeeMultiplierBps,
                        Expr::value(fee_multiplier_bps(score)),
                    )
                    .col_expr(
                        house_status_index::Column::CreditMultiplierBps,
                        Expr::value(credit_multiplier_bps(score)),
                    )
                    .col_expr(
                        house_status_index::Column::CurrentRiskFactorBps,
                        Expr::value(risk.current_risk_factor_bps),
                    )
                    .col_expr(
                        house_status_index::Column::TrendFactorBps,
                        Expr::value(risk.trend_factor_bps),
                    )
                    .col_expr(
                        house_status_index::Column::RiskMultiplierBps,
                        Expr::value(risk.risk_multiplier_bps),
                    )
                    .col_expr(
                        house_status_index::Column::UnpaidChargesCount,
                        Expr::value(unpaid_count),
                    )
                    .col_expr(
                        house_status_index::Column::UnpaidAmountCents,
                        Expr::value(unpaid_amount.cents()),
                    )
                    .col_expr(
                        house_status_index::Column::LastRiskAssessment,
                        Expr::value(Some(now)),
                    )
                    .col_expr(
                        house_status_index::Column::Version,
                        Expr::value(current.version + 1),
                    )
                    .col_expr(house_status_index::Column::UpdatedAt, Expr::value(now))
                    .filter(house_status_index::Column::HouseId.eq(house_id))
                    .filter(house_status_index::Column::Version.eq(current.version))
                    .exec(&txn)
                    .await?;
                if result.rows_affected == 0 {
                    return Err(Error::ConcurrencyConflict {
                        resource: format!("house status index of house {house_id}"),
                    });
                }
            }
            None => {
                let inserted = house_status_index::ActiveModel {
                    house_id: Set(house_id),
                    score: Set(score),
                    bracket: Set(bracket),
                    fee_multiplier_bps: Set(fee_multiplier_bps(score)),
                    credit_multiplier_bps: Set(credit_multiplier_bps(score)),
                    current_risk_factor_bps: Set(risk.current_risk_factor_bps),
                    trend_factor_bps: Set(risk.trend_factor_bps),
                    risk_multiplier_bps: Set(risk.risk_multiplier_bps),
                    unpaid_charges_count: Set(unpaid_count),
                    unpaid_amount_cents: Set(unpaid_amount.cents()),
                    last_risk_assessment: Set(Some(now)),
                    version: Set(1),
                    updated_at: Set(now),
                    ..Default::default()
                }
                .insert(&txn)
                .await;
                match inserted {
                    Ok(_) => {}
                    Err(e) if is_unique_violation(&e) => {
                        return Err(Error::ConcurrencyConflict {
                            resource: format!("house status index of house {house_id}"),
                        });
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }

        let history = house_risk_history::ActiveModel {
            house_id: Set(house_id),
            measured_score: Set(measured),
            previous_score: Set(previous_score),
            score: Set(score),
            bracket: Set(bracket),
            current_risk_factor_bps: Set(risk.current_risk_factor_bps),
            trend_factor_bps: Set(risk.trend_factor_bps),
            risk_multiplier_bps: Set(risk.risk_multiplier_bps),
            unpaid_charges_count: Set(unpaid_count),
            unpaid_amount_cents: Set(unpaid_amount.cents()),
            created_at: Set(now),
            ..Default::default()
        }
        .insert(&txn)
        .await?;

        txn.commit().await?;

        let index = get_house_hsi(&self.db, house_id)
            .await?
            .ok_or_else(|| Error::not_found("house status index", house_id))?;

        info!(
            house_id,
            score,
            bracket,
            version = index.version,
            "Updated house status index"
        );

        let warning_sent = if warning_for(previous_score, score, self.hsi.warning_threshold) {
            let body = format!(
                "Your house status index is now {score} (bracket {bracket}), close to the \
                 boundary of {}. Paying charges on time raises it and lowers service fees.",
                warning_boundary(score)
            );
            let delivered = notification::notify_users(
                &self.db,
                &self.notifier,
                &member_ids,
                HSI_WARNING_KIND,
                "House status warning",
                &body,
            )
            .await;
            debug!(house_id, delivered, "Sent HSI warnings");
            true
        } else {
            false
        };

        Ok(HsiUpdate {
            index,
            history,
            warning_sent,
        })
    }

    /// Stored HSI of a house.
    pub async fn get_house_hsi(&self, house_id: i64) -> Result<Option<house_status_index::Model>> {
        get_house_hsi(&self.db, house_id).await
    }

    /// Service fee for a charge of a house in a category.
    pub async fn get_service_fee(&self, house_id: i64, category: FeeCategory) -> Result<ServiceFee> {
        service_fee_for(&self.db, &self.fees, house_id, category).await
    }

    /// Most recent risk snapshots of a house, newest first.
    pub async fn risk_history(
        &self,
        house_id: i64,
        limit: u64,
    ) -> Result<Vec<house_risk_history::Model>> {
        HouseRiskHistory::find()
            .filter(house_risk_history::Column::HouseId.eq(house_id))
            .order_by_desc(house_risk_history::Column::CreatedAt)
            .order_by_desc(house_risk_history::Column::Id)
            .limit(limit)
            .all(&self.db)
            .await
            .map_err(Into::into)
    }

    /// Recomputes every house that has members. A failing house is logged and counted;
    /// the others still run.
    pub async fn recompute_all(&self) -> Result<RecomputeSummary> {
        let houses = household::houses_with_members(&self.db).await?;
        let mut summary = RecomputeSummary {
            houses: houses.len(),
            ..Default::default()
        };

        for house_id in houses {
            match self.update_house_hsi(house_id).await {
                Ok(_) => summary.updated += 1,
                Err(e) => {
                    warn!(house_id, "HSI recompute failed: {e}");
                    summary.failures += 1;
                }
            }
        }

        info!(
            houses = summary.houses,
            updated = summary.updated,
            failures = summary.failures,
            "Recomputed house status indexes"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::core::points;
    use crate::test_utils::*;
    use rstest::rstest;
    use rust_decimal_macros::dec;

    #[rstest]
    #[case(&[], 50)]
    #[case(&[0, 0], 50)]
    #[case(&[-20, -20], 30)]
    #[case(&[60], 100)]
    #[case(&[-70, -80], 0)]
    #[case(&[1, 2], 52)]
    #[case(&[-1, -2], 49)]
    fn test_measured_score(#[case] points: &[i32], #[case] expected: i32) {
        assert_eq!(measured_score(points), expected);
    }

    #[rstest]
    #[case(30, 50, dec!(0.2), 46)]
    #[case(100, 0, dec!(0.3), 30)]
    #[case(51, 50, dec!(0.2), 50)]
    #[case(53, 50, dec!(0.3), 51)]
    #[case(0, 0, dec!(0.1), 0)]
    fn test_smooth_score(
        #[case] measured: i32,
        #[case] previous: i32,
        #[case] alpha: Decimal,
        #[case] expected: i32,
    ) {
        assert_eq!(smooth_score(measured, previous, alpha), expected);
    }

    #[rstest]
    #[case(0, 0, dec!(1.2), dec!(0))]
    #[case(9, 0, dec!(1.164), dec!(0.18))]
    #[case(46, 4, dec!(1.016), dec!(0.92))]
    #[case(50, 5, dec!(1), dec!(1))]
    #[case(100, 10, dec!(0.8), dec!(2))]
    fn test_bracket_and_multipliers(
        #[case] score: i32,
        #[case] bracket: i32,
        #[case] fee: Decimal,
        #[case] credit: Decimal,
    ) {
        assert_eq!(bracket_for(score), bracket);
        assert_eq!(fee_multiplier(score), fee);
        assert_eq!(credit_multiplier(score), credit);
    }

    #[rstest]
    #[case(-5, 0, 0)]
    #[case(0, 0, 0)]
    #[case(9, 0, 0)]
    #[case(46, 4, 40)]
    #[case(99, 9, 90)]
    #[case(100, 10, 100)]
    #[case(140, 10, 100)]
    fn test_bracket_and_boundary(#[case] score: i32, #[case] bracket: i32, #[case] boundary: i32) {
        assert_eq!(bracket_for(score), bracket);
        assert_eq!(warning_boundary(score), boundary);
    }

    #[rstest]
    #[case(50, 46, 5400, 400, 13_100)]
    #[case(100, 0, 10_000, 10_000, 20_000)]
    #[case(0, 100, 0, -10_000, 5_000)]
    #[case(50, 50, 5000, 0, 12_500)]
    fn test_risk_factors(
        #[case] previous: i32,
        #[case] score: i32,
        #[case] current: i32,
        #[case] trend: i32,
        #[case] multiplier: i32,
    ) {
        let risk = risk_factors(previous, score);
        assert_eq!(risk.current_risk_factor_bps, current);
        assert_eq!(risk.trend_factor_bps, trend);
        assert_eq!(risk.risk_multiplier_bps, multiplier);
    }

    #[rstest]
    #[case(Some(50), 46, true)]
    #[case(Some(46), 45, false)]
    #[case(Some(45), 42, true)]
    #[case(Some(12), 9, true)]
    #[case(None, 5, false)]
    #[case(None, 50, true)]
    #[case(Some(60), 75, false)]
    fn test_warning_for(#[case] previous: Option<i32>, #[case] score: i32, #[case] expected: bool) {
        assert_eq!(warning_for(previous, score, 2), expected);
    }

    #[tokio::test]
    async fn test_cold_start_uses_measured_score() -> Result<()> {
        let db = setup_test_db().await?;
        create_test_member(&db, "alice", 1).await?;
        create_test_member(&db, "bob", 1).await?;
        let engine = test_engine(&db);

        let update = engine.update_house_hsi(1).await?;
        assert_eq!(update.index.score, 50);
        assert_eq!(update.index.bracket, 5);
        assert_eq!(update.index.version, 1);
        assert_eq!(update.index.fee_multiplier(), Decimal::ONE);
        assert_eq!(update.history.previous_score, None);
        assert_eq!(update.history.measured_score, 50);
        Ok(())
    }

    #[tokio::test]
    async fn test_house_without_members_measures_baseline() -> Result<()> {
        let db = setup_test_db().await?;
        let engine = test_engine(&db);

        let update = engine.update_house_hsi(77).await?;
        assert_eq!(update.index.score, BASELINE_SCORE);
        Ok(())
    }

    #[tokio::test]
    async fn test_score_drop_blends_and_warns_members() -> Result<()> {
        let db = setup_test_db().await?;
        let alice = create_test_member(&db, "alice", 1).await?;
        let bob = create_test_member(&db, "bob", 1).await?;
        let notifier = RecordingNotifier::default();
        let engine = HsiEngine::new(db.clone(), &Settings::default(), notifier.clone());

        engine.update_house_hsi(1).await?;
        let sent_before = notifier.sent().len();
        points::adjust_points(&db, alice.id, -20, "late").await?;
        points::adjust_points(&db, bob.id, -20, "late").await?;

        let update = engine.update_house_hsi(1).await?;
        assert_eq!(update.history.measured_score, 30);
        assert_eq!(update.history.previous_score, Some(50));
        assert_eq!(update.index.score, 46);
        assert_eq!(update.index.bracket, 4);
        assert_eq!(update.index.version, 2);
        assert_eq!(update.index.risk_multiplier(), dec!(1.31));
        assert!(update.warning_sent);

        let sent = notifier.sent();
        assert_eq!(sent.len() - sent_before, 2);
        assert!(sent[sent_before..]
            .iter()
            .all(|m| m.body.contains("now 46") && m.body.contains("boundary of 40")));
        let stored = notification::get_notifications(&db, alice.id).await?;
        assert_eq!(stored[0].kind, HSI_WARNING_KIND);
        assert!(stored[0].message.contains("boundary of 40"));

        let history = engine.risk_history(1, 10).await?;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].score, 46);
        Ok(())
    }

    #[tokio::test]
    async fn test_concurrent_updates_are_serialized() -> Result<()> {
        let db = setup_test_db().await?;
        create_test_member(&db, "alice", 1).await?;
        let engine = test_engine(&db);

        let (a, b) = tokio::join!(engine.update_house_hsi(1), engine.update_house_hsi(1));
        a?;
        b?;
        let index = engine.get_house_hsi(1).await?.unwrap();
        assert_eq!(index.version, 2);
        assert_eq!(engine.risk_history(1, 10).await?.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_separate_engines_read_and_write_in_one_transaction() -> Result<()> {
        let db = setup_test_db().await?;
        create_test_member(&db, "alice", 1).await?;
        let first = test_engine(&db);
        let second = test_engine(&db);

        let (a, b) = tokio::join!(first.update_house_hsi(1), second.update_house_hsi(1));
        let mut previous = vec![a?.history.previous_score, b?.history.previous_score];
        previous.sort_unstable();
        assert_eq!(previous, vec![None, Some(50)]);
        assert_eq!(first.get_house_hsi(1).await?.map(|i| i.version), Some(2));
        assert_eq!(first.risk_history(1, 10).await?.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_service_fee_follows_multiplier() -> Result<()> {
        let db = setup_test_db().await?;
        let alice = create_test_member(&db, "alice", 1).await?;
        let engine = test_engine(&db);

        let fee = engine.get_service_fee(1, FeeCategory::Utility).await?;
        assert_eq!(fee.multiplier, Decimal::ONE);
        assert_eq!(fee.fee, Money::from_cents(200));

        engine.update_house_hsi(1).await?;
        points::adjust_points(&db, alice.id, -20, "late").await?;
        engine.update_house_hsi(1).await?;

        let fee = engine.get_service_fee(1, FeeCategory::Utility).await?;
        assert_eq!(fee.multiplier, dec!(1.016));
        assert_eq!(fee.fee, Money::from_cents(203));
        let fee = engine.get_service_fee(1, FeeCategory::Marketplace).await?;
        assert_eq!(fee.fee, Money::from_cents(305));
        Ok(())
    }

    #[tokio::test]
    async fn test_recompute_all_covers_every_house() -> Result<()> {
        let db = setup_test_db().await?;
        create_test_member(&db, "alice", 1).await?;
        create_test_member(&db, "bob", 2).await?;
        create_test_member(&db, "carol", 2).await?;
        let engine = test_engine(&db);

        let summary = engine.recompute_all().await?;
        assert_eq!(
            summary,
            RecomputeSummary {
                houses: 2,
                updated: 2,
                failures: 0
            }
        );
        assert!(engine.get_house_hsi(2).await?.is_some());
        Ok(())
    }
}
