//! Payments - Idempotent batch payment of charges through an external processor.
//!
//! A payment is keyed by a client-supplied idempotency key that is unique in the
//! `payments` table. Resubmitting the same request under the same key returns the
//! stored payment without charging again; a failed payment may be retried under the
//! same key a limited number of times.
//!
//! Once the processor confirms, [`settle_payment`] applies every consequence of the
//! payment in one database transaction, so a batch is either fully settled or not at all.

use crate::{
    config::settings::Settings,
    core::{
        advance, bill,
        finance::{self, TransactionLinks, TransactionParams},
        ledger::{self, Contribution},
        money::Money,
        points::{self, PointsChange},
    },
    entities::{
        Charge, ChargeStatus, Payment, PaymentStatus, PointsReason, Transaction,
        TransactionStatus, TransactionType, charge, payment, transaction,
    },
    errors::{Error, Result, is_unique_violation},
};
use chrono::{NaiveDate, Utc};
use sea_orm::{
    DatabaseConnection, QueryOrder, Set, TransactionTrait, prelude::*, sea_query::Expr,
};
use std::collections::BTreeSet;
use std::future::Future;
use tracing::{info, instrument, warn};

/// Request sent to the payment processor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChargeRequest {
    /// Passed through so the processor never charges twice for one key
    pub idempotency_key: String,
    /// Paying user
    pub user_id: i64,
    /// Total to collect
    pub amount: Money,
    /// Statement description
    pub description: String,
}

/// Processor verdict on a charge request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessorResponse {
    /// Money was collected
    Succeeded {
        /// Processor-side payment id
        external_id: String,
    },
    /// The card or account was declined
    Declined {
        /// Reason reported by the processor
        reason: String,
    },
    /// The user has to complete an extra step; the outcome arrives later
    RequiresAction {
        /// Processor-side payment id
        external_id: String,
    },
}

/// External card/bank processor
pub trait PaymentProcessor: Send + Sync {
    /// Attempts to collect `request.amount` from the user.
    fn charge(
        &self,
        request: &ChargeRequest,
    ) -> impl Future<Output = Result<ProcessorResponse>> + Send;
}

/// A request to pay a set of charges
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentRequest {
    /// Paying user, owner of every charge
    pub user_id: i64,
    /// Charges to pay
    pub charge_ids: Vec<i64>,
    /// Client-supplied key identifying this payment
    pub idempotency_key: String,
}

/// Result of [`PaymentService::pay_charges`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentOutcome {
    /// Stored payment
    pub payment: payment::Model,
    /// True when an earlier payment under the same key was returned unchanged
    pub replayed: bool,
}

/// Sorted, de-duplicated charge ids
fn canonical_charge_ids(ids: &[i64]) -> Vec<i64> {
    ids.iter().copied().collect::<BTreeSet<_>>().into_iter().collect()
}

fn stored_charge_ids(payment: &payment::Model) -> Result<Vec<i64>> {
    Ok(serde_json::from_str(&payment.charge_ids)?)
}

/// Loads the charges of a payment request and checks they can be paid by the user.
async fn payable_charges<C>(db: &C, user_id: i64, charge_ids: &[i64]) -> Result<Vec<charge::Model>>
where
    C: ConnectionTrait,
{
    let charges = Charge::find()
        .filter(charge::Column::Id.is_in(charge_ids.iter().copied()))
        .order_by_asc(charge::Column::Id)
        .all(db)
        .await?;

    if let Some(missing) = charge_ids
        .iter()
        .find(|id| !charges.iter().any(|c| c.id == **id))
    {
        return Err(Error::not_found("charge", missing));
    }
    for charge in &charges {
        if charge.user_id != user_id {
            return Err(Error::InvalidTransaction {
                message: format!("charge {} does not belong to user {user_id}", charge.id),
            });
        }
        if charge.status != ChargeStatus::Unpaid {
            return Err(Error::LedgerState {
                message: format!("charge {} is already paid", charge.id),
            });
        }
    }
    Ok(charges)
}

/// Applies a processor-confirmed payment: charges paid, on-time bonuses, the user to
/// house money movement, advance repayments, funding contributions, bill statuses and
/// the payment status, all in one database transaction.
///
/// Also used to complete a payment that was left `processing` by a requires-action
/// response once the processor confirms it.
///
/// # Errors
/// * `LedgerState` - the payment is not `processing` or a charge was paid meanwhile
/// * `InsufficientConfiguration` - a service has no funding cycle to contribute to
#[instrument(skip(db))]
pub async fn settle_payment<C>(
    db: &C,
    payment_id: i64,
    external_payment_id: Option<String>,
    today: NaiveDate,
) -> Result<payment::Model>
where
    C: ConnectionTrait + TransactionTrait,
{
    let txn = db.begin().await?;

    let pending = Payment::find_by_id(payment_id)
        .one(&txn)
        .await?
        .ok_or_else(|| Error::not_found("payment", payment_id))?;
    if pending.status != PaymentStatus::Processing {
        return Err(Error::LedgerState {
            message: format!("payment {payment_id} is {:?}", pending.status),
        });
    }
    let charge_ids = stored_charge_ids(&pending)?;
    let charges = payable_charges(&txn, pending.user_id, &charge_ids).await?;
    let total: Money = charges.iter().map(|c| Money::from_cents(c.amount_cents)).sum();
    let external_payment_id = external_payment_id.or_else(|| pending.external_payment_id.clone());
    let now = Utc::now();

    for charge in &charges {
        let marked = Charge::update_many()
            .col_expr(charge::Column::Status, Expr::value(ChargeStatus::Paid))
            .col_expr(charge::Column::PaidAt, Expr::value(Some(now)))
            .col_expr(charge::Column::PaymentId, Expr::value(Some(payment_id)))
            .filter(charge::Column::Id.eq(charge.id))
            .filter(charge::Column::Status.eq(ChargeStatus::Unpaid))
            .exec(&txn)
            .await?;
        if marked.rows_affected == 0 {
            return Err(Error::ConcurrencyConflict {
                resource: format!("charge {}", charge.id),
            });
        }

        if today <= charge.due_date && charge.points_potential > 0 {
            points::apply_points(
                &txn,
                charge.user_id,
                charge.points_potential,
                PointsChange::for_charge(PointsReason::OnTimePayment, charge.id),
            )
            .await?;
        }
    }

    let metadata = serde_json::json!({
        "charge_ids": charge_ids,
        "external_payment_id": external_payment_id,
    });
    finance::process_user_payment(
        &txn,
        pending.user_id,
        total,
        &format!("Payment of {} charge(s)", charges.len()),
        Some(payment_id),
        Some(metadata),
    )
    .await?;

    let mut bill_ids = BTreeSet::new();
    for charge in &charges {
        let parent = bill::require_bill(&txn, charge.bill_id).await?;
        bill_ids.insert(parent.id);

        if charge.advanced {
            let outstanding = advance::outstanding_advance_for_charge(&txn, charge.id).await?;
            if outstanding.is_positive() {
                let advance_row = Transaction::find()
                    .filter(transaction::Column::ChargeId.eq(charge.id))
                    .filter(transaction::Column::TransactionType.eq(TransactionType::Advance))
                    .filter(transaction::Column::Status.eq(TransactionStatus::Completed))
                    .one(&txn)
                    .await?;
                finance::apply_transaction(
                    &txn,
                    TransactionParams::for_house(
                        parent.house_id,
                        TransactionType::AdvanceRepayment,
                        outstanding,
                        format!("Advance repaid for {}", charge.name),
                    )
                    .with_links(TransactionLinks {
                        bill_id: Some(parent.id),
                        charge_id: Some(charge.id),
                        payment_id: Some(payment_id),
                        related_transaction_id: advance_row.map(|row| row.id),
                        external_reference_id: external_payment_id.clone(),
                    }),
                )
                .await?;
            }
        }

        ledger::add_contribution(
            &txn,
            parent.house_service_id,
            Contribution {
                user_id: charge.user_id,
                amount: Money::from_cents(charge.amount_cents),
                charge_id: Some(charge.id),
            },
        )
        .await?;
    }

    for bill_id in bill_ids {
        bill::update_bill_status(&txn, bill_id).await?;
    }

    let mut completed: payment::ActiveModel = pending.into();
    completed.status = Set(PaymentStatus::Completed);
    completed.external_payment_id = Set(external_payment_id);
    completed.failure_reason = Set(None);
    completed.updated_at = Set(now);
    let completed = completed.update(&txn).await?;

    txn.commit().await?;

    info!(
        payment_id,
        user_id = completed.user_id,
        "Settled payment of {}",
        total
    );
    Ok(completed)
}

/// Submits payments to the processor and settles them.
pub struct PaymentService<P> {
    db: DatabaseConnection,
    processor: P,
    settings: Settings,
}

impl<P> PaymentService<P>
where
    P: PaymentProcessor,
{
    /// Creates a service over a connection and a processor.
    pub const fn new(db: DatabaseConnection, settings: Settings, processor: P) -> Self {
        Self {
            db,
            processor,
            settings,
        }
    }

    /// Payment stored under an idempotency key.
    pub async fn get_payment(&self, idempotency_key: &str) -> Result<Option<payment::Model>> {
        Payment::find()
            .filter(payment::Column::IdempotencyKey.eq(idempotency_key))
            .one(&self.db)
            .await
            .map_err(Into::into)
    }

    /// Pays a set of charges, using today's date for the on-time bonus.
    pub async fn pay_charges(&self, request: PaymentRequest) -> Result<PaymentOutcome> {
        self.pay_charges_on(request, Utc::now().date_naive()).await
    }

    /// Pays a set of charges as of `today`.
    ///
    /// # Errors
    /// * `DuplicatePaymentAttempt` - the key was used for a different request
    /// * `ExternalPaymentFailure` - the processor declined or timed out, or the key has
    ///   no attempts left
    /// * `InvalidTransaction`, `LedgerState`, `NotFound` - a charge cannot be paid
    #[instrument(skip(self, request), fields(user_id = request.user_id, key = %request.idempotency_key))]
    pub async fn pay_charges_on(
        &self,
        request: PaymentRequest,
        today: NaiveDate,
    ) -> Result<PaymentOutcome> {
        if request.idempotency_key.trim().is_empty() {
            return Err(Error::InvalidTransaction {
                message: "an idempotency key is required".to_string(),
            });
        }
        let charge_ids = canonical_charge_ids(&request.charge_ids);
        if charge_ids.is_empty() {
            return Err(Error::InvalidTransaction {
                message: "a payment needs at least one charge".to_string(),
            });
        }

        let payment = match self.get_payment(&request.idempotency_key).await? {
            Some(existing) => match self.check_existing(existing, &request, &charge_ids)? {
                Existing::Replay(payment) => {
                    info!(payment_id = payment.id, "Replaying payment");
                    return Ok(PaymentOutcome {
                        payment,
                        replayed: true,
                    });
                }
                Existing::Retry(failed) => {
                    let claimed = match payable_charges(&self.db, request.user_id, &charge_ids).await
                    {
                        Ok(_) => self.claim_retry(&failed).await?,
                        Err(e) => match self.get_payment(&request.idempotency_key).await? {
                            Some(current) if current.status != PaymentStatus::Failed => None,
                            _ => return Err(e),
                        },
                    };
                    match claimed {
                        Some(claimed) => claimed,
                        None => {
                            let current = self
                                .get_payment(&request.idempotency_key)
                                .await?
                                .ok_or_else(|| Error::not_found("payment", failed.id))?;
                            info!(payment_id = current.id, "Retry already claimed, replaying payment");
                            return Ok(PaymentOutcome {
                                payment: current,
                                replayed: true,
                            });
                        }
                    }
                }
            },
            None => match self.create_payment(&request, &charge_ids).await? {
                Ok(created) => created,
                Err(raced) => {
                    return match self.check_existing(raced, &request, &charge_ids)? {
                        Existing::Replay(payment) | Existing::Retry(payment) => {
                            Ok(PaymentOutcome {
                                payment,
                                replayed: true,
                            })
                        }
                    };
                }
            },
        };

        self.attempt(payment, today).await
    }

    fn check_existing(
        &self,
        existing: payment::Model,
        request: &PaymentRequest,
        charge_ids: &[i64],
    ) -> Result<Existing> {
        if existing.user_id != request.user_id || stored_charge_ids(&existing)? != charge_ids {
            return Err(Error::DuplicatePaymentAttempt {
                idempotency_key: request.idempotency_key.clone(),
                payment_id: existing.id,
            });
        }
        match existing.status {
            PaymentStatus::Completed | PaymentStatus::Processing => Ok(Existing::Replay(existing)),
            PaymentStatus::Failed if existing.retry_count >= self.settings.payments.max_attempts => {
                Err(Error::ExternalPaymentFailure {
                    reason: existing
                        .failure_reason
                        .unwrap_or_else(|| "payment failed".to_string()),
                    attempts: existing.retry_count,
                })
            }
            PaymentStatus::Failed => Ok(Existing::Retry(existing)),
        }
    }

    /// Moves a failed payment back to `processing`. `None` when another request under
    /// the same key claimed the retry first.
    async fn claim_retry(&self, failed: &payment::Model) -> Result<Option<payment::Model>> {
        let claimed = Payment::update_many()
            .col_expr(payment::Column::Status, Expr::value(PaymentStatus::Processing))
            .col_expr(payment::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(payment::Column::Id.eq(failed.id))
            .filter(payment::Column::Status.eq(PaymentStatus::Failed))
            .filter(payment::Column::RetryCount.eq(failed.retry_count))
            .exec(&self.db)
            .await?;
        if claimed.rows_affected == 0 {
            return Ok(None);
        }
        Ok(Payment::find_by_id(failed.id).one(&self.db).await?)
    }

    /// Inserts the payment row. `Ok(Err(existing))` when another request inserted the
    /// same key first.
    async fn create_payment(
        &self,
        request: &PaymentRequest,
        charge_ids: &[i64],
    ) -> Result<std::result::Result<payment::Model, payment::Model>> {
        let charges = payable_charges(&self.db, request.user_id, charge_ids).await?;
        let total: Money = charges.iter().map(|c| Money::from_cents(c.amount_cents)).sum();
        let total = total.ensure_positive()?;

        let now = Utc::now();
        let inserted = payment::ActiveModel {
            user_id: Set(request.user_id),
            idempotency_key: Set(request.idempotency_key.clone()),
            amount_cents: Set(total.cents()),
            charge_ids: Set(serde_json::to_string(charge_ids)?),
            status: Set(PaymentStatus::Processing),
            retry_count: Set(0),
            external_payment_id: Set(None),
            failure_reason: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(&self.db)
        .await;

        match inserted {
            Ok(created) => Ok(Ok(created)),
            Err(e) if is_unique_violation(&e) => {
                let existing = self
                    .get_payment(&request.idempotency_key)
                    .await?
                    .ok_or_else(|| Error::not_found("payment", &request.idempotency_key))?;
                Ok(Err(existing))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn attempt(&self, payment: payment::Model, today: NaiveDate) -> Result<PaymentOutcome> {
        let request = ChargeRequest {
            idempotency_key: payment.idempotency_key.clone(),
            user_id: payment.user_id,
            amount: Money::from_cents(payment.amount_cents),
            description: format!("House charges ({})", payment.idempotency_key),
        };

        let response = tokio::time::timeout(
            self.settings.payments.processor_timeout(),
            self.processor.charge(&request),
        )
        .await;

        let external_id = match response {
            Err(_) => return Err(self.mark_failed(payment, "payment processor timed out").await?),
            Ok(Err(e)) => {
                let reason = format!("payment processor error: {e}");
                return Err(self.mark_failed(payment, &reason).await?);
            }
            Ok(Ok(ProcessorResponse::Declined { reason })) => {
                return Err(self.mark_failed(payment, &reason).await?);
            }
            Ok(Ok(ProcessorResponse::RequiresAction { external_id })) => {
                let mut waiting: payment::ActiveModel = payment.into();
                waiting.external_payment_id = Set(Some(external_id));
                waiting.updated_at = Set(Utc::now());
                let waiting = waiting.update(&self.db).await?;
                info!(payment_id = waiting.id, "Payment requires user action");
                return Ok(PaymentOutcome {
                    payment: waiting,
                    replayed: false,
                });
            }
            Ok(Ok(ProcessorResponse::Succeeded { external_id })) => external_id,
        };

        match settle_payment(&self.db, payment.id, Some(external_id.clone()), today)
            .await
        {
            Ok(settled) => Ok(PaymentOutcome {
                payment: settled,
                replayed: false,
            }),
            Err(e) => {
                if let Some(done) = Payment::find_by_id(payment.id)
                    .one(&self.db)
                    .await?
                    .filter(|p| p.status == PaymentStatus::Completed)
                {
                    info!(payment_id = done.id, "Payment was settled by another request");
                    return Ok(PaymentOutcome {
                        payment: done,
                        replayed: true,
                    });
                }

                warn!(
                    payment_id = payment.id,
                    external_id = %external_id,
                    "Payment collected but settlement failed: {e}"
                );
                Payment::update_many()
                    .col_expr(
                        payment::Column::ExternalPaymentId,
                        Expr::value(Some(external_id)),
                    )
                    .col_expr(
                        payment::Column::FailureReason,
                        Expr::value(Some(format!("settlement failed: {e}"))),
                    )
                    .col_expr(payment::Column::UpdatedAt, Expr::value(Utc::now()))
                    .filter(payment::Column::Id.eq(payment.id))
                    .filter(payment::Column::Status.eq(PaymentStatus::Processing))
                    .exec(&self.db)
                    .await?;
                Err(e)
            }
        }
    }

    /// Stores a failed attempt and returns the error to report.
    async fn mark_failed(&self, payment: payment::Model, reason: &str) -> Result<Error> {
        let attempts = payment.retry_count + 1;
        let mut failed: payment::ActiveModel = payment.into();
        failed.status = Set(PaymentStatus::Failed);
        failed.retry_count = Set(attempts);
        failed.failure_reason = Set(Some(reason.to_string()));
        failed.updated_at = Set(Utc::now());
        let failed = failed.update(&self.db).await?;

        warn!(payment_id = failed.id, attempts, "Payment attempt failed: {reason}");
        Ok(Error::ExternalPaymentFailure {
            reason: reason.to_string(),
            attempts,
        })
    }
}

enum Existing {
    Replay(payment::Model),
    Retry(payment::Model),
}
