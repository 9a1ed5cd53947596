//! Finance business logic - Applies money movements to user and house balances.
//!
//! This module is the only writer of `UserFinance.balance/credit`, `HouseFinance` and the
//! `transactions` log. Every movement reads the affected balance, writes the new value
//! guarded by a compare-and-set on the old one, and appends a `COMPLETED` transaction row
//! carrying both snapshots, all inside one database transaction.
//!
//! Functions take any handle implementing `TransactionTrait`. Given a connection they
//! open their own transaction; given a `DatabaseTransaction` they join it through a
//! savepoint, so callers can compose a payment, a ledger contribution and a points
//! change into one atomic unit.

use crate::{
    core::{household, money::Money},
    entities::{
        HouseFinance, Transaction, TransactionStatus, TransactionType, UserFinance,
        house_finance, transaction, user_finance,
    },
    errors::{Error, Result},
};
use chrono::Utc;
use sea_orm::{
    QueryOrder, QuerySelect, Select, Set, TransactionTrait, prelude::*,
    sea_query::{Expr, OnConflict},
};
use tracing::{debug, info, instrument};

/// Whose balance a movement affects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Party {
    /// A user's owed balance (or credit balance for credit movements)
    User(i64),
    /// A house's balance
    House(i64),
}

/// Which way a movement moves the affected balance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// `balance += amount`
    Increase,
    /// `balance -= amount`
    Decrease,
}

/// Which cached balance of a party is affected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BalanceKind {
    Owed,
    Credit,
}

/// Optional links from a transaction row to related records
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionLinks {
    /// Related bill
    pub bill_id: Option<i64>,
    /// Related charge
    pub charge_id: Option<i64>,
    /// Related payment
    pub payment_id: Option<i64>,
    /// Paired transaction
    pub related_transaction_id: Option<i64>,
    /// Reference in an external system
    pub external_reference_id: Option<String>,
}

/// Input for [`apply_transaction`]
#[derive(Debug, Clone)]
pub struct TransactionParams {
    /// User whose balance is affected; takes precedence over `house_id`
    pub user_id: Option<i64>,
    /// House the movement belongs to; the affected party when `user_id` is empty
    pub house_id: Option<i64>,
    /// Kind of movement
    pub transaction_type: TransactionType,
    /// Positive amount
    pub amount: Money,
    /// Human-readable description
    pub description: String,
    /// Required for transfer/adjustment/fee/refund, must match the table otherwise
    pub direction: Option<Direction>,
    /// Links to related records
    pub links: TransactionLinks,
    /// Opaque metadata stored as JSON
    pub metadata: Option<serde_json::Value>,
}

impl TransactionParams {
    /// A movement on a user's balance.
    pub fn for_user(
        user_id: i64,
        transaction_type: TransactionType,
        amount: Money,
        description: impl Into<String>,
    ) -> Self {
        Self {
            user_id: Some(user_id),
            house_id: None,
            transaction_type,
            amount,
            description: description.into(),
            direction: None,
            links: TransactionLinks::default(),
            metadata: None,
        }
    }

    /// A movement on a house's balance.
    pub fn for_house(
        house_id: i64,
        transaction_type: TransactionType,
        amount: Money,
        description: impl Into<String>,
    ) -> Self {
        Self {
            user_id: None,
            house_id: Some(house_id),
            ..Self::for_user(0, transaction_type, amount, description)
        }
    }

    /// A movement on either kind of party.
    pub fn for_party(
        party: Party,
        transaction_type: TransactionType,
        amount: Money,
        description: impl Into<String>,
    ) -> Self {
        match party {
            Party::User(id) => Self::for_user(id, transaction_type, amount, description),
            Party::House(id) => Self::for_house(id, transaction_type, amount, description),
        }
    }

    /// Tags the movement with a house.
    #[must_use]
    pub const fn in_house(mut self, house_id: i64) -> Self {
        self.house_id = Some(house_id);
        self
    }

    /// Sets an explicit direction.
    #[must_use]
    pub const fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = Some(direction);
        self
    }

    /// Sets the related-record links.
    #[must_use]
    pub fn with_links(mut self, links: TransactionLinks) -> Self {
        self.links = links;
        self
    }

    /// Attaches metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    fn party(&self) -> Result<Party> {
        match (self.user_id, self.house_id) {
            (Some(user_id), _) => Ok(Party::User(user_id)),
            (None, Some(house_id)) => Ok(Party::House(house_id)),
            (None, None) => Err(Error::InvalidTransaction {
                message: "a transaction needs a user or a house".to_string(),
            }),
        }
    }
}

/// Result of [`process_user_payment`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentPosting {
    /// PAYMENT row debiting the user
    pub user_transaction: transaction::Model,
    /// PAYMENT row crediting the house
    pub house_transaction: transaction::Model,
}

/// Result of [`transfer`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferPosting {
    /// TRANSFER row debiting the source
    pub debit: transaction::Model,
    /// TRANSFER row crediting the destination
    pub credit: transaction::Model,
}

/// Outcome of comparing the transaction log with a cached balance row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    /// Balance implied by the completed transactions
    pub ledger_balance: Money,
    /// Balance stored in the finance row
    pub cached_balance: Money,
    /// Credit implied by the completed transactions (always zero for houses)
    pub ledger_credit: Money,
    /// Credit stored in the finance row (always zero for houses)
    pub cached_credit: Money,
    /// Rows whose snapshots do not differ by exactly their amount
    pub inconsistent_transactions: Vec<i64>,
}

impl Reconciliation {
    /// Whether the log and the cache agree and every row is internally consistent
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.ledger_balance == self.cached_balance
            && self.ledger_credit == self.cached_credit
            && self.inconsistent_transactions.is_empty()
    }
}

/// The fixed direction of a transaction type for a party, `None` when the caller must
/// state it explicitly.
#[must_use]
pub const fn default_direction(transaction_type: TransactionType, party: Party) -> Option<Direction> {
    let is_user = matches!(party, Party::User(_));
    match transaction_type {
        TransactionType::Charge | TransactionType::Advance | TransactionType::Credit => {
            Some(Direction::Increase)
        }
        TransactionType::Payment => Some(if is_user {
            Direction::Decrease
        } else {
            Direction::Increase
        }),
        TransactionType::AdvanceRepayment | TransactionType::CreditUsage => {
            Some(Direction::Decrease)
        }
        TransactionType::Transfer
        | TransactionType::Adjustment
        | TransactionType::Fee
        | TransactionType::Refund => None,
    }
}

fn resolve_direction(params: &TransactionParams, party: Party) -> Result<(BalanceKind, Direction)> {
    let kind = match params.transaction_type {
        TransactionType::Credit | TransactionType::CreditUsage => {
            if matches!(party, Party::House(_)) {
                return Err(Error::InvalidTransaction {
                    message: "credit movements apply to users only".to_string(),
                });
            }
            BalanceKind::Credit
        }
        _ => BalanceKind::Owed,
    };

    let direction = match (default_direction(params.transaction_type, party), params.direction) {
        (Some(fixed), Some(explicit)) if fixed != explicit => {
            return Err(Error::InvalidTransaction {
                message: format!(
                    "{:?} cannot be applied as {explicit:?} for this party",
                    params.transaction_type
                ),
            });
        }
        (Some(fixed), _) => fixed,
        (None, Some(explicit)) => explicit,
        (None, None) => {
            return Err(Error::InvalidTransaction {
                message: format!(
                    "{:?} requires an explicit direction",
                    params.transaction_type
                ),
            });
        }
    };

    Ok((kind, direction))
}

/// Finds or lazily creates the finance row of a user.
pub async fn ensure_user_finance<C>(db: &C, user_id: i64) -> Result<user_finance::Model>
where
    C: ConnectionTrait,
{
    if let Some(existing) = UserFinance::find()
        .filter(user_finance::Column::UserId.eq(user_id))
        .one(db)
        .await?
    {
        return Ok(existing);
    }

    let now = Utc::now();
    let row = user_finance::ActiveModel {
        user_id: Set(user_id),
        balance_cents: Set(0),
        credit_cents: Set(0),
        points: Set(0),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    };
    UserFinance::insert(row)
        .on_conflict(
            OnConflict::column(user_finance::Column::UserId)
                .do_nothing()
                .to_owned(),
        )
        .exec_without_returning(db)
        .await?;
    debug!(user_id, "Created user finance row");

    UserFinance::find()
        .filter(user_finance::Column::UserId.eq(user_id))
        .one(db)
        .await?
        .ok_or_else(|| Error::not_found("user finance", user_id))
}

/// Finds or lazily creates the finance row of a house.
pub async fn ensure_house_finance<C>(db: &C, house_id: i64) -> Result<house_finance::Model>
where
    C: ConnectionTrait,
{
    if let Some(existing) = HouseFinance::find()
        .filter(house_finance::Column::HouseId.eq(house_id))
        .one(db)
        .await?
    {
        return Ok(existing);
    }

    let now = Utc::now();
    let row = house_finance::ActiveModel {
        house_id: Set(house_id),
        balance_cents: Set(0),
        ledger_cents: Set(0),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    };
    HouseFinance::insert(row)
        .on_conflict(
            OnConflict::column(house_finance::Column::HouseId)
                .do_nothing()
                .to_owned(),
        )
        .exec_without_returning(db)
        .await?;
    debug!(house_id, "Created house finance row");

    HouseFinance::find()
        .filter(house_finance::Column::HouseId.eq(house_id))
        .one(db)
        .await?
        .ok_or_else(|| Error::not_found("house finance", house_id))
}

/// Moves the affected balance and returns `(before, after)` in cents.
async fn shift_balance<C>(
    conn: &C,
    party: Party,
    kind: BalanceKind,
    direction: Direction,
    amount: Money,
) -> Result<(i64, i64)>
where
    C: ConnectionTrait,
{
    let delta = match direction {
        Direction::Increase => amount.cents(),
        Direction::Decrease => -amount.cents(),
    };
    let now = Utc::now();

    let (before, after, rows) = match party {
        Party::User(user_id) => {
            let finance = ensure_user_finance(conn, user_id).await?;
            let (column, before) = match kind {
                BalanceKind::Owed => (user_finance::Column::BalanceCents, finance.balance_cents),
                BalanceKind::Credit => (user_finance::Column::CreditCents, finance.credit_cents),
            };
            let after = before + delta;
            let result = UserFinance::update_many()
                .col_expr(column, Expr::value(after))
                .col_expr(user_finance::Column::UpdatedAt, Expr::value(now))
                .filter(user_finance::Column::UserId.eq(user_id))
                .filter(column.eq(before))
                .exec(conn)
                .await?;
            (before, after, result.rows_affected)
        }
        Party::House(house_id) => {
            let finance = ensure_house_finance(conn, house_id).await?;
            let before = finance.balance_cents;
            let after = before + delta;
            let result = HouseFinance::update_many()
                .col_expr(house_finance::Column::BalanceCents, Expr::value(after))
                .col_expr(house_finance::Column::UpdatedAt, Expr::value(now))
                .filter(house_finance::Column::HouseId.eq(house_id))
                .filter(house_finance::Column::BalanceCents.eq(before))
                .exec(conn)
                .await?;
            (before, after, result.rows_affected)
        }
    };

    if rows == 0 {
        return Err(Error::ConcurrencyConflict {
            resource: format!("{party:?} balance"),
        });
    }
    Ok((before, after))
}

/// Applies one movement on an already-open connection or transaction.
async fn post<C>(conn: &C, params: TransactionParams) -> Result<transaction::Model>
where
    C: ConnectionTrait,
{
    let amount = params.amount.ensure_positive()?;
    let party = params.party()?;
    let (kind, direction) = resolve_direction(&params, party)?;

    let (before, after) = shift_balance(conn, party, kind, direction, amount).await?;

    let metadata = params
        .metadata
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    let row = transaction::ActiveModel {
        user_id: Set(params.user_id),
        house_id: Set(params.house_id),
        transaction_type: Set(params.transaction_type),
        amount_cents: Set(amount.cents()),
        balance_before_cents: Set(before),
        balance_after_cents: Set(after),
        status: Set(TransactionStatus::Completed),
        description: Set(params.description),
        bill_id: Set(params.links.bill_id),
        charge_id: Set(params.links.charge_id),
        payment_id: Set(params.links.payment_id),
        related_transaction_id: Set(params.links.related_transaction_id),
        external_reference_id: Set(params.links.external_reference_id),
        metadata: Set(metadata),
        created_at: Set(Utc::now()),
        ..Default::default()
    }
    .insert(conn)
    .await?;

    debug!(
        transaction_id = row.id,
        ?party,
        kind = ?row.transaction_type,
        before,
        after,
        "Posted transaction"
    );
    Ok(row)
}

/// Applies a single money movement atomically and returns the written row.
///
/// # Errors
/// * `InvalidAmount` - the amount is not positive or exceeds the bound
/// * `InvalidTransaction` - no party, missing or mismatched direction
/// * `ConcurrencyConflict` - the balance changed between read and write
pub async fn apply_transaction<C>(db: &C, params: TransactionParams) -> Result<transaction::Model>
where
    C: ConnectionTrait + TransactionTrait,
{
    // Reject bad input before opening a transaction
    params.amount.ensure_positive()?;
    let party = params.party()?;
    resolve_direction(&params, party)?;

    let txn = db.begin().await?;
    let row = post(&txn, params).await?;
    txn.commit().await?;

    info!(
        "Applied {:?} of {} to {:?}: {} -> {}",
        row.transaction_type,
        Money::from_cents(row.amount_cents),
        party,
        Money::from_cents(row.balance_before_cents),
        Money::from_cents(row.balance_after_cents)
    );
    Ok(row)
}

/// Moves a payment from a user to their house: debits the user's owed balance, credits
/// the house balance and its collected-funds counter, in one atomic unit.
///
/// This is the only path that moves money between a user and a house.
#[instrument(skip(db, description, metadata))]
pub async fn process_user_payment<C>(
    db: &C,
    user_id: i64,
    amount: Money,
    description: &str,
    payment_id: Option<i64>,
    metadata: Option<serde_json::Value>,
) -> Result<PaymentPosting>
where
    C: ConnectionTrait + TransactionTrait,
{
    let amount = amount.ensure_positive()?;

    let txn = db.begin().await?;

    let user = household::require_user(&txn, user_id).await?;
    let house_id = user
        .house_id
        .ok_or_else(|| Error::InsufficientConfiguration {
            message: format!("user {user_id} does not belong to a house"),
        })?;

    let links = TransactionLinks {
        payment_id,
        ..Default::default()
    };
    let mut user_params =
        TransactionParams::for_user(user_id, TransactionType::Payment, amount, description)
            .in_house(house_id)
            .with_links(links.clone());
    user_params.metadata.clone_from(&metadata);
    let user_transaction = post(&txn, user_params).await?;

    let mut house_params =
        TransactionParams::for_house(house_id, TransactionType::Payment, amount, description)
            .with_links(TransactionLinks {
                related_transaction_id: Some(user_transaction.id),
                ..links
            });
    house_params.metadata = metadata;
    let house_transaction = post(&txn, house_params).await?;

    HouseFinance::update_many()
        .col_expr(
            house_finance::Column::LedgerCents,
            Expr::col(house_finance::Column::LedgerCents).add(amount.cents()),
        )
        .filter(house_finance::Column::HouseId.eq(house_id))
        .exec(&txn)
        .await?;

    txn.commit().await?;

    info!(
        "Processed payment of {} from user {} to house {}",
        amount, user_id, house_id
    );
    Ok(PaymentPosting {
        user_transaction,
        house_transaction,
    })
}

/// Moves an amount between two parties as a pair of linked TRANSFER rows.
#[instrument(skip(db, description))]
pub async fn transfer<C>(
    db: &C,
    from: Party,
    to: Party,
    amount: Money,
    description: &str,
) -> Result<TransferPosting>
where
    C: ConnectionTrait + TransactionTrait,
{
    let amount = amount.ensure_positive()?;
    if from == to {
        return Err(Error::InvalidTransaction {
            message: "cannot transfer to the same party".to_string(),
        });
    }

    let txn = db.begin().await?;
    let debit = post(
        &txn,
        TransactionParams::for_party(from, TransactionType::Transfer, amount, description)
            .with_direction(Direction::Decrease),
    )
    .await?;
    let credit = post(
        &txn,
        TransactionParams::for_party(to, TransactionType::Transfer, amount, description)
            .with_direction(Direction::Increase)
            .with_links(TransactionLinks {
                related_transaction_id: Some(debit.id),
                ..Default::default()
            }),
    )
    .await?;
    txn.commit().await?;

    info!("Transferred {} from {:?} to {:?}", amount, from, to);
    Ok(TransferPosting { debit, credit })
}

/// The finance row of a user, if one was created.
pub async fn get_user_finance<C>(db: &C, user_id: i64) -> Result<Option<user_finance::Model>>
where
    C: ConnectionTrait,
{
    UserFinance::find()
        .filter(user_finance::Column::UserId.eq(user_id))
        .one(db)
        .await
        .map_err(Into::into)
}

/// The finance row of a house, if one was created.
pub async fn get_house_finance<C>(db: &C, house_id: i64) -> Result<Option<house_finance::Model>>
where
    C: ConnectionTrait,
{
    HouseFinance::find()
        .filter(house_finance::Column::HouseId.eq(house_id))
        .one(db)
        .await
        .map_err(Into::into)
}

/// Transactions that affected a user, newest first.
pub async fn get_transactions_for_user<C>(db: &C, user_id: i64) -> Result<Vec<transaction::Model>>
where
    C: ConnectionTrait,
{
    Transaction::find()
        .filter(transaction::Column::UserId.eq(user_id))
        .order_by_desc(transaction::Column::CreatedAt)
        .order_by_desc(transaction::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

fn house_transactions(house_id: i64) -> Select<Transaction> {
    Transaction::find()
        .filter(transaction::Column::HouseId.eq(house_id))
        .filter(transaction::Column::UserId.is_null())
        .order_by_desc(transaction::Column::CreatedAt)
        .order_by_desc(transaction::Column::Id)
}

/// Transactions that affected a house balance, newest first.
pub async fn get_transactions_for_house<C>(db: &C, house_id: i64) -> Result<Vec<transaction::Model>>
where
    C: ConnectionTrait,
{
    house_transactions(house_id)
        .all(db)
        .await
        .map_err(Into::into)
}

/// The `limit` most recent transactions on a house balance, newest first.
pub async fn get_recent_transactions_for_house<C>(
    db: &C,
    house_id: i64,
    limit: u64,
) -> Result<Vec<transaction::Model>>
where
    C: ConnectionTrait,
{
    house_transactions(house_id)
        .limit(limit)
        .all(db)
        .await
        .map_err(Into::into)
}

fn summarize(rows: &[transaction::Model]) -> (Money, Money, Vec<i64>) {
    let mut balance = Money::ZERO;
    let mut credit = Money::ZERO;
    let mut inconsistent = Vec::new();

    for row in rows
        .iter()
        .filter(|r| r.status == TransactionStatus::Completed)
    {
        let delta = row.balance_after_cents - row.balance_before_cents;
        if delta.abs() != row.amount_cents {
            inconsistent.push(row.id);
        }
        match row.transaction_type {
            TransactionType::Credit | TransactionType::CreditUsage => {
                credit += Money::from_cents(delta);
            }
            _ => balance += Money::from_cents(delta),
        }
    }
    (balance, credit, inconsistent)
}

/// Compares a user's completed transactions with their cached balance and credit.
pub async fn reconcile_user<C>(db: &C, user_id: i64) -> Result<Reconciliation>
where
    C: ConnectionTrait,
{
    let rows = get_transactions_for_user(db, user_id).await?;
    let (ledger_balance, ledger_credit, inconsistent_transactions) = summarize(&rows);
    let cached = get_user_finance(db, user_id).await?;

    Ok(Reconciliation {
        ledger_balance,
        cached_balance: Money::from_cents(cached.as_ref().map_or(0, |f| f.balance_cents)),
        ledger_credit,
        cached_credit: Money::from_cents(cached.as_ref().map_or(0, |f| f.credit_cents)),
        inconsistent_transactions,
    })
}

/// Compares a house's completed transactions with its cached balance.
pub async fn reconcile_house<C>(db: &C, house_id: i64) -> Result<Reconciliation>
where
    C: ConnectionTrait,
{
    let rows = get_transactions_for_house(db, house_id).await?;
    let (ledger_balance, ledger_credit, inconsistent_transactions) = summarize(&rows);
    let cached = get_house_finance(db, house_id).await?;

    Ok(Reconciliation {
        ledger_balance,
        cached_balance: Money::from_cents(cached.map_or(0, |f| f.balance_cents)),
        ledger_credit,
        cached_credit: Money::ZERO,
        inconsistent_transactions,
    })
}
