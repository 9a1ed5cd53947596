//! Core business logic - framework-agnostic ledger, funding, risk and payment operations.
//!
//! Every function takes its database handle explicitly. Mutating operations accept any
//! `TransactionTrait` handle, so they can run on their own or as part of a caller's
//! database transaction.

/// Advances and allowance
pub mod advance;
/// Bill issuing and charge queries
pub mod bill;
/// Transaction log and balance caches
pub mod finance;
/// Users and house services
pub mod household;
/// House Status Index engine
pub mod hsi;
/// Late-payment sweep
pub mod late_payment;
/// House service funding cycles
pub mod ledger;
/// Fixed-point money
pub mod money;
/// In-app notifications and push delivery
pub mod notification;
/// Idempotent payments
pub mod payment;
/// Points ledger
pub mod points;
/// House summaries
pub mod summary;
