//! Entity module - Contains all SeaORM entity definitions for the database.
//! These entities represent the database tables and their relationships.
//! Each entity has a Model struct for data and an Entity struct for operations.
//! Money columns are integer cents; see `core::money::Money`.

pub mod bill;
pub mod charge;
pub mod house_finance;
pub mod house_risk_history;
pub mod house_service;
pub mod house_service_ledger;
pub mod house_status_index;
pub mod notification;
pub mod payment;
pub mod points_entry;
pub mod transaction;
pub mod user;
pub mod user_finance;

// Re-export specific types to avoid conflicts
pub use bill::{BillStatus, Column as BillColumn, Entity as Bill, Model as BillModel};
pub use charge::{ChargeStatus, Column as ChargeColumn, Entity as Charge, Model as ChargeModel};
pub use house_finance::{
    Column as HouseFinanceColumn, Entity as HouseFinance, Model as HouseFinanceModel,
};
pub use house_risk_history::{
    Column as HouseRiskHistoryColumn, Entity as HouseRiskHistory, Model as HouseRiskHistoryModel,
};
pub use house_service::{
    Column as HouseServiceColumn, Entity as HouseService, FeeCategory, Model as HouseServiceModel,
};
pub use house_service_ledger::{
    Column as HouseServiceLedgerColumn, Entity as HouseServiceLedger, LedgerStatus,
    Model as HouseServiceLedgerModel,
};
pub use house_status_index::{
    Column as HouseStatusIndexColumn, Entity as HouseStatusIndex, Model as HouseStatusIndexModel,
};
pub use notification::{
    Column as NotificationColumn, Entity as Notification, Model as NotificationModel,
};
pub use payment::{Column as PaymentColumn, Entity as Payment, Model as PaymentModel, PaymentStatus};
pub use points_entry::{
    Column as PointsEntryColumn, Entity as PointsEntry, Model as PointsEntryModel, PointsReason,
};
pub use transaction::{
    Column as TransactionColumn, Entity as Transaction, Model as TransactionModel,
    TransactionStatus, TransactionType,
};
pub use user::{Column as UserColumn, Entity as User, Model as UserModel};
pub use user_finance::{
    Column as UserFinanceColumn, Entity as UserFinance, Model as UserFinanceModel,
};
