//! Card gateway and ERP integration: domain types, adapter traits and their HTTP
//! implementations.

pub mod ack_rules;
pub mod erp;
pub mod error;
pub mod gateway;
pub mod providers;
pub mod types;
pub mod utils;

pub use erp::{ErpClient, ErpPaymentDocument, PendingAmount};
pub use error::{PaymentError, PaymentResult};
pub use gateway::{CardGateway, RegisterOrder, RegisteredOrder};
pub use types::{
    ActionType, NewPayment, Payment, PaymentAction, PaymentStatus, PaymentUpdate, StagePayload,
};
