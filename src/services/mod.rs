//! Services module for business logic on the request path

pub mod receipt;
pub mod registration;

pub use receipt::{PlainTextReceiptRenderer, ReceiptData, ReceiptDocument, ReceiptRenderer};
pub use registration::{
    PrepareRequest, PrepareResponse, RegisterRequest, RegisterResponse, RegistrationService,
};
