//! Passwordless login flow: code derivation, issuance, consumption, cleanup.

pub mod crypto;
pub mod error;
pub mod models;
pub mod service;

pub use error::PasswordlessError;
pub use service::PasswordlessService;
