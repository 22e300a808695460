//! Core voucher engine for the issuer service.
//!
//! This crate wires the nonce ledger and the signing account into a single
//! [`VoucherEngine`] that issues signed vouchers, records consumption reports
//! and periodically reaps spent records. The HTTP surface lives in the service
//! crate; everything here is usable in-process.

pub mod builder;
pub mod engine;
pub mod handlers;

pub use builder::{BuilderError, VoucherBuilder, VoucherFactories};
pub use engine::{EngineError, VoucherEngine};
pub use handlers::IssuanceError;
