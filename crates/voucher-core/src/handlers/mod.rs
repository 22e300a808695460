//! Request handlers behind the voucher engine.
//!
//! Each handler owns one of the engine's jobs: issuing signed vouchers,
//! recording consumption reports, and reaping spent records from the ledger.

pub mod consumption;
pub mod issuance;
pub mod reaper;

pub use consumption::ConsumptionHandler;
pub use issuance::{IssuanceError, IssuanceHandler};
pub use reaper::ReapHandler;
