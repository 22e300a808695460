//! Request processing for the issuer's HTTP endpoints.

pub mod consumption;
pub mod signature;
