//! Builders for constructing configurations in code.

mod config;

pub use config::{ConfigBuilder, DEV_CONTRACT_ADDRESS, DEV_PRIVATE_KEY, DEV_SIGNER_ADDRESS};
