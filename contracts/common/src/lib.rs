//! Solace - Common
//! Shared building blocks for the Solace revenue ledger and profit engine contracts.

#![no_std]

pub mod admin;
pub mod engine;
pub mod period;

pub use admin::AdminError;
pub use engine::{EngineError, ProfitEngineClient, ProfitEngineInterface};

pub const INSTANCE_LIFETIME_THRESHOLD: u32 = 17_280;
pub const INSTANCE_BUMP_AMOUNT: u32 = 86_400;
pub const PERSISTENT_LIFETIME_THRESHOLD: u32 = 120_960;
pub const PERSISTENT_BUMP_AMOUNT: u32 = 1_051_200;

/// Denominator for every fraction expressed in basis points.
pub const BPS_DENOMINATOR: i128 = 10_000;
