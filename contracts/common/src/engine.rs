//! Cross-contract surface of the profit engine.
//!
//! The revenue ledger settles finalized periods through [`ProfitEngineClient`]
//! instead of linking the engine contract, and decodes failures as
//! [`EngineError`].

use soroban_sdk::{contractclient, contracterror, Env};

use crate::admin::AdminError;

#[contracterror]
#[derive(Copy, Clone, Debug, Eq, PartialEq, PartialOrd, Ord)]
#[repr(u32)]
pub enum EngineError {
    NotInitialized = 1,
    AlreadyInitialized = 2,
    Unauthorized = 3,
    InvalidTier = 4,
    InvalidAmount = 5,
    BelowMinimum = 6,
    InsufficientParticipation = 7,
    InvalidIndex = 8,
    OutOfSequence = 9,
    AlreadySettled = 10,
    NothingToClaim = 11,
    InvalidTierConfig = 12,
    InsufficientReserve = 13,
    Overflow = 14,
    InvalidPeriod = 15,
    NoPendingAdmin = 16,
}

impl From<AdminError> for EngineError {
    fn from(err: AdminError) -> Self {
        match err {
            AdminError::NotInitialized => EngineError::NotInitialized,
            AdminError::Unauthorized => EngineError::Unauthorized,
            AdminError::NoPendingAdmin => EngineError::NoPendingAdmin,
        }
    }
}

#[contractclient(name = "ProfitEngineClient")]
pub trait ProfitEngineInterface {
    /// Record the settlement for a finalized period. Only the configured
    /// revenue ledger may call this, and periods must arrive in order.
    fn settle_period(env: Env, period: u32, revenue: i128, expenses: i128)
        -> Result<(), EngineError>;
}
