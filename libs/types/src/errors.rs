//! Error types for the matching core
//!
//! Error taxonomy using thiserror. `EngineError` is what callers of the
//! engine see; `ValidationError` and `BalanceError` are the narrower errors
//! raised by intake checks and balance arithmetic.

use thiserror::Error;

/// Top-level engine error
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Insufficient {currency} balance: required {required}, available {available}")]
    InsufficientBalance {
        currency: String,
        required: String,
        available: String,
    },

    #[error("Self-trade prevention triggered")]
    SelfTrade,

    #[error("Invariant violated: {0}")]
    InvariantViolation(String),

    #[error("Persistence failed after {attempts} attempts: {reason}")]
    TransientPersistence { attempts: u32, reason: String },

    #[error("Order not found: {order_id}")]
    NotFound { order_id: String },

    #[error("Order already filled: {order_id}")]
    AlreadyFilled { order_id: String },

    #[error("Unknown symbol: {0}")]
    UnknownSymbol(String),

    #[error("Engine unavailable: {0}")]
    EngineUnavailable(String),
}

impl EngineError {
    /// Errors raised before any side effect took place
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            EngineError::Validation(_)
                | EngineError::InsufficientBalance { .. }
                | EngineError::SelfTrade
                | EngineError::UnknownSymbol(_)
        )
    }
}

impl From<BalanceError> for EngineError {
    fn from(err: BalanceError) -> Self {
        match err {
            BalanceError::InsufficientAvailable {
                currency,
                required,
                available,
            } => EngineError::InsufficientBalance {
                currency,
                required,
                available,
            },
            other @ BalanceError::InsufficientLocked { .. } => {
                EngineError::InvariantViolation(other.to_string())
            }
            BalanceError::Overflow { currency } => {
                EngineError::Validation(ValidationError::BalanceOverflow { currency })
            }
        }
    }
}

/// Order intake validation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Symbol {0} is disabled")]
    SymbolDisabled(String),

    #[error("Order symbol {order} does not match engine symbol {engine}")]
    SymbolMismatch { order: String, engine: String },

    #[error("Amount {amount} outside [{min}, {max}]")]
    AmountOutOfRange {
        amount: String,
        min: String,
        max: String,
    },

    #[error("Amount {amount} is not a multiple of step {step}")]
    AmountStep { amount: String, step: String },

    #[error("Limit order requires a price")]
    PriceRequired,

    #[error("Market order must not carry a price")]
    PriceNotAllowed,

    #[error("Price {price} outside [{min}, {max}]")]
    PriceOutOfRange {
        price: String,
        min: String,
        max: String,
    },

    #[error("Price {price} is not a multiple of tick {tick}")]
    PriceTick { price: String, tick: String },

    #[error("Fee must not be negative, got {0}")]
    NegativeFee(String),

    #[error("Fee currency {currency} is neither side of {symbol}")]
    FeeCurrency { currency: String, symbol: String },

    #[error("Fee {fee} exceeds the order's value of {max}")]
    FeeTooLarge { fee: String, max: String },

    #[error("Deposit amount must be positive, got {0}")]
    NonPositiveDeposit(String),

    #[error("Invalid symbol configuration: {0}")]
    InvalidSymbolConfig(String),

    #[error("{currency} balance would exceed the representable range")]
    BalanceOverflow { currency: String },
}

/// Balance arithmetic errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BalanceError {
    #[error("Insufficient {currency} available: required {required}, available {available}")]
    InsufficientAvailable {
        currency: String,
        required: String,
        available: String,
    },

    #[error("Insufficient {currency} locked: required {required}, locked {locked}")]
    InsufficientLocked {
        currency: String,
        required: String,
        locked: String,
    },

    #[error("{currency} balance overflows")]
    Overflow { currency: String },
}
