use thiserror::Error;

/// Failure taxonomy for order placement and position mutation. These stay
/// local to the instrument that raised them; only persistence divergence is
/// escalated to the operator.
#[derive(Error, Debug)]
pub enum OrderError {
    #[error("position already open for {0}")]
    PositionOpen(String),
    #[error("market data unavailable: {0}")]
    DataUnavailable(String),
    #[error("order rejected by exchange: {0}")]
    Rejected(String),
    #[error("balance below minimum order notional")]
    InsufficientFunds,
    #[error("position store write failed: {0}")]
    Persistence(String),
    #[error("unexpected failure: {0}")]
    Unexpected(String),
}
