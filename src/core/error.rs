use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BillingError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("slab capacity of {capacity} units cannot cover consumption of {demand} units")]
    CapacityDeficit { demand: u64, capacity: u64 },
}

impl BillingError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        BillingError::InvalidInput(msg.into())
    }
}

pub type BillingResult<T> = Result<T, BillingError>;
