//! Error taxonomy shared by every component
use crate::meal::Day;
use sled::transaction::TransactionError;
use std::convert::Infallible;
use tracing::error;

#[derive(thiserror::Error, Debug)]
pub enum OrderError {
    #[error("Reference is unknown or not owned by its claimed parent: {0}")]
    InvalidReference(String),
    #[error("Day {0} is in the past")]
    InvalidDate(Day),
    #[error("User already holds an active order for this day")]
    DuplicateOrder,
    #[error("Transition not permitted: {0}")]
    Conflict(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("Operation not permitted for this actor")]
    Forbidden,
    #[error("Order contains no dishes")]
    EmptyOrder,
    #[error("Invalid quantity for dish {0}")]
    InvalidQuantity(String),

    // server side failures, surfaced as a generic error to callers
    #[error("Storage failure: {0}")]
    Storage(#[from] sled::Error),
    #[error("Failed to encode record: {0}")]
    Encode(#[from] minicbor::encode::Error<Infallible>),
    #[error("Failed to decode record: {0}")]
    Decode(#[from] minicbor::decode::Error),
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl OrderError {
    /// True when the caller can fix the request, false for server side failures.
    pub fn is_client_error(&self) -> bool {
        !matches!(
            self,
            OrderError::Storage(_)
                | OrderError::Encode(_)
                | OrderError::Decode(_)
                | OrderError::Internal(_)
        )
    }
}

/// For `Result::inspect_err` at public operations. Client errors pass silently.
pub(crate) fn log_failure(operation: &'static str) -> impl Fn(&OrderError) {
    move |err: &OrderError| {
        if !err.is_client_error() {
            error!(operation, error = %err, "operation failed");
        }
    }
}

impl From<TransactionError<OrderError>> for OrderError {
    fn from(value: TransactionError<OrderError>) -> Self {
        match value {
            TransactionError::Abort(err) => err,
            TransactionError::Storage(err) => OrderError::Storage(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_client_and_server_errors() {
        assert!(OrderError::DuplicateOrder.is_client_error());
        assert!(OrderError::Forbidden.is_client_error());
        let err = OrderError::Internal(anyhow::anyhow!("boom"));
        assert!(!err.is_client_error());
    }

    #[test]
    fn transaction_abort_unwraps_inner_error() {
        let err: OrderError = TransactionError::Abort(OrderError::EmptyOrder).into();
        assert!(matches!(err, OrderError::EmptyOrder));
    }
}
