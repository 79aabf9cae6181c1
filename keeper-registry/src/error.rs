use std::fmt::Display;
use std::fmt::Formatter;

use thiserror::Error;

/// Per element outcome of an `eth_call`, classified by the chain client.
#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum CallError {
    /// The call executed and reverted. For registry calls this means the upkeep
    /// can not be performed anymore, e.g. it was cancelled.
    #[error("execution reverted: {0}")]
    Reverted(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("{0}")]
    Other(String),
}

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("not found")]
    NotFound,

    #[error("rpc transport error: {0}")]
    Transport(String),

    #[error("subscription error: {0}")]
    Subscription(String),

    #[error("batch task failed: {0}")]
    TaskFailed(String),

    #[error("batch call failed: {0}")]
    Batch(MultiError<ClientError>),
}

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("registry initialization failed: {0}")]
    InitializationFailure(String),

    #[error("registry call failed: {0}")]
    RegistryCallFailure(String),

    #[error("context cancelled")]
    ContextCancelled,

    #[error("upkeep calls failed: {0}")]
    CheckFailed(MultiError<CallError>),

    #[error(transparent)]
    Client(#[from] ClientError),
}

/// A non-empty list of errors reported together.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MultiError<E>(Vec<E>);

impl<E> MultiError<E> {
    pub fn errors(&self) -> &[E] {
        &self.0
    }

    pub fn into_inner(self) -> Vec<E> {
        self.0
    }
}

impl<E> From<Vec<E>> for MultiError<E> {
    fn from(errors: Vec<E>) -> Self {
        Self(errors)
    }
}

impl<E: Display> Display for MultiError<E> {
    fn fmt(
        &self,
        f: &mut Formatter<'_>,
    ) -> std::fmt::Result {
        for (i, err) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{err}")?;
        }
        Ok(())
    }
}

impl<E: std::error::Error> std::error::Error for MultiError<E> {}
