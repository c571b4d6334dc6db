//! Error types shared by the object store and the multi-object operations

use std::fmt;
use thiserror::Error;

/// Failure of a single object store call
///
/// The API server's status codes are folded into the kinds the controller
/// reacts to differently.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("invalid: {0}")]
    Invalid(String),

    #[error("Kubernetes API error: {0}")]
    Api(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, StoreError::AlreadyExists(_))
    }

    pub fn is_invalid(&self) -> bool {
        matches!(self, StoreError::Invalid(_))
    }
}

impl From<kube::Error> for StoreError {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(resp) => match resp.code {
                404 => StoreError::NotFound(resp.message.clone()),
                409 if resp.reason == "AlreadyExists" => {
                    StoreError::AlreadyExists(resp.message.clone())
                }
                409 => StoreError::Conflict(resp.message.clone()),
                422 => StoreError::Invalid(resp.message.clone()),
                _ => StoreError::Api(resp.message.clone()),
            },
            other => StoreError::Api(other.to_string()),
        }
    }
}

/// Errors collected from an operation over many objects
///
/// Every failure is kept so that callers can log all of them; objects that
/// did not fail were still processed.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateError<E> {
    errors: Vec<E>,
}

impl<E> AggregateError<E> {
    /// Returns `None` when there is nothing to report
    pub fn from_errors(errors: Vec<E>) -> Option<Self> {
        if errors.is_empty() {
            None
        } else {
            Some(Self { errors })
        }
    }

    pub fn errors(&self) -> &[E] {
        &self.errors
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }
}

impl<E: fmt::Display> fmt::Display for AggregateError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.errors.len() == 1 {
            return write!(f, "{}", self.errors[0]);
        }
        write!(f, "[")?;
        for (i, err) in self.errors.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", err)?;
        }
        write!(f, "]")
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for AggregateError<E> {}
