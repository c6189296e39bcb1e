use thiserror::Error;

use crate::storage::StorageError;

/// The closed set of outcomes a passwordless operation can fail with.
#[derive(Debug, Error)]
pub enum PasswordlessError {
    /// The anchor of the login attempt — its device or link — is gone,
    /// expired without penalty, or the flow raced another one to completion.
    /// The client must discard its state and start a new issuance.
    #[error("login flow must be restarted")]
    RestartFlow,

    /// The submitted input code matched a stored code that has expired. The
    /// attempt was counted; the client may prompt again while
    /// `failed_attempts < maximum_attempts`.
    #[error("expired user input code ({failed_attempts}/{maximum_attempts} attempts used)")]
    ExpiredUserInputCode {
        failed_attempts: u32,
        maximum_attempts: u32,
    },

    /// The submitted input code matched nothing. The attempt was counted;
    /// the client may prompt again while `failed_attempts < maximum_attempts`.
    #[error("incorrect user input code ({failed_attempts}/{maximum_attempts} attempts used)")]
    IncorrectUserInputCode {
        failed_attempts: u32,
        maximum_attempts: u32,
    },

    /// The caller pinned both the device id and the input code, and that
    /// exact code already exists for the device. Deterministic, so never
    /// retried; surfaced as a conflict.
    #[error("a code with the same link code already exists for this device")]
    DuplicateLinkCode,

    /// Contact update requested for a user that does not exist.
    #[error("unknown user id")]
    UnknownUserId,

    /// The requested email already belongs to another user.
    #[error("email already in use")]
    DuplicateEmail,

    /// The requested phone number already belongs to another user.
    #[error("phone number already in use")]
    DuplicatePhoneNumber,

    /// Infrastructure failure in the storage layer, propagated without
    /// interpretation.
    #[error("storage failure: {0}")]
    Storage(#[source] anyhow::Error),
}

impl From<StorageError> for PasswordlessError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::UnknownUserId => Self::UnknownUserId,
            StorageError::DuplicateEmail => Self::DuplicateEmail,
            StorageError::DuplicatePhoneNumber => Self::DuplicatePhoneNumber,
            StorageError::Backend(source) => Self::Storage(source),
            // Uniqueness conflicts on generated material are absorbed by the
            // retry loops; one reaching this conversion escaped its loop.
            other => Self::Storage(anyhow::Error::new(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{PasswordlessError, StorageError};

    #[test]
    fn storage_variants_map_to_typed_errors() {
        assert!(matches!(
            PasswordlessError::from(StorageError::UnknownUserId),
            PasswordlessError::UnknownUserId
        ));
        assert!(matches!(
            PasswordlessError::from(StorageError::DuplicateEmail),
            PasswordlessError::DuplicateEmail
        ));
        assert!(matches!(
            PasswordlessError::from(StorageError::DuplicatePhoneNumber),
            PasswordlessError::DuplicatePhoneNumber
        ));
        assert!(matches!(
            PasswordlessError::from(StorageError::DuplicateCodeId),
            PasswordlessError::Storage(_)
        ));
    }

    #[test]
    fn attempt_errors_render_counts() {
        let err = PasswordlessError::IncorrectUserInputCode {
            failed_attempts: 2,
            maximum_attempts: 5,
        };
        assert_eq!(
            err.to_string(),
            "incorrect user input code (2/5 attempts used)"
        );
    }
}
