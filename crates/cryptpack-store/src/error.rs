//! Error types for the store subsystem.

use thiserror::Error;

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Error variants for object store, queue, and status store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested object does not exist (possibly a race with a
    /// concurrent deletion).
    #[error("Object not found: {container}/{name}")]
    NotFound {
        /// Container the object was looked up in.
        container: String,
        /// Object name.
        name: String,
    },

    /// The requested container does not exist.
    #[error("Container not found: {container}")]
    ContainerNotFound {
        /// The missing container.
        container: String,
    },

    /// The object could not be decrypted: bad envelope, unresolvable key
    /// metadata, authentication failure, or content hash mismatch.
    #[error("Decryption failed: {reason}")]
    DecryptionFailed {
        /// Description of the failure.
        reason: String,
    },

    /// Encrypting an object failed.
    #[error("Encryption failed: {reason}")]
    EncryptionFailed {
        /// Description of the failure.
        reason: String,
    },

    /// The supplied key handle cannot be used for this operation. Fatal,
    /// not retryable.
    #[error("Invalid key: {reason}")]
    InvalidKey {
        /// Description of the key problem.
        reason: String,
    },

    /// Authentication against a backing service failed.
    #[error("Authentication failed: {reason}")]
    AuthFailure {
        /// Description of the credential problem.
        reason: String,
    },

    /// Storage quota exhausted. Transient from the caller's point of view.
    #[error("Quota exceeded on container {container}")]
    QuotaExceeded {
        /// The container that hit its quota.
        container: String,
    },

    /// The backing service could not be reached. Retryable.
    #[error("Store unavailable: {reason}")]
    Unavailable {
        /// Description of the error.
        reason: String,
    },

    /// The requested status record does not exist.
    #[error("Record not found: {partition}/{row}")]
    RecordNotFound {
        /// Partition key.
        partition: String,
        /// Row key.
        row: String,
    },

    /// A queue delete presented a receipt that no longer holds the lease.
    #[error("Stale receipt for message {message_id}")]
    StaleReceipt {
        /// The message whose lease has moved on.
        message_id: u64,
    },

    /// Envelope header (de)serialization error.
    #[error("Serialization error: {reason}")]
    Serialization {
        /// Description of the error.
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_result_alias() {
        let ok: StoreResult<()> = Ok(());
        assert!(ok.is_ok());

        let err: StoreResult<()> = Err(StoreError::Unavailable {
            reason: "connection refused".to_string(),
        });
        assert!(err.is_err());
    }

    #[test]
    fn test_not_found_display() {
        let err = StoreError::NotFound {
            container: "job-1234".to_string(),
            name: "photo.jpg".to_string(),
        };
        assert_eq!(format!("{}", err), "Object not found: job-1234/photo.jpg");
    }

    #[test]
    fn test_decryption_failed_display() {
        let err = StoreError::DecryptionFailed {
            reason: "key metadata missing".to_string(),
        };
        assert!(format!("{}", err).contains("key metadata missing"));
    }

    #[test]
    fn test_stale_receipt_display() {
        let err = StoreError::StaleReceipt { message_id: 42 };
        assert!(format!("{}", err).contains("42"));
    }
}
