use thiserror::Error;

/// Errors surfaced by [`super::BackendClient::call`].
///
/// Three kinds, matching the backend client's documented contract: domain
/// errors returned verbatim by the appliance, connection-lost errors the
/// caller may retry, and deadline-exceeded when the caller's context expires
/// before a reply arrives.
#[derive(Error, Debug, Clone)]
pub enum BackendError {
    #[error("backend rejected call: {message} (code {code})")]
    Domain { code: i64, message: String },

    #[error("backend connection lost: {0}")]
    ConnectionLost(String),

    #[error("deadline exceeded waiting for backend reply")]
    DeadlineExceeded,

    #[error("malformed backend frame: {0}")]
    Protocol(String),

    #[error("authentication with backend failed: {0}")]
    AuthFailed(String),
}

pub type Result<T> = std::result::Result<T, BackendError>;

impl From<BackendError> for tonic::Status {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::ConnectionLost(msg) => tonic::Status::unavailable(msg),
            BackendError::DeadlineExceeded => {
                tonic::Status::deadline_exceeded("backend call deadline exceeded")
            }
            BackendError::AuthFailed(msg) => tonic::Status::unavailable(msg),
            // Domain errors are resolved against the caller's own expectations
            // (e.g. "already exists") further up the stack; anything that
            // reaches this generic conversion falls back to INTERNAL with the
            // raw backend message preserved.
            BackendError::Domain { code, message } => {
                tonic::Status::internal(format!("backend error {code}: {message}"))
            }
            BackendError::Protocol(msg) => tonic::Status::internal(msg),
        }
    }
}

impl BackendError {
    /// True for conditions the JSON-RPC error taxonomy treats as an
    /// "already exists, mismatched spec" conflict.
    pub fn is_already_exists(&self) -> bool {
        matches!(self, BackendError::Domain { code, .. } if *code == ERR_ALREADY_EXISTS)
    }

    /// True for "no such dataset/snapshot" style domain errors, which the
    /// Controller's idempotent-delete paths translate into success.
    pub fn is_not_found(&self) -> bool {
        matches!(self, BackendError::Domain { code, .. } if *code == ERR_NOT_FOUND)
    }

    /// True when the appliance rejects a snapshot delete because a clone
    /// still depends on it. Covers the race between the Controller's
    /// pre-delete `clones` check and the delete call itself: if a clone
    /// appears in between, the appliance catches it here.
    pub fn is_dependent_clones(&self) -> bool {
        matches!(self, BackendError::Domain { code, .. } if *code == ERR_DEPENDENT_CLONES)
    }
}

/// Backend-defined JSON-RPC error codes this driver special-cases. All
/// other codes fall through to INTERNAL.
pub const ERR_NOT_FOUND: i64 = 1001;
pub const ERR_ALREADY_EXISTS: i64 = 1002;
pub const ERR_DEPENDENT_CLONES: i64 = 1003;
