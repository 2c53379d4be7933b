//! Driver-wide error taxonomy and its single mapping onto CSI gRPC status codes.
//!
//! Every fallible path in the controller and node services resolves to a
//! [`DriverError`] before it reaches tonic; `From<DriverError> for Status` is
//! the one place the driver's error-mapping table is encoded.

use thiserror::Error;

use crate::backend::BackendError;

#[derive(Error, Debug)]
pub enum DriverError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("'{0}' already exists with a different specification")]
    AlreadyExistsMismatched(String),

    #[error("snapshot '{snapshot_id}' has dependent clone(s): {dependents:?}")]
    SnapshotHasDependents {
        snapshot_id: String,
        dependents: Vec<String>,
    },

    #[error("malformed volume handle: {0}")]
    MalformedHandle(String),

    #[error("backend connection unavailable: {0}")]
    Unavailable(String),

    #[error("deadline exceeded waiting on backend")]
    DeadlineExceeded,

    #[error("operation not supported: {0}")]
    Unimplemented(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DriverError>;

impl From<DriverError> for tonic::Status {
    fn from(err: DriverError) -> Self {
        match err {
            DriverError::InvalidArgument(msg) => tonic::Status::invalid_argument(msg),
            DriverError::AlreadyExistsMismatched(msg) => tonic::Status::already_exists(msg),
            DriverError::SnapshotHasDependents {
                snapshot_id,
                dependents,
            } => tonic::Status::failed_precondition(format!(
                "snapshot {snapshot_id} has dependent clone(s): {}",
                dependents.join(", ")
            )),
            DriverError::Unavailable(msg) => tonic::Status::unavailable(msg),
            DriverError::DeadlineExceeded => tonic::Status::deadline_exceeded("backend call deadline exceeded"),
            DriverError::Unimplemented(msg) => tonic::Status::unimplemented(msg),
            DriverError::NotFound(msg) => tonic::Status::not_found(msg),
            DriverError::MalformedHandle(msg) => tonic::Status::invalid_argument(msg),
            DriverError::Backend(backend_err) => backend_err.into(),
            DriverError::Internal(msg) => tonic::Status::internal(msg),
            DriverError::Io(err) => tonic::Status::internal(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_argument_maps_to_invalid_argument_code() {
        let status: tonic::Status = DriverError::InvalidArgument("missing protocol".into()).into();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);
    }

    #[test]
    fn snapshot_dependents_map_to_failed_precondition() {
        let status: tonic::Status = DriverError::SnapshotHasDependents {
            snapshot_id: "tank/vol@snap1".into(),
            dependents: vec!["tank/vol-restored".into()],
        }
        .into();
        assert_eq!(status.code(), tonic::Code::FailedPrecondition);
        assert!(status.message().contains("tank/vol-restored"));
    }

    #[test]
    fn unavailable_maps_to_unavailable_code() {
        let status: tonic::Status = DriverError::Unavailable("connection lost".into()).into();
        assert_eq!(status.code(), tonic::Code::Unavailable);
    }

    #[test]
    fn deadline_exceeded_maps_to_deadline_exceeded_code() {
        let status: tonic::Status = DriverError::DeadlineExceeded.into();
        assert_eq!(status.code(), tonic::Code::DeadlineExceeded);
    }
}
