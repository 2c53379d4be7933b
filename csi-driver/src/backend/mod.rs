//! The backend client: a single shared JSON-RPC-over-WebSocket session to
//! the storage appliance. All Controller operations funnel through
//! [`BackendClient::call`] or one of the typed wrappers in [`calls`]; no
//! other component opens a connection to the backend.

mod calls;
mod client;
mod error;
mod protocol;

pub use calls::{CreateDatasetParams, DatasetInfo, NfsShare, SnapshotInfo};
pub use client::{BackendClient, BackendConfig, ReadinessState};
pub use error::{BackendError, Result, ERR_ALREADY_EXISTS, ERR_DEPENDENT_CLONES, ERR_NOT_FOUND};
