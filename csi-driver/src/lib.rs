//! CSI driver for a remote ZFS-backed NAS appliance.
//!
//! Kubernetes CSI driver that implements the Container Storage Interface
//! and communicates with the NAS appliance's JSON-RPC/WebSocket API
//! directly — no agent process in between.
//!
//! This library provides:
//! - CSI Identity, Controller, and Node service implementations
//! - The backend JSON-RPC client for the storage appliance
//! - Platform-specific mount/unmount operations for the Node service

/// CSI proto generated types
pub mod csi {
    tonic::include_proto!("csi.v1");
}

pub mod backend;
pub mod controller;
pub mod error;
pub mod identity;
pub mod locks;
pub mod metrics;
pub mod name_template;
pub mod node;
pub mod platform;
pub mod types;
pub mod volume_handle;

pub use backend::BackendClient;
pub use controller::ControllerService;
pub use identity::IdentityService;
pub use node::NodeService;
