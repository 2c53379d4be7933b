//! Platform abstraction for CSI Node operations.
//!
//! The Node service shells out to host-local attachment tooling only
//! (`nvme`, `iscsiadm`, `mount`, `mkfs.*`, `resize2fs`, ...) — never to ZFS
//! tooling, which lives on the backend appliance. This module is the one
//! place those `Command` invocations live; `node.rs` never runs a process
//! directly.

mod linux;

pub use linux::{
    bind_mount, bind_mount_file, connect_iscsi, connect_nvmeof, device_size, disconnect_iscsi,
    disconnect_nvmeof, filesystem_signature, find_iscsi_device, find_nvmeof_device, format_device,
    grow_filesystem, is_mounted, mount_device, mount_nfs, needs_formatting, rescan_device,
    symlink_device, unmount, validate_fs_type, volume_usage, DEFAULT_FS_TYPE,
};

/// Result type for platform operations.
pub type PlatformResult<T> = Result<T, tonic::Status>;
