//! CSI Node service.
//!
//! Runs on every worker and owns host-side attachment: logging into
//! NVMe-oF/iSCSI targets, discovering the resulting block device,
//! formatting and mounting (or symlinking, for block mode), and reversing
//! all of that on unstage. This service never talks to the backend — every
//! piece of addressing it needs travels in the volume handle or the
//! StorageClass-derived volume context the Controller attached at
//! `CreateVolume` time. All host tooling runs through `crate::platform`.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};

use tonic::{Request, Response, Status};
use tracing::{info, warn};

use crate::csi;
use crate::error::DriverError;
use crate::locks::KeyedLockTable;
use crate::metrics::OperationTimer;
use crate::platform;
use crate::types::{Protocol, VolumeMode};
use crate::volume_handle::{Addressing, VolumeHandle};

const PARAM_FS_TYPE: &str = "fsType";
const PARAM_NFS_MOUNT_OPTIONS: &str = "nfsMountOptions";
const DEFAULT_NFS_MOUNT_OPTIONS: &str = "vers=4,hard,noresvport";

type NodeResult<T> = Result<T, DriverError>;

/// CSI Node service.
///
/// `stage_locks` serializes repeated stage/unstage calls against the same
/// staging path. `attach_locks` + `attach_refs` together implement
/// reference-counted NVMe-oF/iSCSI login: multiple
/// staged paths can share one target's login, and the host only logs out
/// once the last of them unstages.
pub struct NodeService {
    node_id: String,
    stage_locks: Arc<KeyedLockTable<String>>,
    attach_locks: Arc<KeyedLockTable<String>>,
    attach_refs: Mutex<HashMap<String, HashSet<String>>>,
}

impl NodeService {
    pub fn new(node_id: String) -> Self {
        Self {
            node_id,
            stage_locks: Arc::new(KeyedLockTable::new()),
            attach_locks: Arc::new(KeyedLockTable::new()),
            attach_refs: Mutex::new(HashMap::new()),
        }
    }

    fn record_attach(&self, target_id: &str, staging_target_path: &str) {
        let mut refs = self.attach_refs.lock().expect("attach ref table poisoned");
        refs.entry(target_id.to_string())
            .or_default()
            .insert(staging_target_path.to_string());
    }

    /// Removes `staging_target_path` from `target_id`'s reference set and
    /// reports whether that was the last reference (i.e. whether the host
    /// should now log out).
    fn forget_attach(&self, target_id: &str, staging_target_path: &str) -> bool {
        let mut refs = self.attach_refs.lock().expect("attach ref table poisoned");
        match refs.get_mut(target_id) {
            Some(paths) => {
                paths.remove(staging_target_path);
                let now_empty = paths.is_empty();
                if now_empty {
                    refs.remove(target_id);
                }
                now_empty
            }
            // No bookkeeping survives a process restart; best-effort logout.
            None => true,
        }
    }

    async fn do_node_stage_volume(
        &self,
        req: csi::NodeStageVolumeRequest,
    ) -> NodeResult<csi::NodeStageVolumeResponse> {
        if req.volume_id.is_empty() {
            return Err(DriverError::InvalidArgument("volume_id is required".into()));
        }
        if req.staging_target_path.is_empty() {
            return Err(DriverError::InvalidArgument("staging_target_path is required".into()));
        }
        let cap = req
            .volume_capability
            .as_ref()
            .ok_or_else(|| DriverError::InvalidArgument("volume_capability is required".into()))?;
        let requested_mode = volume_mode_of(cap)?;

        let handle = VolumeHandle::decode(&req.volume_id)?;
        if requested_mode != handle.volume_mode() {
            return Err(DriverError::InvalidArgument(format!(
                "requested volume mode '{requested_mode}' does not match the volume's provisioned mode '{}'",
                handle.volume_mode()
            )));
        }

        let _stage_guard = self.stage_locks.acquire(req.staging_target_path.clone()).await;

        if platform::is_mounted(&req.staging_target_path).map_err(from_platform_status)? {
            info!(staging_target_path = %req.staging_target_path, "volume already staged");
            return Ok(csi::NodeStageVolumeResponse {});
        }

        match &handle.addressing {
            Addressing::Nfs { export_path } => {
                let mount_options = req
                    .volume_context
                    .get(PARAM_NFS_MOUNT_OPTIONS)
                    .cloned()
                    .unwrap_or_else(|| DEFAULT_NFS_MOUNT_OPTIONS.to_string());
                let export = format!("{}:{}", handle.server, export_path);
                platform::mount_nfs(&export, &req.staging_target_path, &mount_options)
                    .map_err(from_platform_status)?;
            }
            Addressing::Nvmeof { nqn, addr, port, mode, .. } => {
                let target_id = format!("nvmeof:{nqn}");
                let _attach_guard = self.attach_locks.acquire(target_id.clone()).await;
                let device = platform::connect_nvmeof(nqn, Some(addr.as_str()), Some(&port.to_string()))
                    .map_err(from_platform_status)?;
                self.record_attach(&target_id, &req.staging_target_path);
                self.stage_device(&device, &req.staging_target_path, *mode, &req.volume_context)?;
            }
            Addressing::Iscsi { iqn, portal, mode, .. } => {
                let target_id = format!("iscsi:{iqn}");
                let _attach_guard = self.attach_locks.acquire(target_id.clone()).await;
                let device =
                    platform::connect_iscsi(iqn, Some(portal.as_str())).map_err(from_platform_status)?;
                self.record_attach(&target_id, &req.staging_target_path);
                self.stage_device(&device, &req.staging_target_path, *mode, &req.volume_context)?;
            }
        }

        info!(volume_id = %req.volume_id, staging_target_path = %req.staging_target_path, "volume staged");
        Ok(csi::NodeStageVolumeResponse {})
    }

    /// Prepares `device` at `staging_target_path`: a stable symlink for
    /// block mode, or a conditional mkfs + mount for filesystem mode.
    fn stage_device(
        &self,
        device: &str,
        staging_target_path: &str,
        mode: VolumeMode,
        volume_context: &HashMap<String, String>,
    ) -> NodeResult<()> {
        match mode {
            VolumeMode::Block => {
                platform::symlink_device(device, staging_target_path).map_err(from_platform_status)
            }
            VolumeMode::Filesystem => {
                let requested_fs_type = volume_context
                    .get(PARAM_FS_TYPE)
                    .map(|s| s.as_str())
                    .unwrap_or(platform::DEFAULT_FS_TYPE);
                let fs_type = platform::validate_fs_type(requested_fs_type).map_err(from_platform_status)?;
                if platform::needs_formatting(device).map_err(from_platform_status)? {
                    platform::format_device(device, fs_type).map_err(from_platform_status)?;
                }
                platform::mount_device(device, staging_target_path, fs_type).map_err(from_platform_status)
            }
        }
    }

    async fn do_node_unstage_volume(
        &self,
        req: csi::NodeUnstageVolumeRequest,
    ) -> NodeResult<csi::NodeUnstageVolumeResponse> {
        if req.volume_id.is_empty() {
            return Err(DriverError::InvalidArgument("volume_id is required".into()));
        }
        if req.staging_target_path.is_empty() {
            return Err(DriverError::InvalidArgument("staging_target_path is required".into()));
        }

        let _stage_guard = self.stage_locks.acquire(req.staging_target_path.clone()).await;

        platform::unmount(&req.staging_target_path).map_err(from_platform_status)?;
        // Block-mode staging leaves a symlink, not a mount; drop it too.
        if let Ok(meta) = std::fs::symlink_metadata(&req.staging_target_path) {
            if meta.file_type().is_symlink() {
                let _ = std::fs::remove_file(&req.staging_target_path);
            }
        }

        // An orphan or foreign handle has nothing left to detach: unstage is
        // still idempotently successful once the mount is gone.
        let handle = match VolumeHandle::decode(&req.volume_id) {
            Ok(h) => h,
            Err(_) => return Ok(csi::NodeUnstageVolumeResponse {}),
        };

        let target_id = match &handle.addressing {
            Addressing::Nfs { .. } => return Ok(csi::NodeUnstageVolumeResponse {}),
            Addressing::Nvmeof { nqn, .. } => format!("nvmeof:{nqn}"),
            Addressing::Iscsi { iqn, .. } => format!("iscsi:{iqn}"),
        };

        let _attach_guard = self.attach_locks.acquire(target_id.clone()).await;
        let last_reference = self.forget_attach(&target_id, &req.staging_target_path);

        if last_reference {
            match &handle.addressing {
                Addressing::Nvmeof { nqn, .. } => {
                    platform::disconnect_nvmeof(nqn).map_err(from_platform_status)?
                }
                Addressing::Iscsi { iqn, .. } => {
                    platform::disconnect_iscsi(iqn).map_err(from_platform_status)?
                }
                Addressing::Nfs { .. } => unreachable!("returned above"),
            }
        }

        info!(volume_id = %req.volume_id, staging_target_path = %req.staging_target_path, "volume unstaged");
        Ok(csi::NodeUnstageVolumeResponse {})
    }

    async fn do_node_publish_volume(
        &self,
        req: csi::NodePublishVolumeRequest,
    ) -> NodeResult<csi::NodePublishVolumeResponse> {
        if req.volume_id.is_empty() {
            return Err(DriverError::InvalidArgument("volume_id is required".into()));
        }
        if req.target_path.is_empty() {
            return Err(DriverError::InvalidArgument("target_path is required".into()));
        }
        if req.staging_target_path.is_empty() {
            return Err(DriverError::InvalidArgument(
                "staging_target_path is required (STAGE_UNSTAGE_VOLUME capability is enabled)".into(),
            ));
        }
        let cap = req
            .volume_capability
            .as_ref()
            .ok_or_else(|| DriverError::InvalidArgument("volume_capability is required".into()))?;
        let mode = volume_mode_of(cap)?;

        let handle = VolumeHandle::decode(&req.volume_id)?;
        if mode != handle.volume_mode() {
            return Err(DriverError::InvalidArgument(format!(
                "requested volume mode '{mode}' does not match the volume's provisioned mode '{}'",
                handle.volume_mode()
            )));
        }

        if !platform::is_mounted(&req.staging_target_path).map_err(from_platform_status)? {
            return Err(DriverError::InvalidArgument(format!(
                "volume not staged at '{}'",
                req.staging_target_path
            )));
        }

        if platform::is_mounted(&req.target_path).map_err(from_platform_status)? {
            info!(target_path = %req.target_path, "volume already published");
            return Ok(csi::NodePublishVolumeResponse {});
        }

        match mode {
            VolumeMode::Filesystem => {
                platform::bind_mount(&req.staging_target_path, &req.target_path).map_err(from_platform_status)?;
            }
            VolumeMode::Block => {
                let device = std::fs::read_link(&req.staging_target_path).map_err(|e| {
                    DriverError::Internal(format!("could not resolve staged device symlink: {e}"))
                })?;
                platform::bind_mount_file(&device.to_string_lossy(), &req.target_path)
                    .map_err(from_platform_status)?;
            }
        }

        info!(volume_id = %req.volume_id, target_path = %req.target_path, "volume published");
        Ok(csi::NodePublishVolumeResponse {})
    }

    async fn do_node_unpublish_volume(
        &self,
        req: csi::NodeUnpublishVolumeRequest,
    ) -> NodeResult<csi::NodeUnpublishVolumeResponse> {
        if req.volume_id.is_empty() {
            return Err(DriverError::InvalidArgument("volume_id is required".into()));
        }
        if req.target_path.is_empty() {
            return Err(DriverError::InvalidArgument("target_path is required".into()));
        }

        platform::unmount(&req.target_path).map_err(from_platform_status)?;

        if let Ok(meta) = std::fs::symlink_metadata(&req.target_path) {
            let removed = if meta.is_dir() {
                std::fs::remove_dir(&req.target_path)
            } else {
                std::fs::remove_file(&req.target_path)
            };
            if let Err(e) = removed {
                warn!(error = %e, target_path = %req.target_path, "could not remove published target path");
            }
        }

        info!(volume_id = %req.volume_id, target_path = %req.target_path, "volume unpublished");
        Ok(csi::NodeUnpublishVolumeResponse {})
    }

    async fn do_node_expand_volume(
        &self,
        req: csi::NodeExpandVolumeRequest,
    ) -> NodeResult<csi::NodeExpandVolumeResponse> {
        if req.volume_id.is_empty() {
            return Err(DriverError::InvalidArgument("volume_id is required".into()));
        }
        let path = if !req.staging_target_path.is_empty() {
            &req.staging_target_path
        } else {
            &req.volume_path
        };
        if path.is_empty() {
            return Err(DriverError::InvalidArgument(
                "staging_target_path or volume_path is required".into(),
            ));
        }

        let handle = VolumeHandle::decode(&req.volume_id)?;

        let capacity_bytes = match handle.protocol {
            Protocol::Nfs => {
                let (_avail, total) = platform::volume_usage(path).map_err(from_platform_status)?;
                total
            }
            Protocol::Nvmeof | Protocol::Iscsi => {
                let device = match &handle.addressing {
                    Addressing::Nvmeof { nqn, .. } => platform::find_nvmeof_device(nqn),
                    Addressing::Iscsi { iqn, .. } => platform::find_iscsi_device(iqn),
                    Addressing::Nfs { .. } => unreachable!("protocol matched above"),
                }
                .map_err(from_platform_status)?;

                platform::rescan_device(&device).map_err(from_platform_status)?;

                match handle.volume_mode() {
                    VolumeMode::Block => platform::device_size(&device).map_err(from_platform_status)? as i64,
                    VolumeMode::Filesystem => {
                        platform::grow_filesystem(&device, path).map_err(from_platform_status)?;
                        let (_avail, total) = platform::volume_usage(path).map_err(from_platform_status)?;
                        total
                    }
                }
            }
        };

        info!(volume_id = %req.volume_id, capacity_bytes, "volume expanded on node");
        Ok(csi::NodeExpandVolumeResponse { capacity_bytes })
    }

    async fn do_node_get_volume_stats(
        &self,
        req: csi::NodeGetVolumeStatsRequest,
    ) -> NodeResult<csi::NodeGetVolumeStatsResponse> {
        if req.volume_id.is_empty() {
            return Err(DriverError::InvalidArgument("volume_id is required".into()));
        }
        let path = if !req.volume_path.is_empty() {
            &req.volume_path
        } else {
            &req.staging_target_path
        };
        if path.is_empty() {
            return Err(DriverError::InvalidArgument(
                "volume_path or staging_target_path is required".into(),
            ));
        }

        let handle = VolumeHandle::decode(&req.volume_id)?;

        let usage = match handle.volume_mode() {
            VolumeMode::Filesystem => {
                if !platform::is_mounted(path).map_err(from_platform_status)? {
                    return Err(DriverError::NotFound(format!("volume not mounted at '{path}'")));
                }
                let (available, total) = platform::volume_usage(path).map_err(from_platform_status)?;
                csi::VolumeUsage {
                    available,
                    total,
                    used: total - available,
                    unit: csi::volume_usage::Unit::Bytes as i32,
                }
            }
            VolumeMode::Block => {
                let device = std::fs::read_link(path)
                    .map_err(|_| DriverError::NotFound(format!("volume not staged at '{path}'")))?;
                let size = platform::device_size(&device.to_string_lossy()).map_err(from_platform_status)? as i64;
                csi::VolumeUsage {
                    available: 0,
                    total: size,
                    used: size,
                    unit: csi::volume_usage::Unit::Bytes as i32,
                }
            }
        };

        Ok(csi::NodeGetVolumeStatsResponse {
            usage: vec![usage],
            volume_condition: None,
        })
    }
}

fn volume_mode_of(cap: &csi::VolumeCapability) -> NodeResult<VolumeMode> {
    match &cap.access_type {
        Some(csi::volume_capability::AccessType::Block(_)) => Ok(VolumeMode::Block),
        Some(csi::volume_capability::AccessType::Mount(_)) => Ok(VolumeMode::Filesystem),
        None => Err(DriverError::InvalidArgument("volume capability is missing access_type".into())),
    }
}

/// `crate::platform` speaks `tonic::Status` directly since it has no backend
/// call to fail; fold it back into the one driver-wide taxonomy so node.rs
/// handlers look the same shape as controller.rs's.
fn from_platform_status(status: Status) -> DriverError {
    match status.code() {
        tonic::Code::InvalidArgument => DriverError::InvalidArgument(status.message().to_string()),
        tonic::Code::NotFound => DriverError::NotFound(status.message().to_string()),
        tonic::Code::Unimplemented => DriverError::Unimplemented(status.message().to_string()),
        tonic::Code::FailedPrecondition => DriverError::InvalidArgument(status.message().to_string()),
        _ => DriverError::Internal(status.message().to_string()),
    }
}

/// Times one RPC and maps its [`DriverError`] onto the matching
/// [`tonic::Status`], mirroring controller.rs's `finish`.
fn finish<T>(timer: OperationTimer, result: NodeResult<T>) -> Result<Response<T>, Status>
where
    T: Send + 'static,
{
    match result {
        Ok(value) => {
            timer.success();
            Ok(Response::new(value))
        }
        Err(err) => {
            let status: Status = err.into();
            timer.failure(&format!("{:?}", status.code()));
            Err(status)
        }
    }
}

#[tonic::async_trait]
impl csi::node_server::Node for NodeService {
    async fn node_stage_volume(
        &self,
        request: Request<csi::NodeStageVolumeRequest>,
    ) -> Result<Response<csi::NodeStageVolumeResponse>, Status> {
        let timer = OperationTimer::new("NodeStageVolume");
        let result = self.do_node_stage_volume(request.into_inner()).await;
        finish(timer, result)
    }

    async fn node_unstage_volume(
        &self,
        request: Request<csi::NodeUnstageVolumeRequest>,
    ) -> Result<Response<csi::NodeUnstageVolumeResponse>, Status> {
        let timer = OperationTimer::new("NodeUnstageVolume");
        let result = self.do_node_unstage_volume(request.into_inner()).await;
        finish(timer, result)
    }

    async fn node_publish_volume(
        &self,
        request: Request<csi::NodePublishVolumeRequest>,
    ) -> Result<Response<csi::NodePublishVolumeResponse>, Status> {
        let timer = OperationTimer::new("NodePublishVolume");
        let result = self.do_node_publish_volume(request.into_inner()).await;
        finish(timer, result)
    }

    async fn node_unpublish_volume(
        &self,
        request: Request<csi::NodeUnpublishVolumeRequest>,
    ) -> Result<Response<csi::NodeUnpublishVolumeResponse>, Status> {
        let timer = OperationTimer::new("NodeUnpublishVolume");
        let result = self.do_node_unpublish_volume(request.into_inner()).await;
        finish(timer, result)
    }

    async fn node_get_info(
        &self,
        _request: Request<csi::NodeGetInfoRequest>,
    ) -> Result<Response<csi::NodeGetInfoResponse>, Status> {
        Ok(Response::new(csi::NodeGetInfoResponse {
            node_id: self.node_id.clone(),
            // The backend has no rack/zone topology to report.
            max_volumes_per_node: 0,
            accessible_topology: None,
        }))
    }

    async fn node_get_capabilities(
        &self,
        _request: Request<csi::NodeGetCapabilitiesRequest>,
    ) -> Result<Response<csi::NodeGetCapabilitiesResponse>, Status> {
        use csi::node_service_capability::{rpc::Type as RpcType, Rpc, Type};

        let capability = |t: RpcType| csi::NodeServiceCapability {
            r#type: Some(Type::Rpc(Rpc { r#type: t as i32 })),
        };

        Ok(Response::new(csi::NodeGetCapabilitiesResponse {
            capabilities: vec![
                capability(RpcType::StageUnstageVolume),
                capability(RpcType::ExpandVolume),
            ],
        }))
    }

    async fn node_expand_volume(
        &self,
        request: Request<csi::NodeExpandVolumeRequest>,
    ) -> Result<Response<csi::NodeExpandVolumeResponse>, Status> {
        let timer = OperationTimer::new("NodeExpandVolume");
        let result = self.do_node_expand_volume(request.into_inner()).await;
        finish(timer, result)
    }

    async fn node_get_volume_stats(
        &self,
        request: Request<csi::NodeGetVolumeStatsRequest>,
    ) -> Result<Response<csi::NodeGetVolumeStatsResponse>, Status> {
        let timer = OperationTimer::new("NodeGetVolumeStats");
        let result = self.do_node_get_volume_stats(request.into_inner()).await;
        finish(timer, result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block_cap() -> csi::VolumeCapability {
        csi::VolumeCapability {
            access_type: Some(csi::volume_capability::AccessType::Block(
                csi::volume_capability::BlockVolume {},
            )),
            access_mode: None,
        }
    }

    fn mount_cap() -> csi::VolumeCapability {
        csi::VolumeCapability {
            access_type: Some(csi::volume_capability::AccessType::Mount(
                csi::volume_capability::MountVolume {
                    fs_type: "ext4".into(),
                    mount_flags: vec![],
                },
            )),
            access_mode: None,
        }
    }

    #[test]
    fn volume_mode_of_distinguishes_block_and_mount() {
        assert_eq!(volume_mode_of(&block_cap()).unwrap(), VolumeMode::Block);
        assert_eq!(volume_mode_of(&mount_cap()).unwrap(), VolumeMode::Filesystem);
    }

    #[test]
    fn volume_mode_of_rejects_missing_access_type() {
        let cap = csi::VolumeCapability { access_type: None, access_mode: None };
        assert!(volume_mode_of(&cap).is_err());
    }

    #[tokio::test]
    async fn node_get_info_reports_configured_node_id() {
        let service = NodeService::new("node-a".to_string());
        let request = Request::new(csi::NodeGetInfoRequest {});
        let response = csi::node_server::Node::node_get_info(&service, request)
            .await
            .unwrap();
        assert_eq!(response.into_inner().node_id, "node-a");
    }

    #[tokio::test]
    async fn node_get_capabilities_advertises_stage_and_expand() {
        let service = NodeService::new("node-a".to_string());
        let request = Request::new(csi::NodeGetCapabilitiesRequest {});
        let response = csi::node_server::Node::node_get_capabilities(&service, request)
            .await
            .unwrap();
        assert_eq!(response.into_inner().capabilities.len(), 2);
    }

    #[test]
    fn attach_refcounting_logs_out_only_on_last_reference() {
        let service = NodeService::new("node-a".to_string());
        service.record_attach("iscsi:iqn.example:vol-a", "/staging/a");
        service.record_attach("iscsi:iqn.example:vol-a", "/staging/b");

        assert!(!service.forget_attach("iscsi:iqn.example:vol-a", "/staging/a"));
        assert!(service.forget_attach("iscsi:iqn.example:vol-a", "/staging/b"));
    }

    #[test]
    fn forget_attach_with_no_bookkeeping_is_best_effort_true() {
        let service = NodeService::new("node-a".to_string());
        assert!(service.forget_attach("iscsi:unknown", "/staging/x"));
    }

    #[tokio::test]
    async fn node_stage_volume_rejects_empty_volume_id() {
        let service = NodeService::new("node-a".to_string());
        let err = service
            .do_node_stage_volume(csi::NodeStageVolumeRequest {
                volume_id: String::new(),
                staging_target_path: "/staging/a".into(),
                volume_capability: Some(mount_cap()),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn node_stage_volume_rejects_mode_mismatch() {
        let service = NodeService::new("node-a".to_string());
        let handle = crate::volume_handle::VolumeHandle {
            protocol: Protocol::Iscsi,
            server: "nas.example".into(),
            dataset_path: "tank/pv-a".into(),
            addressing: Addressing::Iscsi {
                iqn: "iqn.2024-01.example.com:pv-a".into(),
                lun: 0,
                portal: "10.0.0.5:3260".into(),
                mode: VolumeMode::Filesystem,
            },
        };
        let err = service
            .do_node_stage_volume(csi::NodeStageVolumeRequest {
                volume_id: handle.encode(),
                staging_target_path: "/staging/a".into(),
                volume_capability: Some(block_cap()),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn node_publish_volume_requires_staging_path() {
        let service = NodeService::new("node-a".to_string());
        let err = service
            .do_node_publish_volume(csi::NodePublishVolumeRequest {
                volume_id: "nfs#nas#tank/a#/tank/a".into(),
                staging_target_path: String::new(),
                target_path: "/pods/a".into(),
                volume_capability: Some(mount_cap()),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::InvalidArgument(_)));
    }
}
