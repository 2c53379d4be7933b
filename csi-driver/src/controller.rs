//! CSI Controller service.
//!
//! Every mutating RPC here follows the same shape: decode/validate input,
//! acquire the per-resource key from the operation lock table, query the
//! backend for existing state, and treat "already correct" as success. No
//! RPC in this file shells out to anything — the backend JSON-RPC session
//! is the only thing this service talks to.

use std::collections::HashMap;
use std::sync::Arc;

use tonic::{Request, Response, Status};
use tracing::{info, warn};

use crate::backend::{BackendClient, BackendError, CreateDatasetParams, DatasetInfo};
use crate::csi;
use crate::error::{DriverError, Result as DriverResult};
use crate::locks::KeyedLockTable;
use crate::metrics::{self, OperationTimer};
use crate::name_template::{self, NameIdentity};
use crate::types::{DeleteStrategy, Protocol, VolumeMode};
use crate::volume_handle::{Addressing, VolumeHandle};

const DEFAULT_VOLUME_SIZE: u64 = 1024 * 1024 * 1024; // 1 GiB when no capacity is requested.

const PVC_NAMESPACE_KEY: &str = "csi.storage.k8s.io/pvc/namespace";
const PVC_NAME_KEY: &str = "csi.storage.k8s.io/pvc/name";
const PV_NAME_KEY: &str = "csi.storage.k8s.io/pv/name";
const SNAPSHOT_NAMESPACE_KEY: &str = "csi.storage.k8s.io/volumesnapshot/namespace";
const SNAPSHOT_NAME_KEY: &str = "csi.storage.k8s.io/volumesnapshot/name";

const PARAM_PROTOCOL: &str = "protocol";
const PARAM_SERVER: &str = "server";
const PARAM_POOL: &str = "pool";
const PARAM_PARENT_DATASET: &str = "parentDataset";
const PARAM_DELETE_STRATEGY: &str = "deleteStrategy";
const PARAM_NFS_MOUNT_OPTIONS: &str = "nfsMountOptions";
const PARAM_NAME_TEMPLATE: &str = "nameTemplate";
const PARAM_NAME_PREFIX: &str = "namePrefix";
const PARAM_NAME_SUFFIX: &str = "nameSuffix";
const PARAM_DETACHED: &str = "detachedVolumesFromSnapshots";
const PARAM_FS_TYPE: &str = "fsType";
const PARAM_NVMEOF_TRANSPORT: &str = "nvmeofTransport";
const PARAM_NVMEOF_PORT: &str = "nvmeofPort";
const PARAM_ISCSI_PORT: &str = "iscsiPort";
const ZFS_PROPERTY_PREFIX: &str = "zfs.";

const DEFAULT_NFS_MOUNT_OPTIONS: &str = "vers=4,hard,noresvport";
const DEFAULT_FS_TYPE: &str = "ext4";
const DEFAULT_NVMEOF_TRANSPORT: &str = "tcp";

/// StorageClass parameters, parsed and validated once per `CreateVolume`.
#[derive(Debug, Clone)]
struct StorageClassParams {
    protocol: Protocol,
    server: String,
    parent_dataset: String,
    delete_strategy: DeleteStrategy,
    nfs_mount_options: String,
    name_template: Option<String>,
    name_prefix: String,
    name_suffix: String,
    detached_from_snapshots: bool,
    fs_type: String,
    nvmeof_transport: String,
    nvmeof_port: u16,
    iscsi_port: u16,
    zfs_properties: HashMap<String, String>,
}

impl StorageClassParams {
    fn parse(parameters: &HashMap<String, String>) -> DriverResult<Self> {
        let protocol: Protocol = parameters
            .get(PARAM_PROTOCOL)
            .ok_or_else(|| DriverError::InvalidArgument(format!("'{PARAM_PROTOCOL}' parameter is required")))?
            .parse()
            .map_err(|e: crate::types::ProtocolParseError| DriverError::InvalidArgument(e.to_string()))?;

        let server = parameters
            .get(PARAM_SERVER)
            .ok_or_else(|| DriverError::InvalidArgument(format!("'{PARAM_SERVER}' parameter is required")))?
            .clone();

        let pool = parameters
            .get(PARAM_POOL)
            .ok_or_else(|| DriverError::InvalidArgument(format!("'{PARAM_POOL}' parameter is required")))?
            .clone();

        let parent_dataset = match parameters.get(PARAM_PARENT_DATASET) {
            Some(sub) if !sub.is_empty() => format!("{pool}/{sub}"),
            _ => pool,
        };

        let delete_strategy = parameters
            .get(PARAM_DELETE_STRATEGY)
            .map(|s| s.as_str())
            .unwrap_or("")
            .parse()
            .map_err(|e: crate::types::DeleteStrategyParseError| DriverError::InvalidArgument(e.to_string()))?;

        let nfs_mount_options = parameters
            .get(PARAM_NFS_MOUNT_OPTIONS)
            .cloned()
            .unwrap_or_else(|| DEFAULT_NFS_MOUNT_OPTIONS.to_string());

        let fs_type = parameters
            .get(PARAM_FS_TYPE)
            .cloned()
            .unwrap_or_else(|| DEFAULT_FS_TYPE.to_string());

        let detached_from_snapshots = parameters
            .get(PARAM_DETACHED)
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        let nvmeof_transport = parameters
            .get(PARAM_NVMEOF_TRANSPORT)
            .cloned()
            .unwrap_or_else(|| DEFAULT_NVMEOF_TRANSPORT.to_string());

        let nvmeof_port = parse_port(parameters, PARAM_NVMEOF_PORT, Protocol::Nvmeof.default_port())?;
        let iscsi_port = parse_port(parameters, PARAM_ISCSI_PORT, Protocol::Iscsi.default_port())?;

        let mut zfs_properties = HashMap::new();
        for (key, value) in parameters {
            if let Some(prop) = key.strip_prefix(ZFS_PROPERTY_PREFIX) {
                zfs_properties.insert(prop.to_string(), value.clone());
            } else if !is_known_or_sidecar_param(key) {
                warn!(parameter = %key, "ignoring unknown StorageClass parameter");
            }
        }

        Ok(Self {
            protocol,
            server,
            parent_dataset,
            delete_strategy,
            nfs_mount_options,
            name_template: parameters.get(PARAM_NAME_TEMPLATE).cloned(),
            name_prefix: parameters.get(PARAM_NAME_PREFIX).cloned().unwrap_or_default(),
            name_suffix: parameters.get(PARAM_NAME_SUFFIX).cloned().unwrap_or_default(),
            detached_from_snapshots,
            fs_type,
            nvmeof_transport,
            nvmeof_port,
            iscsi_port,
            zfs_properties,
        })
    }
}

fn parse_port(parameters: &HashMap<String, String>, key: &str, default: u16) -> DriverResult<u16> {
    match parameters.get(key) {
        None => Ok(default),
        Some(v) => v
            .parse()
            .map_err(|_| DriverError::InvalidArgument(format!("'{key}' must be a valid port number, got '{v}'"))),
    }
}

fn is_known_or_sidecar_param(key: &str) -> bool {
    key.starts_with("csi.storage.k8s.io/")
        || matches!(
            key,
            PARAM_PROTOCOL
                | PARAM_SERVER
                | PARAM_POOL
                | PARAM_PARENT_DATASET
                | PARAM_DELETE_STRATEGY
                | PARAM_NFS_MOUNT_OPTIONS
                | PARAM_NAME_TEMPLATE
                | PARAM_NAME_PREFIX
                | PARAM_NAME_SUFFIX
                | PARAM_DETACHED
                | PARAM_FS_TYPE
                | PARAM_NVMEOF_TRANSPORT
                | PARAM_NVMEOF_PORT
                | PARAM_ISCSI_PORT
        )
}

/// Resolves the requested access mode from `VolumeCapability`s. Rejects an
/// empty list, a missing `access_type`, and mixed block/mount requests in a
/// single call.
fn resolve_volume_mode(protocol: Protocol, caps: &[csi::VolumeCapability]) -> DriverResult<VolumeMode> {
    if caps.is_empty() {
        return Err(DriverError::InvalidArgument("at least one volume capability is required".into()));
    }

    let mut modes = std::collections::HashSet::new();
    for cap in caps {
        match &cap.access_type {
            Some(csi::volume_capability::AccessType::Block(_)) => {
                modes.insert(VolumeMode::Block);
            }
            Some(csi::volume_capability::AccessType::Mount(_)) => {
                modes.insert(VolumeMode::Filesystem);
            }
            None => return Err(DriverError::InvalidArgument("volume capability is missing access_type".into())),
        }
    }
    if modes.len() > 1 {
        return Err(DriverError::InvalidArgument(
            "cannot mix block and mount volume capabilities in one request".into(),
        ));
    }
    let mode = *modes.iter().next().expect("modes checked non-empty above");
    if mode == VolumeMode::Block && !protocol.supports_block_mode() {
        return Err(DriverError::InvalidArgument(format!(
            "block volume mode is not supported for protocol '{protocol}'"
        )));
    }
    Ok(mode)
}

fn required_capacity(range: Option<&csi::CapacityRange>) -> DriverResult<u64> {
    let Some(range) = range else {
        return Ok(DEFAULT_VOLUME_SIZE);
    };
    if range.required_bytes < 0 || range.limit_bytes < 0 {
        return Err(DriverError::InvalidArgument("capacity_range bytes must not be negative".into()));
    }
    if range.limit_bytes > 0 && range.required_bytes > range.limit_bytes {
        return Err(DriverError::InvalidArgument(
            "capacity_range required_bytes exceeds limit_bytes".into(),
        ));
    }
    if range.required_bytes > 0 {
        Ok(range.required_bytes as u64)
    } else if range.limit_bytes > 0 {
        Ok(range.limit_bytes as u64)
    } else {
        Ok(DEFAULT_VOLUME_SIZE)
    }
}

/// A dataset's effective provisioned capacity: the ZVOL size for block
/// protocols, the `quota` property for NFS filesystem datasets.
fn dataset_capacity(info: &DatasetInfo, protocol: Protocol) -> u64 {
    match protocol {
        Protocol::Nfs => info
            .properties
            .get("quota")
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(info.used + info.available),
        Protocol::Nvmeof | Protocol::Iscsi => info.volsize.unwrap_or(0),
    }
}

fn dataset_protocol(info: &DatasetInfo) -> Option<Protocol> {
    info.properties.get("csi:protocol").and_then(|v| v.parse().ok())
}

fn zfs_properties_for(params: &StorageClassParams, protocol: Protocol, capacity: u64) -> HashMap<String, String> {
    let mut properties = params.zfs_properties.clone();
    properties.insert("csi:protocol".to_string(), protocol.to_string());
    properties.insert("csi:deleteStrategy".to_string(), params.delete_strategy.to_string());
    if protocol == Protocol::Nfs {
        properties.insert("quota".to_string(), capacity.to_string());
    }
    properties
}

fn volsize_for(protocol: Protocol, capacity: u64) -> Option<u64> {
    match protocol {
        Protocol::Nfs => None,
        Protocol::Nvmeof | Protocol::Iscsi => Some(capacity),
    }
}

fn nfs_export_path(dataset_path: &str) -> String {
    format!("/{dataset_path}")
}

fn nvmeof_nqn(dataset_path: &str) -> String {
    format!("nqn.2011-06.io.zfs-csi:{}", dataset_path.replace('/', ":"))
}

fn iscsi_iqn(dataset_path: &str) -> String {
    format!("iqn.2011-06.io.zfs-csi:{}", dataset_path.replace('/', ":"))
}

fn zvol_device_path(dataset_path: &str) -> String {
    format!("zvol/{dataset_path}")
}

/// Maps a backend rejection of a create/update call onto
/// `AlreadyExistsMismatched` when the appliance reports the dataset already
/// exists with a conflicting spec, and passes everything else through
/// unchanged.
fn map_create_conflict(err: BackendError, full_path: &str) -> DriverError {
    if err.is_already_exists() {
        DriverError::AlreadyExistsMismatched(full_path.to_string())
    } else {
        DriverError::Backend(err)
    }
}

pub struct ControllerService {
    backend: Arc<BackendClient>,
    volume_locks: Arc<KeyedLockTable<String>>,
    snapshot_locks: Arc<KeyedLockTable<String>>,
}

impl ControllerService {
    pub fn new(backend: Arc<BackendClient>) -> Self {
        Self {
            backend,
            volume_locks: Arc::new(KeyedLockTable::new()),
            snapshot_locks: Arc::new(KeyedLockTable::new()),
        }
    }

    async fn create_fresh(
        &self,
        params: &StorageClassParams,
        protocol: Protocol,
        capacity: u64,
        full_path: &str,
    ) -> DriverResult<DatasetInfo> {
        let properties = zfs_properties_for(params, protocol, capacity);
        let volsize = volsize_for(protocol, capacity);
        self.backend
            .dataset_create(CreateDatasetParams {
                name: full_path,
                volsize,
                properties: &properties,
            })
            .await
            .map_err(|e| map_create_conflict(e, full_path))
    }

    /// Restores (clone or detached send/receive, per `detachedVolumesFromSnapshots`)
    /// a dataset from `snapshot_id` onto `full_path`, then applies the
    /// requested capacity and bookkeeping properties on top.
    async fn create_from_snapshot(
        &self,
        params: &StorageClassParams,
        protocol: Protocol,
        capacity: u64,
        full_path: &str,
        snapshot_id: &str,
    ) -> DriverResult<DatasetInfo> {
        if params.detached_from_snapshots {
            self.backend.snapshot_send_receive(snapshot_id, full_path).await?;
        } else {
            self.backend.snapshot_clone(snapshot_id, full_path).await?;
        }
        let properties = zfs_properties_for(params, protocol, capacity);
        let volsize = volsize_for(protocol, capacity);
        self.backend
            .dataset_update(full_path, volsize, &properties)
            .await
            .map_err(|e| map_create_conflict(e, full_path))
    }

    /// PVC-clone content source: snapshot the source volume, restore from
    /// that snapshot, then best-effort clean up the intermediate snapshot.
    /// Failure to clean up doesn't fail the already-successful volume
    /// creation.
    async fn create_from_volume(
        &self,
        params: &StorageClassParams,
        protocol: Protocol,
        capacity: u64,
        full_path: &str,
        source_volume_id: &str,
    ) -> DriverResult<DatasetInfo> {
        let source_handle = VolumeHandle::decode(source_volume_id)?;
        let tmp_snapshot_name = format!("csi-clone-{}", uuid::Uuid::new_v4());
        let snap = self
            .backend
            .snapshot_create(&source_handle.dataset_path, &tmp_snapshot_name)
            .await?;

        let result = self
            .create_from_snapshot(params, protocol, capacity, full_path, &snap.id)
            .await;

        if let Err(e) = self.backend.snapshot_delete(&snap.id).await {
            warn!(error = %e, snapshot_id = %snap.id, "failed to clean up intermediate clone snapshot");
        }
        result
    }

    async fn ensure_protocol_wiring(
        &self,
        params: &StorageClassParams,
        mode: VolumeMode,
        full_path: &str,
    ) -> DriverResult<Addressing> {
        match params.protocol {
            Protocol::Nfs => {
                let export_path = nfs_export_path(full_path);
                self.backend.nfs_share_create(&export_path, &params.nfs_mount_options).await?;
                Ok(Addressing::Nfs { export_path })
            }
            Protocol::Nvmeof => {
                let nqn = nvmeof_nqn(full_path);
                let device_path = zvol_device_path(full_path);
                self.backend.nvmet_subsys_create(&nqn).await?;
                self.backend.nvmet_namespace_create(&nqn, 1, &device_path).await?;
                self.backend
                    .nvmet_port_subsys_create(&nqn, params.nvmeof_port, &params.nvmeof_transport)
                    .await?;
                Ok(Addressing::Nvmeof {
                    nqn,
                    nsid: 1,
                    transport: params.nvmeof_transport.clone(),
                    addr: params.server.clone(),
                    port: params.nvmeof_port,
                    mode,
                })
            }
            Protocol::Iscsi => {
                let iqn = iscsi_iqn(full_path);
                let device_path = zvol_device_path(full_path);
                self.backend.iscsi_target_create(&iqn).await?;
                self.backend.iscsi_extent_create(&iqn, &device_path, 0).await?;
                let portal = format!("{}:{}", params.server, params.iscsi_port);
                Ok(Addressing::Iscsi { iqn, lun: 0, portal, mode })
            }
        }
    }

    async fn teardown_protocol_wiring(&self, handle: &VolumeHandle) -> DriverResult<()> {
        match handle.protocol {
            Protocol::Nfs => {
                let export_path = nfs_export_path(&handle.dataset_path);
                self.backend.nfs_share_delete(&export_path).await?;
            }
            Protocol::Nvmeof => {
                let nqn = nvmeof_nqn(&handle.dataset_path);
                self.backend.nvmet_namespace_delete(&nqn, 1).await?;
                self.backend.nvmet_subsys_delete(&nqn).await?;
            }
            Protocol::Iscsi => {
                let iqn = iscsi_iqn(&handle.dataset_path);
                self.backend.iscsi_extent_delete(&iqn, 0).await?;
                self.backend.iscsi_target_delete(&iqn).await?;
            }
        }
        Ok(())
    }

    async fn do_create_volume(&self, req: csi::CreateVolumeRequest) -> DriverResult<csi::CreateVolumeResponse> {
        if req.name.is_empty() {
            return Err(DriverError::InvalidArgument("name is required".into()));
        }
        let params = StorageClassParams::parse(&req.parameters)?;
        let mode = resolve_volume_mode(params.protocol, &req.volume_capabilities)?;
        let capacity = required_capacity(req.capacity_range.as_ref())?;

        let identity = NameIdentity {
            pvc_namespace: req.parameters.get(PVC_NAMESPACE_KEY).cloned().unwrap_or_default(),
            pvc_name: req.parameters.get(PVC_NAME_KEY).cloned().unwrap_or_default(),
            pv_name: req
                .parameters
                .get(PV_NAME_KEY)
                .cloned()
                .unwrap_or_else(|| req.name.clone()),
            name: req.name.clone(),
        };
        let leaf = name_template::render(&identity, params.name_template.as_deref(), &params.name_prefix, &params.name_suffix)?;
        let full_path = format!("{}/{}", params.parent_dataset, leaf);

        let _guard = self.volume_locks.acquire(full_path.clone()).await;

        let dataset = match self.backend.dataset_query(&full_path).await? {
            Some(existing) => {
                let existing_capacity = dataset_capacity(&existing, params.protocol);
                if existing_capacity != capacity || dataset_protocol(&existing) != Some(params.protocol) {
                    return Err(DriverError::AlreadyExistsMismatched(full_path));
                }
                existing
            }
            None => match &req.volume_content_source {
                None => self.create_fresh(&params, params.protocol, capacity, &full_path).await?,
                Some(src) => match &src.r#type {
                    Some(csi::volume_content_source::Type::Snapshot(s)) => {
                        self.create_from_snapshot(&params, params.protocol, capacity, &full_path, &s.snapshot_id)
                            .await?
                    }
                    Some(csi::volume_content_source::Type::Volume(v)) => {
                        self.create_from_volume(&params, params.protocol, capacity, &full_path, &v.volume_id)
                            .await?
                    }
                    None => {
                        return Err(DriverError::InvalidArgument(
                            "volume_content_source set without a snapshot or volume source".into(),
                        ));
                    }
                },
            },
        };

        let addressing = self.ensure_protocol_wiring(&params, mode, &full_path).await?;
        let handle = VolumeHandle {
            protocol: params.protocol,
            server: params.server.clone(),
            dataset_path: full_path.clone(),
            addressing,
        };

        let capacity_bytes = dataset_capacity(&dataset, params.protocol).max(capacity);
        metrics::set_volume_capacity_bytes(&handle.encode(), capacity_bytes);

        let mut volume_context = HashMap::new();
        volume_context.insert("fsType".to_string(), params.fs_type.clone());
        volume_context.insert("nfsMountOptions".to_string(), params.nfs_mount_options.clone());
        volume_context.insert("protocol".to_string(), params.protocol.to_string());

        info!(volume_id = %handle.encode(), capacity_bytes, "volume ready");

        Ok(csi::CreateVolumeResponse {
            volume: Some(csi::Volume {
                capacity_bytes: capacity_bytes as i64,
                volume_id: handle.encode(),
                volume_context,
                content_source: req.volume_content_source.clone(),
                accessible_topology: Vec::new(),
            }),
        })
    }

    async fn do_delete_volume(&self, req: csi::DeleteVolumeRequest) -> DriverResult<csi::DeleteVolumeResponse> {
        // A handle that no longer decodes has nothing left to delete.
        let handle = match VolumeHandle::decode(&req.volume_id) {
            Ok(h) => h,
            Err(_) => return Ok(csi::DeleteVolumeResponse {}),
        };
        let _guard = self.volume_locks.acquire(handle.dataset_path.clone()).await;

        let delete_strategy = match self.backend.dataset_query(&handle.dataset_path).await? {
            Some(info) => info
                .properties
                .get("csi:deleteStrategy")
                .and_then(|v| v.parse::<DeleteStrategy>().ok())
                .unwrap_or_default(),
            None => return Ok(csi::DeleteVolumeResponse {}),
        };

        if delete_strategy == DeleteStrategy::Retain {
            info!(dataset = %handle.dataset_path, "delete strategy is retain, leaving dataset in place");
            return Ok(csi::DeleteVolumeResponse {});
        }

        self.teardown_protocol_wiring(&handle).await?;
        self.backend.dataset_delete(&handle.dataset_path).await?;
        Ok(csi::DeleteVolumeResponse {})
    }

    async fn do_controller_expand_volume(
        &self,
        req: csi::ControllerExpandVolumeRequest,
    ) -> DriverResult<csi::ControllerExpandVolumeResponse> {
        let handle = VolumeHandle::decode(&req.volume_id)?;
        let new_capacity = required_capacity(req.capacity_range.as_ref())?;
        let _guard = self.volume_locks.acquire(handle.dataset_path.clone()).await;

        let existing = self
            .backend
            .dataset_query(&handle.dataset_path)
            .await?
            .ok_or_else(|| DriverError::NotFound(format!("dataset '{}' not found", handle.dataset_path)))?;

        let current_capacity = dataset_capacity(&existing, handle.protocol);
        let node_expansion_required = handle.protocol != Protocol::Nfs;

        if current_capacity >= new_capacity {
            // Capacity is monotonic: never shrink, and a repeat call for an
            // already-applied expansion is a no-op success.
            return Ok(csi::ControllerExpandVolumeResponse {
                capacity_bytes: current_capacity as i64,
                node_expansion_required,
            });
        }

        let volsize = volsize_for(handle.protocol, new_capacity);
        let mut properties = HashMap::new();
        if handle.protocol == Protocol::Nfs {
            properties.insert("quota".to_string(), new_capacity.to_string());
        }
        self.backend.dataset_update(&handle.dataset_path, volsize, &properties).await?;
        metrics::set_volume_capacity_bytes(&handle.encode(), new_capacity);

        Ok(csi::ControllerExpandVolumeResponse {
            capacity_bytes: new_capacity as i64,
            node_expansion_required,
        })
    }

    async fn do_create_snapshot(&self, req: csi::CreateSnapshotRequest) -> DriverResult<csi::CreateSnapshotResponse> {
        let source = VolumeHandle::decode(&req.source_volume_id)?;

        let identity = NameIdentity {
            pvc_namespace: req.parameters.get(SNAPSHOT_NAMESPACE_KEY).cloned().unwrap_or_default(),
            pvc_name: req.parameters.get(SNAPSHOT_NAME_KEY).cloned().unwrap_or_default(),
            pv_name: req.name.clone(),
            name: req.name.clone(),
        };
        let rendered_name = name_template::render(
            &identity,
            req.parameters.get(PARAM_NAME_TEMPLATE).map(|s| s.as_str()),
            req.parameters.get(PARAM_NAME_PREFIX).map(|s| s.as_str()).unwrap_or(""),
            req.parameters.get(PARAM_NAME_SUFFIX).map(|s| s.as_str()).unwrap_or(""),
        )?;
        let snapshot_id = format!("{}@{}", source.dataset_path, rendered_name);

        let _guard = self.snapshot_locks.acquire(snapshot_id.clone()).await;

        let info = match self.backend.snapshot_query(&snapshot_id).await? {
            Some(existing) => existing,
            None => self.backend.snapshot_create(&source.dataset_path, &rendered_name).await?,
        };

        Ok(csi::CreateSnapshotResponse {
            snapshot: Some(csi::Snapshot {
                size_bytes: info.size_bytes as i64,
                snapshot_id: info.id,
                source_volume_id: req.source_volume_id,
                creation_time: Some(prost_types::Timestamp {
                    seconds: info.creation_time,
                    nanos: 0,
                }),
                ready_to_use: true,
            }),
        })
    }

    async fn do_delete_snapshot(&self, req: csi::DeleteSnapshotRequest) -> DriverResult<csi::DeleteSnapshotResponse> {
        let _guard = self.snapshot_locks.acquire(req.snapshot_id.clone()).await;

        match self.backend.snapshot_query(&req.snapshot_id).await? {
            None => {}
            Some(info) if !info.clones.is_empty() => {
                return Err(DriverError::SnapshotHasDependents {
                    snapshot_id: req.snapshot_id,
                    dependents: info.clones,
                });
            }
            Some(_) => {
                if let Err(e) = self.backend.snapshot_delete(&req.snapshot_id).await {
                    // A clone created between the check above and this call
                    // surfaces here instead of in the pre-check.
                    if e.is_dependent_clones() {
                        return Err(DriverError::SnapshotHasDependents {
                            snapshot_id: req.snapshot_id,
                            dependents: Vec::new(),
                        });
                    }
                    return Err(e.into());
                }
            }
        }

        Ok(csi::DeleteSnapshotResponse {})
    }
}

/// Times one RPC and maps its [`DriverError`] onto the matching
/// [`tonic::Status`], recording both in the one place instead of scattering
/// `match` arms across every handler.
fn finish<T>(timer: OperationTimer, result: DriverResult<T>) -> Result<Response<T>, Status>
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
impl csi::controller_server::Controller for ControllerService {
    async fn create_volume(
        &self,
        request: Request<csi::CreateVolumeRequest>,
    ) -> Result<Response<csi::CreateVolumeResponse>, Status> {
        let timer = OperationTimer::new("CreateVolume");
        let result = self.do_create_volume(request.into_inner()).await;
        finish(timer, result)
    }

    async fn delete_volume(
        &self,
        request: Request<csi::DeleteVolumeRequest>,
    ) -> Result<Response<csi::DeleteVolumeResponse>, Status> {
        let timer = OperationTimer::new("DeleteVolume");
        let result = self.do_delete_volume(request.into_inner()).await;
        finish(timer, result)
    }

    async fn controller_publish_volume(
        &self,
        _request: Request<csi::ControllerPublishVolumeRequest>,
    ) -> Result<Response<csi::ControllerPublishVolumeResponse>, Status> {
        Err(Status::unimplemented(
            "ControllerPublishVolume is not required: attachment happens entirely in the Node service",
        ))
    }

    async fn controller_unpublish_volume(
        &self,
        _request: Request<csi::ControllerUnpublishVolumeRequest>,
    ) -> Result<Response<csi::ControllerUnpublishVolumeResponse>, Status> {
        Err(Status::unimplemented(
            "ControllerUnpublishVolume is not required: attachment happens entirely in the Node service",
        ))
    }

    async fn validate_volume_capabilities(
        &self,
        request: Request<csi::ValidateVolumeCapabilitiesRequest>,
    ) -> Result<Response<csi::ValidateVolumeCapabilitiesResponse>, Status> {
        let timer = OperationTimer::new("ValidateVolumeCapabilities");
        let req = request.into_inner();

        let result = (|| -> DriverResult<csi::ValidateVolumeCapabilitiesResponse> {
            let handle = VolumeHandle::decode(&req.volume_id)?;
            let message = match resolve_volume_mode(handle.protocol, &req.volume_capabilities) {
                Ok(mode) if mode == handle.volume_mode() => None,
                Ok(mode) => Some(format!(
                    "requested volume mode '{mode}' does not match the volume's provisioned mode '{}'",
                    handle.volume_mode()
                )),
                Err(e) => Some(e.to_string()),
            };
            let confirmed = message.is_none().then(|| csi::validate_volume_capabilities_response::Confirmed {
                volume_context: req.volume_context.clone(),
                volume_capabilities: req.volume_capabilities.clone(),
                parameters: req.parameters.clone(),
            });
            Ok(csi::ValidateVolumeCapabilitiesResponse {
                confirmed,
                message: message.unwrap_or_default(),
            })
        })();

        finish(timer, result)
    }

    async fn list_volumes(
        &self,
        _request: Request<csi::ListVolumesRequest>,
    ) -> Result<Response<csi::ListVolumesResponse>, Status> {
        Err(Status::unimplemented("ListVolumes is out of scope for the backend wire surface"))
    }

    async fn get_capacity(
        &self,
        _request: Request<csi::GetCapacityRequest>,
    ) -> Result<Response<csi::GetCapacityResponse>, Status> {
        Err(Status::unimplemented("GetCapacity is out of scope for the backend wire surface"))
    }

    async fn controller_get_capabilities(
        &self,
        _request: Request<csi::ControllerGetCapabilitiesRequest>,
    ) -> Result<Response<csi::ControllerGetCapabilitiesResponse>, Status> {
        use csi::controller_service_capability::{rpc::Type as RpcType, Rpc, Type};

        let capability = |t: RpcType| csi::ControllerServiceCapability {
            r#type: Some(Type::Rpc(Rpc { r#type: t as i32 })),
        };

        Ok(Response::new(csi::ControllerGetCapabilitiesResponse {
            capabilities: vec![
                capability(RpcType::CreateDeleteVolume),
                capability(RpcType::ExpandVolume),
                capability(RpcType::CreateDeleteSnapshot),
                capability(RpcType::CloneVolume),
            ],
        }))
    }

    async fn create_snapshot(
        &self,
        request: Request<csi::CreateSnapshotRequest>,
    ) -> Result<Response<csi::CreateSnapshotResponse>, Status> {
        let timer = OperationTimer::new("CreateSnapshot");
        let result = self.do_create_snapshot(request.into_inner()).await;
        finish(timer, result)
    }

    async fn delete_snapshot(
        &self,
        request: Request<csi::DeleteSnapshotRequest>,
    ) -> Result<Response<csi::DeleteSnapshotResponse>, Status> {
        let timer = OperationTimer::new("DeleteSnapshot");
        let result = self.do_delete_snapshot(request.into_inner()).await;
        finish(timer, result)
    }

    async fn list_snapshots(
        &self,
        _request: Request<csi::ListSnapshotsRequest>,
    ) -> Result<Response<csi::ListSnapshotsResponse>, Status> {
        Err(Status::unimplemented("ListSnapshots is out of scope for the backend wire surface"))
    }

    async fn controller_expand_volume(
        &self,
        request: Request<csi::ControllerExpandVolumeRequest>,
    ) -> Result<Response<csi::ControllerExpandVolumeResponse>, Status> {
        let timer = OperationTimer::new("ControllerExpandVolume");
        let result = self.do_controller_expand_volume(request.into_inner()).await;
        finish(timer, result)
    }

    async fn controller_get_volume(
        &self,
        _request: Request<csi::ControllerGetVolumeRequest>,
    ) -> Result<Response<csi::ControllerGetVolumeResponse>, Status> {
        Err(Status::unimplemented("ControllerGetVolume is out of scope for the backend wire surface"))
    }

    async fn controller_modify_volume(
        &self,
        _request: Request<csi::ControllerModifyVolumeRequest>,
    ) -> Result<Response<csi::ControllerModifyVolumeResponse>, Status> {
        Err(Status::unimplemented("ControllerModifyVolume is out of scope for the backend wire surface"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn storage_class_params_requires_protocol_server_pool() {
        assert!(StorageClassParams::parse(&params(&[])).is_err());
        assert!(StorageClassParams::parse(&params(&[("protocol", "nfs")])).is_err());
        assert!(StorageClassParams::parse(&params(&[("protocol", "nfs"), ("server", "nas")])).is_err());
    }

    #[test]
    fn storage_class_params_happy_path_defaults() {
        let p = StorageClassParams::parse(&params(&[("protocol", "nfs"), ("server", "nas"), ("pool", "tank")])).unwrap();
        assert_eq!(p.protocol, Protocol::Nfs);
        assert_eq!(p.parent_dataset, "tank");
        assert_eq!(p.delete_strategy, DeleteStrategy::Delete);
        assert_eq!(p.nfs_mount_options, DEFAULT_NFS_MOUNT_OPTIONS);
        assert_eq!(p.fs_type, DEFAULT_FS_TYPE);
    }

    #[test]
    fn storage_class_params_parent_dataset_nests_under_pool() {
        let p = StorageClassParams::parse(&params(&[
            ("protocol", "iscsi"),
            ("server", "nas"),
            ("pool", "tank"),
            ("parentDataset", "csi/volumes"),
        ]))
        .unwrap();
        assert_eq!(p.parent_dataset, "tank/csi/volumes");
    }

    #[test]
    fn storage_class_params_zfs_property_passthrough() {
        let p = StorageClassParams::parse(&params(&[
            ("protocol", "nfs"),
            ("server", "nas"),
            ("pool", "tank"),
            ("zfs.compression", "lz4"),
        ]))
        .unwrap();
        assert_eq!(p.zfs_properties.get("compression"), Some(&"lz4".to_string()));
    }

    #[test]
    fn required_capacity_defaults_when_absent() {
        assert_eq!(required_capacity(None).unwrap(), DEFAULT_VOLUME_SIZE);
    }

    #[test]
    fn required_capacity_prefers_required_bytes() {
        let range = csi::CapacityRange { required_bytes: 5_000_000_000, limit_bytes: 10_000_000_000 };
        assert_eq!(required_capacity(Some(&range)).unwrap(), 5_000_000_000);
    }

    #[test]
    fn required_capacity_falls_back_to_limit_bytes() {
        let range = csi::CapacityRange { required_bytes: 0, limit_bytes: 5_000_000_000 };
        assert_eq!(required_capacity(Some(&range)).unwrap(), 5_000_000_000);
    }

    #[test]
    fn required_capacity_rejects_required_over_limit() {
        let range = csi::CapacityRange { required_bytes: 10, limit_bytes: 5 };
        assert!(required_capacity(Some(&range)).is_err());
    }

    #[test]
    fn resolve_volume_mode_rejects_empty() {
        assert!(resolve_volume_mode(Protocol::Nfs, &[]).is_err());
    }

    #[test]
    fn resolve_volume_mode_rejects_mixed_block_and_mount() {
        let caps = vec![
            csi::VolumeCapability {
                access_type: Some(csi::volume_capability::AccessType::Block(csi::volume_capability::BlockVolume {})),
                access_mode: None,
            },
            csi::VolumeCapability {
                access_type: Some(csi::volume_capability::AccessType::Mount(csi::volume_capability::MountVolume {
                    fs_type: "ext4".into(),
                    mount_flags: vec![],
                })),
                access_mode: None,
            },
        ];
        assert!(resolve_volume_mode(Protocol::Iscsi, &caps).is_err());
    }

    #[test]
    fn resolve_volume_mode_rejects_block_for_nfs() {
        let caps = vec![csi::VolumeCapability {
            access_type: Some(csi::volume_capability::AccessType::Block(csi::volume_capability::BlockVolume {})),
            access_mode: None,
        }];
        assert!(resolve_volume_mode(Protocol::Nfs, &caps).is_err());
    }

    #[test]
    fn resolve_volume_mode_accepts_block_for_iscsi() {
        let caps = vec![csi::VolumeCapability {
            access_type: Some(csi::volume_capability::AccessType::Block(csi::volume_capability::BlockVolume {})),
            access_mode: None,
        }];
        assert_eq!(resolve_volume_mode(Protocol::Iscsi, &caps).unwrap(), VolumeMode::Block);
    }

    #[test]
    fn protocol_addressing_names_are_deterministic() {
        assert_eq!(nvmeof_nqn("tank/pv-a"), nvmeof_nqn("tank/pv-a"));
        assert_eq!(iscsi_iqn("tank/pv-a"), iscsi_iqn("tank/pv-a"));
        assert_ne!(nvmeof_nqn("tank/pv-a"), nvmeof_nqn("tank/pv-b"));
        assert!(!nvmeof_nqn("tank/pv-a").contains('/'));
    }

    #[test]
    fn dataset_capacity_uses_quota_for_nfs_and_volsize_otherwise() {
        let mut properties = HashMap::new();
        properties.insert("quota".to_string(), "42".to_string());
        let info = DatasetInfo { name: "tank/a".into(), used: 0, available: 0, volsize: Some(99), properties };
        assert_eq!(dataset_capacity(&info, Protocol::Nfs), 42);
        assert_eq!(dataset_capacity(&info, Protocol::Iscsi), 99);
    }
}
