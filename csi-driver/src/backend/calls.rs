//! Typed wrappers over the backend JSON-RPC methods consumed by the
//! Controller. Each method here builds the
//! request payload, calls the shared session, and deserializes the result
//! into a concrete type — no raw `serde_json::Value` is allowed to leak
//! past this module into controller.rs.

use serde::{Deserialize, Serialize};
use serde_json::json;

use super::client::BackendClient;
use super::error::{BackendError, Result};

/// A ZFS dataset or ZVOL as reported by `pool.dataset.query`.
#[derive(Debug, Clone, Deserialize)]
pub struct DatasetInfo {
    pub name: String,
    #[serde(default)]
    pub used: u64,
    #[serde(default)]
    pub available: u64,
    /// ZVOL size; absent for filesystem datasets.
    #[serde(default)]
    pub volsize: Option<u64>,
    #[serde(default)]
    pub properties: std::collections::HashMap<String, String>,
}

#[derive(Debug, Serialize)]
pub struct CreateDatasetParams<'a> {
    pub name: &'a str,
    /// `None` for a filesystem dataset (NFS); `Some(bytes)` for a ZVOL.
    pub volsize: Option<u64>,
    pub properties: &'a std::collections::HashMap<String, String>,
}

impl BackendClient {
    pub async fn dataset_create(&self, params: CreateDatasetParams<'_>) -> Result<DatasetInfo> {
        let value = self
            .call(
                "pool.dataset.create",
                json!({
                    "name": params.name,
                    "volsize": params.volsize,
                    "properties": params.properties,
                }),
            )
            .await?;
        decode(value)
    }

    pub async fn dataset_query(&self, name: &str) -> Result<Option<DatasetInfo>> {
        match self.call("pool.dataset.query", json!({ "name": name })).await {
            Ok(value) => Ok(Some(decode(value)?)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn dataset_update(
        &self,
        name: &str,
        volsize: Option<u64>,
        properties: &std::collections::HashMap<String, String>,
    ) -> Result<DatasetInfo> {
        let value = self
            .call(
                "pool.dataset.update",
                json!({ "name": name, "volsize": volsize, "properties": properties }),
            )
            .await?;
        decode(value)
    }

    pub async fn dataset_delete(&self, name: &str) -> Result<()> {
        match self.call("pool.dataset.delete", json!({ "name": name })).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub async fn snapshot_create(&self, dataset: &str, snap_name: &str) -> Result<SnapshotInfo> {
        let value = self
            .call(
                "zfs.snapshot.create",
                json!({ "dataset": dataset, "name": snap_name }),
            )
            .await?;
        decode(value)
    }

    pub async fn snapshot_query(&self, snapshot_id: &str) -> Result<Option<SnapshotInfo>> {
        match self.call("zfs.snapshot.query", json!({ "id": snapshot_id })).await {
            Ok(value) => Ok(Some(decode(value)?)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn snapshot_delete(&self, snapshot_id: &str) -> Result<()> {
        match self
            .call("zfs.snapshot.delete", json!({ "id": snapshot_id }))
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub async fn snapshot_clone(&self, snapshot_id: &str, target_dataset: &str) -> Result<DatasetInfo> {
        let value = self
            .call(
                "zfs.snapshot.clone",
                json!({ "id": snapshot_id, "target": target_dataset }),
            )
            .await?;
        decode(value)
    }

    /// Detached restore: stream the snapshot into `target_dataset` via
    /// send/receive, then promote.
    pub async fn snapshot_send_receive(
        &self,
        snapshot_id: &str,
        target_dataset: &str,
    ) -> Result<DatasetInfo> {
        let value = self
            .call(
                "zfs.snapshot.send",
                json!({ "id": snapshot_id, "target": target_dataset, "promote": true }),
            )
            .await?;
        decode(value)
    }

    pub async fn nfs_share_create(&self, path: &str, mount_options: &str) -> Result<NfsShare> {
        let value = self
            .call(
                "sharing.nfs.create",
                json!({ "path": path, "mount_options": mount_options }),
            )
            .await?;
        decode(value)
    }

    pub async fn nfs_share_delete(&self, path: &str) -> Result<()> {
        match self.call("sharing.nfs.delete", json!({ "path": path })).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub async fn nvmet_subsys_create(&self, nqn: &str) -> Result<()> {
        self.call("nvmet.subsys.create", json!({ "nqn": nqn })).await?;
        Ok(())
    }

    pub async fn nvmet_subsys_delete(&self, nqn: &str) -> Result<()> {
        match self.call("nvmet.subsys.delete", json!({ "nqn": nqn })).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub async fn nvmet_namespace_create(
        &self,
        nqn: &str,
        nsid: u32,
        device_path: &str,
    ) -> Result<()> {
        self.call(
            "nvmet.namespace.create",
            json!({ "nqn": nqn, "nsid": nsid, "device_path": device_path }),
        )
        .await?;
        Ok(())
    }

    pub async fn nvmet_namespace_delete(&self, nqn: &str, nsid: u32) -> Result<()> {
        match self
            .call("nvmet.namespace.delete", json!({ "nqn": nqn, "nsid": nsid }))
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub async fn nvmet_port_subsys_create(&self, nqn: &str, port: u16, transport: &str) -> Result<()> {
        self.call(
            "nvmet.port_subsys.create",
            json!({ "nqn": nqn, "port": port, "transport": transport }),
        )
        .await?;
        Ok(())
    }

    pub async fn iscsi_target_create(&self, iqn: &str) -> Result<()> {
        self.call("iscsi.target.create", json!({ "iqn": iqn })).await?;
        Ok(())
    }

    pub async fn iscsi_target_delete(&self, iqn: &str) -> Result<()> {
        match self.call("iscsi.target.delete", json!({ "iqn": iqn })).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub async fn iscsi_extent_create(&self, iqn: &str, device_path: &str, lun: u32) -> Result<()> {
        self.call(
            "iscsi.extent.create",
            json!({ "iqn": iqn, "device_path": device_path, "lun": lun }),
        )
        .await?;
        Ok(())
    }

    pub async fn iscsi_extent_delete(&self, iqn: &str, lun: u32) -> Result<()> {
        match self
            .call("iscsi.extent.delete", json!({ "iqn": iqn, "lun": lun }))
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SnapshotInfo {
    pub id: String,
    #[serde(default)]
    pub creation_time: i64,
    #[serde(default)]
    pub size_bytes: u64,
    #[serde(default)]
    pub clones: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NfsShare {
    pub path: String,
}

fn decode<T: for<'de> Deserialize<'de>>(value: serde_json::Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| BackendError::Protocol(e.to_string()))
}
