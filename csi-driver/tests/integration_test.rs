//! Integration tests for the CSI driver crate.
//!
//! Exercises the public API surface end to end without a running NAS
//! backend or host-local mount/iSCSI/NVMe-oF tooling: volume handle
//! round-trips, name templating, error-to-status mapping, and the
//! Identity/Node gRPC service methods that don't require a backend
//! connection.

use std::sync::Arc;

use tonic::Request;

use csi_driver::backend::ReadinessState;
use csi_driver::csi;
use csi_driver::error::DriverError;
use csi_driver::name_template::{self, NameIdentity};
use csi_driver::node::NodeService;
use csi_driver::types::{DeleteStrategy, Protocol, VolumeMode};
use csi_driver::volume_handle::{Addressing, VolumeHandle};
use csi_driver::IdentityService;

// ============================================================================
// Identity service
// ============================================================================

#[tokio::test]
async fn identity_reports_plugin_info_and_capabilities() {
    use csi::identity_server::Identity;

    let service = IdentityService::new();

    let info = Identity::get_plugin_info(&service, Request::new(csi::GetPluginInfoRequest {}))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(info.name, "zfs.csi.io");
    assert!(!info.vendor_version.is_empty());

    let caps = Identity::get_plugin_capabilities(&service, Request::new(csi::GetPluginCapabilitiesRequest {}))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(caps.capabilities.len(), 2);
}

#[tokio::test]
async fn identity_probe_tracks_shared_readiness_state() {
    use csi::identity_server::Identity;

    let readiness = Arc::new(ReadinessState::default());
    let service = IdentityService::with_readiness(readiness.clone());

    let probe = Identity::probe(&service, Request::new(csi::ProbeRequest {}))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(probe.ready, Some(false));

    readiness.set(true);
    let probe = Identity::probe(&service, Request::new(csi::ProbeRequest {}))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(probe.ready, Some(true));
}

// ============================================================================
// Node service — capability reporting (no host-local tooling involved)
// ============================================================================

#[tokio::test]
async fn node_get_info_and_capabilities_do_not_touch_the_host() {
    use csi::node_server::Node;

    let service = NodeService::new("worker-7".to_string());

    let info = Node::node_get_info(&service, Request::new(csi::NodeGetInfoRequest {}))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(info.node_id, "worker-7");

    let caps = Node::node_get_capabilities(&service, Request::new(csi::NodeGetCapabilitiesRequest {}))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(caps.capabilities.len(), 2);
}

// ============================================================================
// Volume handle codec — round trips across all three addressing schemes
// ============================================================================

#[test]
fn volume_handle_round_trips_nfs() {
    let handle = VolumeHandle {
        protocol: Protocol::Nfs,
        server: "nas01.example.com".to_string(),
        dataset_path: "tank/csi/pv-abc123".to_string(),
        addressing: Addressing::Nfs {
            export_path: "/tank/csi/pv-abc123".to_string(),
        },
    };
    let encoded = handle.encode();
    let decoded = VolumeHandle::decode(&encoded).unwrap();
    assert_eq!(decoded, handle);
    assert_eq!(decoded.volume_mode(), VolumeMode::Filesystem);
}

#[test]
fn volume_handle_round_trips_nested_dataset_path() {
    let handle = VolumeHandle {
        protocol: Protocol::Nfs,
        server: "nas01.example.com".to_string(),
        dataset_path: "tank/a/b/c/pv-d".to_string(),
        addressing: Addressing::Nfs {
            export_path: "/tank/a/b/c/pv-d".to_string(),
        },
    };
    let decoded = VolumeHandle::decode(&handle.encode()).unwrap();
    assert_eq!(decoded.dataset_path, "tank/a/b/c/pv-d");
}

#[test]
fn volume_handle_round_trips_nvmeof_block() {
    let handle = VolumeHandle {
        protocol: Protocol::Nvmeof,
        server: "nas01.example.com".to_string(),
        dataset_path: "tank/csi/pv-nvme1".to_string(),
        addressing: Addressing::Nvmeof {
            nqn: "nqn.2011-06.com.nas:csi.pv-nvme1".to_string(),
            nsid: 1,
            transport: "tcp".to_string(),
            addr: "10.0.0.5".to_string(),
            port: 4420,
            mode: VolumeMode::Block,
        },
    };
    let decoded = VolumeHandle::decode(&handle.encode()).unwrap();
    assert_eq!(decoded, handle);
    assert_eq!(decoded.volume_mode(), VolumeMode::Block);
}

#[test]
fn volume_handle_round_trips_iscsi_filesystem() {
    let handle = VolumeHandle {
        protocol: Protocol::Iscsi,
        server: "nas01.example.com".to_string(),
        dataset_path: "tank/csi/pv-iscsi1".to_string(),
        addressing: Addressing::Iscsi {
            iqn: "iqn.2011-06.com.nas:csi.pv-iscsi1".to_string(),
            lun: 0,
            portal: "10.0.0.5:3260".to_string(),
            mode: VolumeMode::Filesystem,
        },
    };
    let decoded = VolumeHandle::decode(&handle.encode()).unwrap();
    assert_eq!(decoded, handle);
}

#[test]
fn volume_handle_decode_rejects_malformed_input() {
    assert!(VolumeHandle::decode("garbage").is_err());
    assert!(VolumeHandle::decode("nfs#nas01#tank/pv").is_err());
    assert!(VolumeHandle::decode("nvmeof#nas01#tank/pv#nqn.x#1#tcp").is_err());
}

// ============================================================================
// Name templating
// ============================================================================

#[test]
fn name_template_renders_default_prefix_suffix_form() {
    let identity = NameIdentity {
        pvc_namespace: "default".to_string(),
        pvc_name: "my-pvc".to_string(),
        pv_name: "pvc-11111111-2222-3333-4444-555555555555".to_string(),
        name: String::new(),
    };
    let rendered = name_template::render(&identity, None, "csi-", "").unwrap();
    assert_eq!(rendered, "csi-pvc-11111111-2222-3333-4444-555555555555");
}

#[test]
fn name_template_renders_explicit_template() {
    let identity = NameIdentity {
        pvc_namespace: "team-a".to_string(),
        pvc_name: "data".to_string(),
        pv_name: "pv-x".to_string(),
        name: String::new(),
    };
    let rendered = name_template::render(
        &identity,
        Some("{PVCNamespace}-{PVCName}"),
        "",
        "",
    )
    .unwrap();
    assert_eq!(rendered, "team-a-data");
}

#[test]
fn name_template_rejects_unknown_placeholder() {
    let identity = NameIdentity::default();
    let result = name_template::render(&identity, Some("{Bogus}"), "", "");
    assert!(result.is_err());
}

// ============================================================================
// Typed StorageClass parameter values
// ============================================================================

#[test]
fn protocol_and_volume_mode_parse_from_storage_class_strings() {
    assert_eq!("nfs".parse::<Protocol>().unwrap(), Protocol::Nfs);
    assert_eq!("nvmeof".parse::<Protocol>().unwrap(), Protocol::Nvmeof);
    assert_eq!("nvme".parse::<Protocol>().unwrap(), Protocol::Nvmeof);
    assert_eq!("iscsi".parse::<Protocol>().unwrap(), Protocol::Iscsi);
    assert!("smb".parse::<Protocol>().is_err());

    assert_eq!("Block".parse::<VolumeMode>().unwrap(), VolumeMode::Block);
    assert_eq!("filesystem".parse::<VolumeMode>().unwrap(), VolumeMode::Filesystem);
    assert_eq!("mount".parse::<VolumeMode>().unwrap(), VolumeMode::Filesystem);

    assert_eq!("retain".parse::<DeleteStrategy>().unwrap(), DeleteStrategy::Retain);
    assert_eq!("delete".parse::<DeleteStrategy>().unwrap(), DeleteStrategy::Delete);
}

// ============================================================================
// Driver error -> gRPC status mapping
// ============================================================================

#[test]
fn driver_errors_map_to_the_documented_grpc_codes() {
    let cases: Vec<(DriverError, tonic::Code)> = vec![
        (DriverError::InvalidArgument("bad param".into()), tonic::Code::InvalidArgument),
        (DriverError::AlreadyExistsMismatched("vol1".into()), tonic::Code::AlreadyExists),
        (DriverError::MalformedHandle("bad handle".into()), tonic::Code::InvalidArgument),
        (DriverError::NotFound("vol1".into()), tonic::Code::NotFound),
        (DriverError::Unimplemented("GetCapacity".into()), tonic::Code::Unimplemented),
        (DriverError::Internal("unexpected".into()), tonic::Code::Internal),
    ];
    for (err, expected) in cases {
        let status: tonic::Status = err.into();
        assert_eq!(status.code(), expected);
    }
}

#[test]
fn snapshot_with_dependents_maps_to_failed_precondition() {
    let err = DriverError::SnapshotHasDependents {
        snapshot_id: "tank/vol@snap1".into(),
        dependents: vec!["tank/vol-clone".into()],
    };
    let status: tonic::Status = err.into();
    assert_eq!(status.code(), tonic::Code::FailedPrecondition);
    assert!(status.message().contains("tank/vol-clone"));
}

// ============================================================================
// Concurrent request handling (no shared mutable host state corrupted)
// ============================================================================

#[tokio::test]
async fn concurrent_node_get_info_calls_are_independent() {
    use csi::node_server::Node;

    let service = Arc::new(NodeService::new("worker-9".to_string()));
    let mut handles = Vec::new();
    for _ in 0..10 {
        let service = service.clone();
        handles.push(tokio::spawn(async move {
            Node::node_get_info(&*service, Request::new(csi::NodeGetInfoRequest {}))
                .await
                .unwrap()
                .into_inner()
        }));
    }
    for handle in handles {
        let info = handle.await.unwrap();
        assert_eq!(info.node_id, "worker-9");
    }
}
