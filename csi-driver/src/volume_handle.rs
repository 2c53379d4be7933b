//! Volume handle codec.
//!
//! The handle is the opaque string the Controller returns from
//! `CreateVolume` and the orchestrator later hands back to every subsequent
//! call, including to the Node. It must be self-describing and total: every
//! valid handle round-trips, every invalid handle fails with a single
//! "malformed handle" error.
//!
//! Wire format: `<protocol>#<server>#<full_dataset_path>#<addressing>`.
//! Fields are parsed by index via `splitn`, never by splitting on `/`, so a
//! nested `full_dataset_path` (e.g. `tank/a/b/c`) round-trips unambiguously.
//! `addressing` is itself `#`-delimited, shaped per protocol.

use std::fmt::{self, Display};

use crate::error::DriverError;
use crate::types::{Protocol, VolumeMode};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Addressing {
    Nfs { export_path: String },
    Nvmeof {
        nqn: String,
        nsid: u32,
        transport: String,
        addr: String,
        port: u16,
        mode: VolumeMode,
    },
    Iscsi {
        iqn: String,
        lun: u32,
        portal: String,
        mode: VolumeMode,
    },
}

impl Addressing {
    pub fn mode(&self) -> VolumeMode {
        match self {
            Addressing::Nfs { .. } => VolumeMode::Filesystem,
            Addressing::Nvmeof { mode, .. } | Addressing::Iscsi { mode, .. } => *mode,
        }
    }

    fn encode(&self) -> String {
        match self {
            Addressing::Nfs { export_path } => export_path.clone(),
            Addressing::Nvmeof {
                nqn,
                nsid,
                transport,
                addr,
                port,
                mode,
            } => format!("{nqn}#{nsid}#{transport}#{addr}#{port}#{mode}"),
            Addressing::Iscsi { iqn, lun, portal, mode } => {
                format!("{iqn}#{lun}#{portal}#{mode}")
            }
        }
    }

    fn decode(protocol: Protocol, blob: &str) -> Result<Self, DriverError> {
        match protocol {
            Protocol::Nfs => Ok(Addressing::Nfs {
                export_path: blob.to_string(),
            }),
            Protocol::Nvmeof => {
                let parts: Vec<&str> = blob.split('#').collect();
                if parts.len() != 6 {
                    return Err(malformed("nvmeof addressing must have 6 fields"));
                }
                let nsid = parts[1]
                    .parse::<u32>()
                    .map_err(|_| malformed("nvmeof nsid is not numeric"))?;
                let port = parts[4]
                    .parse::<u16>()
                    .map_err(|_| malformed("nvmeof port is not numeric"))?;
                let mode: VolumeMode = parts[5]
                    .parse()
                    .map_err(|_| malformed("nvmeof addressing has unknown volume mode"))?;
                Ok(Addressing::Nvmeof {
                    nqn: parts[0].to_string(),
                    nsid,
                    transport: parts[2].to_string(),
                    addr: parts[3].to_string(),
                    port,
                    mode,
                })
            }
            Protocol::Iscsi => {
                let parts: Vec<&str> = blob.split('#').collect();
                if parts.len() != 4 {
                    return Err(malformed("iscsi addressing must have 4 fields"));
                }
                let lun = parts[1]
                    .parse::<u32>()
                    .map_err(|_| malformed("iscsi lun is not numeric"))?;
                let mode: VolumeMode = parts[3]
                    .parse()
                    .map_err(|_| malformed("iscsi addressing has unknown volume mode"))?;
                Ok(Addressing::Iscsi {
                    iqn: parts[0].to_string(),
                    lun,
                    portal: parts[2].to_string(),
                    mode,
                })
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeHandle {
    pub protocol: Protocol,
    pub server: String,
    pub dataset_path: String,
    pub addressing: Addressing,
}

impl VolumeHandle {
    pub fn volume_mode(&self) -> VolumeMode {
        self.addressing.mode()
    }

    pub fn encode(&self) -> String {
        format!(
            "{}#{}#{}#{}",
            self.protocol,
            self.server,
            self.dataset_path,
            self.addressing.encode()
        )
    }

    pub fn decode(handle: &str) -> Result<Self, DriverError> {
        let parts: Vec<&str> = handle.splitn(4, '#').collect();
        if parts.len() != 4 {
            return Err(malformed("handle must have 4 '#'-delimited top-level fields"));
        }
        let protocol: Protocol = parts[0]
            .parse()
            .map_err(|_| malformed("unrecognized protocol in handle"))?;
        let server = parts[1].to_string();
        let dataset_path = parts[2].to_string();
        if dataset_path.is_empty() {
            return Err(malformed("dataset path must not be empty"));
        }
        let addressing = Addressing::decode(protocol, parts[3])?;

        Ok(VolumeHandle {
            protocol,
            server,
            dataset_path,
            addressing,
        })
    }
}

impl Display for VolumeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.encode())
    }
}

fn malformed(reason: &str) -> DriverError {
    DriverError::MalformedHandle(reason.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nfs_handle() -> VolumeHandle {
        VolumeHandle {
            protocol: Protocol::Nfs,
            server: "nas.example".to_string(),
            dataset_path: "tank/pv-a".to_string(),
            addressing: Addressing::Nfs {
                export_path: "/mnt/tank/pv-a".to_string(),
            },
        }
    }

    fn nvmeof_handle() -> VolumeHandle {
        VolumeHandle {
            protocol: Protocol::Nvmeof,
            server: "nas.example".to_string(),
            dataset_path: "tank/pv-b".to_string(),
            addressing: Addressing::Nvmeof {
                nqn: "nqn.2024-01.example.com:pv-b".to_string(),
                nsid: 1,
                transport: "tcp".to_string(),
                addr: "10.0.0.5".to_string(),
                port: 4420,
                mode: VolumeMode::Block,
            },
        }
    }

    fn iscsi_handle() -> VolumeHandle {
        VolumeHandle {
            protocol: Protocol::Iscsi,
            server: "nas.example".to_string(),
            dataset_path: "tank/pv-e".to_string(),
            addressing: Addressing::Iscsi {
                iqn: "iqn.2024-01.example.com:pv-e".to_string(),
                lun: 0,
                portal: "10.0.0.5:3260".to_string(),
                mode: VolumeMode::Filesystem,
            },
        }
    }

    #[test]
    fn handle_round_trip_nfs() {
        let h = nfs_handle();
        let encoded = h.encode();
        assert!(encoded.starts_with("nfs#nas.example#tank/pv-a#"));
        let decoded = VolumeHandle::decode(&encoded).unwrap();
        assert_eq!(decoded, h);
    }

    #[test]
    fn handle_round_trip_nvmeof() {
        let h = nvmeof_handle();
        let decoded = VolumeHandle::decode(&h.encode()).unwrap();
        assert_eq!(decoded, h);
        assert_eq!(decoded.volume_mode(), VolumeMode::Block);
    }

    #[test]
    fn handle_round_trip_iscsi() {
        let h = iscsi_handle();
        let decoded = VolumeHandle::decode(&h.encode()).unwrap();
        assert_eq!(decoded, h);
    }

    #[test]
    fn nested_dataset_path_round_trips() {
        let mut h = nfs_handle();
        h.dataset_path = "tank/a/b/c/pv-d".to_string();
        let decoded = VolumeHandle::decode(&h.encode()).unwrap();
        assert_eq!(decoded.dataset_path, "tank/a/b/c/pv-d");
    }

    #[test]
    fn malformed_handle_is_rejected() {
        assert!(VolumeHandle::decode("not-a-handle").is_err());
        assert!(VolumeHandle::decode("nfs#server#").is_err());
        assert!(VolumeHandle::decode("bogus#server#tank/x#/export").is_err());
        assert!(VolumeHandle::decode("nvmeof#server#tank/x#nqn.only").is_err());
    }

    #[test]
    fn decode_encode_is_identity_for_all_valid_handles() {
        for h in [nfs_handle(), nvmeof_handle(), iscsi_handle()] {
            let encoded = h.encode();
            assert_eq!(VolumeHandle::decode(&encoded).unwrap().encode(), encoded);
        }
    }
}
