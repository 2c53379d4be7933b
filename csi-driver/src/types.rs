//! Type-safe wrappers for CSI/StorageClass parameters.
//!
//! Each type implements `FromStr` for parsing at API boundaries (StorageClass
//! parameters, volume handle fields) so invalid input is rejected with a
//! typed error at the edge, not a stringly-typed `match` scattered through
//! the controller and node services.

use std::fmt::{self, Display};
use std::str::FromStr;

// ============================================================================
// Protocol
// ============================================================================

/// The wire protocol a volume is exported over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Nfs,
    Nvmeof,
    Iscsi,
}

impl Protocol {
    pub const fn default_port(self) -> u16 {
        match self {
            Protocol::Nfs => 2049,
            Protocol::Nvmeof => 4420,
            Protocol::Iscsi => 3260,
        }
    }

    /// Block mode is only meaningful for the two block protocols.
    pub const fn supports_block_mode(self) -> bool {
        matches!(self, Protocol::Nvmeof | Protocol::Iscsi)
    }
}

impl Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Nfs => write!(f, "nfs"),
            Protocol::Nvmeof => write!(f, "nvmeof"),
            Protocol::Iscsi => write!(f, "iscsi"),
        }
    }
}

impl FromStr for Protocol {
    type Err = ProtocolParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "nfs" => Ok(Protocol::Nfs),
            "nvmeof" | "nvme" => Ok(Protocol::Nvmeof),
            "iscsi" => Ok(Protocol::Iscsi),
            _ => Err(ProtocolParseError(s.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProtocolParseError(String);

impl Display for ProtocolParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown protocol '{}': expected 'nfs', 'nvmeof', or 'iscsi'", self.0)
    }
}

impl std::error::Error for ProtocolParseError {}

// ============================================================================
// VolumeMode
// ============================================================================

/// Filesystem vs. raw block access, derived from the CSI `VolumeCapability`
/// rather than a StorageClass parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeMode {
    Filesystem,
    Block,
}

impl Display for VolumeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VolumeMode::Filesystem => write!(f, "filesystem"),
            VolumeMode::Block => write!(f, "block"),
        }
    }
}

impl FromStr for VolumeMode {
    type Err = VolumeModeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "filesystem" | "mount" => Ok(VolumeMode::Filesystem),
            "block" => Ok(VolumeMode::Block),
            _ => Err(VolumeModeParseError(s.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct VolumeModeParseError(String);

impl Display for VolumeModeParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown volume mode '{}': expected 'filesystem' or 'block'", self.0)
    }
}

impl std::error::Error for VolumeModeParseError {}

// ============================================================================
// DeleteStrategy
// ============================================================================

/// Per-volume policy selecting whether `DeleteVolume` actually destroys the
/// backend dataset/ZVOL, persisted on the dataset at create time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeleteStrategy {
    #[default]
    Delete,
    Retain,
}

impl Display for DeleteStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeleteStrategy::Delete => write!(f, "delete"),
            DeleteStrategy::Retain => write!(f, "retain"),
        }
    }
}

impl FromStr for DeleteStrategy {
    type Err = DeleteStrategyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "" | "delete" => Ok(DeleteStrategy::Delete),
            "retain" => Ok(DeleteStrategy::Retain),
            _ => Err(DeleteStrategyParseError(s.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DeleteStrategyParseError(String);

impl Display for DeleteStrategyParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown delete strategy '{}': expected 'delete' or 'retain'", self.0)
    }
}

impl std::error::Error for DeleteStrategyParseError {}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_from_str() {
        assert_eq!("nfs".parse::<Protocol>().unwrap(), Protocol::Nfs);
        assert_eq!("NFS".parse::<Protocol>().unwrap(), Protocol::Nfs);
        assert_eq!("nvmeof".parse::<Protocol>().unwrap(), Protocol::Nvmeof);
        assert_eq!("nvme".parse::<Protocol>().unwrap(), Protocol::Nvmeof);
        assert_eq!("iscsi".parse::<Protocol>().unwrap(), Protocol::Iscsi);
        assert!("unknown".parse::<Protocol>().is_err());
    }

    #[test]
    fn test_protocol_display_roundtrip() {
        for p in [Protocol::Nfs, Protocol::Nvmeof, Protocol::Iscsi] {
            assert_eq!(p.to_string().parse::<Protocol>().unwrap(), p);
        }
    }

    #[test]
    fn test_protocol_block_mode_support() {
        assert!(!Protocol::Nfs.supports_block_mode());
        assert!(Protocol::Nvmeof.supports_block_mode());
        assert!(Protocol::Iscsi.supports_block_mode());
    }

    #[test]
    fn test_protocol_default_ports() {
        assert_eq!(Protocol::Nfs.default_port(), 2049);
        assert_eq!(Protocol::Nvmeof.default_port(), 4420);
        assert_eq!(Protocol::Iscsi.default_port(), 3260);
    }

    #[test]
    fn test_volume_mode_from_str() {
        assert_eq!("filesystem".parse::<VolumeMode>().unwrap(), VolumeMode::Filesystem);
        assert_eq!("mount".parse::<VolumeMode>().unwrap(), VolumeMode::Filesystem);
        assert_eq!("block".parse::<VolumeMode>().unwrap(), VolumeMode::Block);
        assert!("unknown".parse::<VolumeMode>().is_err());
    }

    #[test]
    fn test_delete_strategy_from_str() {
        assert_eq!("".parse::<DeleteStrategy>().unwrap(), DeleteStrategy::Delete);
        assert_eq!("delete".parse::<DeleteStrategy>().unwrap(), DeleteStrategy::Delete);
        assert_eq!("retain".parse::<DeleteStrategy>().unwrap(), DeleteStrategy::Retain);
        assert!("unknown".parse::<DeleteStrategy>().is_err());
    }

    #[test]
    fn test_delete_strategy_default_is_delete() {
        assert_eq!(DeleteStrategy::default(), DeleteStrategy::Delete);
    }
}
