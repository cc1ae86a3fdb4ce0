//! Data structures for board telemetry.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Mountpoint whose usage is exported.
pub const ROOT_MOUNTPOINT: &str = "/";

/// A complete, immutable reading of every telemetry domain.
///
/// Snapshots are published whole by the session and never mutated afterwards.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    /// Platform identity
    pub board: BoardInfo,
    /// Active power mode name (nvpmodel), when the board has one
    pub power_mode: Option<String>,
    /// Per-core CPU records, ordered by core index
    pub cpu: Vec<CpuCore>,
    /// GPU statistics keyed by GPU identifier
    pub gpu: BTreeMap<String, GpuStats>,
    /// RAM and SWAP usage
    pub memory: MemoryStats,
    /// Disk usage keyed by mountpoint
    pub disk: BTreeMap<String, DiskUsage>,
    /// Time since boot
    pub uptime: Duration,
    /// Sensor temperatures in degrees Celsius
    pub temperature: BTreeMap<String, f64>,
    /// Fan speed percentages keyed by fan channel
    pub fan: BTreeMap<String, f64>,
    /// Power rail readings in milliwatts
    pub power: BTreeMap<String, f64>,
}

/// Board identity. Every field may be missing on some boards.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BoardInfo {
    pub machine: Option<String>,
    pub jetpack: Option<String>,
    pub l4t: Option<String>,
    pub model: Option<String>,
    pub part_number: Option<String>,
    pub p_number: Option<String>,
    pub board_ids: Option<String>,
    pub module: Option<String>,
    pub soc: Option<String>,
    pub cuda_arch_bin: Option<String>,
    pub codename: Option<String>,
    pub serial_number: Option<String>,
}

/// Clock frequency triple.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Frequency {
    pub cur: f64,
    pub min: f64,
    pub max: f64,
}

/// One CPU core.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CpuCore {
    /// Clock frequency, absent while the core is offline
    pub freq: Option<Frequency>,
    /// Idle time counter
    pub idle: f64,
    /// User time counter
    pub user: f64,
    /// System time counter
    pub system: f64,
}

/// One GPU.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GpuStats {
    pub freq: Frequency,
    /// Utilization percentage, when the backend reports it
    pub utilization: Option<f64>,
}

/// RAM and SWAP usage in kibibytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryStats {
    pub ram: RamStats,
    pub swap: SwapStats,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RamStats {
    pub total: f64,
    pub used: f64,
    pub free: f64,
    pub buffers: f64,
    pub cached: f64,
    /// Largest free block count
    pub lfb: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SwapStats {
    pub total: f64,
    pub used: f64,
    pub cached: f64,
}

/// Usage of one mountpoint, in gigabytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DiskUsage {
    pub total: f64,
    pub used: f64,
    pub free: f64,
    /// Percent used (0.0 to 100.0)
    pub percent: f64,
}

impl TelemetrySnapshot {
    /// Usage of the root filesystem, if the backend reported it.
    pub fn root_disk(&self) -> Option<&DiskUsage> {
        self.disk.get(ROOT_MOUNTPOINT)
    }
}

impl CpuCore {
    /// Create an online core with the given frequency and time counters.
    pub fn online(freq: Frequency, idle: f64, user: f64, system: f64) -> Self {
        Self {
            freq: Some(freq),
            idle,
            user,
            system,
        }
    }
}

impl Frequency {
    pub fn new(cur: f64, min: f64, max: f64) -> Self {
        Self { cur, min, max }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_disk_lookup() {
        let mut snapshot = TelemetrySnapshot::default();
        assert!(snapshot.root_disk().is_none());

        snapshot.disk.insert(
            "/data".to_string(),
            DiskUsage {
                total: 100.0,
                ..Default::default()
            },
        );
        assert!(snapshot.root_disk().is_none());

        snapshot.disk.insert(
            ROOT_MOUNTPOINT.to_string(),
            DiskUsage {
                total: 32.0,
                ..Default::default()
            },
        );
        assert_eq!(snapshot.root_disk().map(|d| d.total), Some(32.0));
    }

    #[test]
    fn test_snapshot_json_shape() {
        let mut snapshot = TelemetrySnapshot::default();
        snapshot
            .cpu
            .push(CpuCore::online(Frequency::new(1200.0, 100.0, 2000.0), 1.0, 2.0, 3.0));
        snapshot.uptime = Duration::from_secs(10);

        let json = serde_json::to_value(&snapshot).expect("Should serialize");
        assert_eq!(json["cpu"][0]["freq"]["cur"], 1200.0);
        assert_eq!(json["uptime"]["secs"], 10);
        assert!(json["board"]["machine"].is_null());
    }
}
