//! Wire protocol of the telemetry backend.
//!
//! The backend listens on a Unix socket and speaks newline-delimited JSON.
//! After the client sends a subscribe request, the backend answers with a
//! handshake frame and then pushes stats frames at its own cadence. Raw
//! readings use the backend's field names and are decoded exactly once into
//! [`TelemetrySnapshot`] here, so nothing downstream depends on them.

use crate::error::{ExporterError, Result};
use crate::telemetry::data::*;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::time::timeout;

/// Request sent by the exporter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "request", rename_all = "snake_case")]
pub enum Request {
    /// Ask the backend to push stats every `interval_ms`.
    Subscribe { interval_ms: u64 },
}

/// Frame pushed by the backend.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    /// Handshake acceptance
    Hello {
        #[serde(default)]
        service: Option<String>,
        #[serde(default)]
        version: Option<String>,
    },
    /// A full stats reading
    Stats {
        #[serde(default = "default_ok")]
        ok: bool,
        #[serde(default, deserialize_with = "nullable")]
        data: RawStats,
    },
    /// Rejection or internal backend failure
    Error { message: String },
}

fn default_ok() -> bool {
    true
}

/// A `null` counts as missing and takes the default.
fn nullable<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Entries whose value is `null` are left out.
fn nullable_entries<'de, D, V>(deserializer: D) -> std::result::Result<BTreeMap<String, V>, D::Error>
where
    D: Deserializer<'de>,
    V: Deserialize<'de>,
{
    let entries = Option::<BTreeMap<String, Option<V>>>::deserialize(deserializer)?;
    Ok(entries
        .unwrap_or_default()
        .into_iter()
        .filter_map(|(key, value)| value.map(|value| (key, value)))
        .collect())
}

/// `null` items keep their position with default values.
fn nullable_items<'de, D, T>(deserializer: D) -> std::result::Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    let items = Option::<Vec<Option<T>>>::deserialize(deserializer)?;
    Ok(items
        .unwrap_or_default()
        .into_iter()
        .map(Option::unwrap_or_default)
        .collect())
}

impl Frame {
    /// Parse a single line.
    pub fn parse(line: &str) -> Result<Self> {
        Ok(serde_json::from_str(line.trim())?)
    }
}

/// An open, handshaken connection to the backend.
pub struct BackendConnection {
    lines: Lines<BufReader<OwnedReadHalf>>,
    // Kept so the backend does not observe a half-closed socket.
    _writer: OwnedWriteHalf,
    service: String,
}

impl BackendConnection {
    /// Connect, subscribe and wait for the handshake.
    ///
    /// Every failure, including a rejection frame, is a
    /// [`ExporterError::SessionStart`].
    pub async fn open(
        socket_path: &Path,
        interval: Duration,
        connect_timeout: Duration,
    ) -> Result<Self> {
        let stream = timeout(connect_timeout, UnixStream::connect(socket_path))
            .await
            .map_err(|_| {
                ExporterError::session_start(format!(
                    "timed out connecting to {}",
                    socket_path.display()
                ))
            })?
            .map_err(|e| {
                ExporterError::session_start(format!(
                    "cannot connect to {}: {}",
                    socket_path.display(),
                    e
                ))
            })?;

        let (read_half, mut writer) = stream.into_split();
        let request = Request::Subscribe {
            interval_ms: interval.as_millis() as u64,
        };
        let mut line = serde_json::to_vec(&request)?;
        line.push(b'\n');
        writer
            .write_all(&line)
            .await
            .map_err(|e| ExporterError::session_start(format!("cannot subscribe: {}", e)))?;

        let mut lines = BufReader::new(read_half).lines();
        let first = timeout(connect_timeout, lines.next_line())
            .await
            .map_err(|_| ExporterError::session_start("no handshake from backend"))?
            .map_err(|e| ExporterError::session_start(format!("handshake failed: {}", e)))?
            .ok_or_else(|| ExporterError::session_start("backend closed during handshake"))?;

        let frame = Frame::parse(&first)
            .map_err(|e| ExporterError::session_start(format!("malformed handshake: {}", e)))?;

        let service = match frame {
            Frame::Hello { service, version } => format!(
                "{} {}",
                service.as_deref().unwrap_or("backend"),
                version.as_deref().unwrap_or("unknown")
            ),
            Frame::Error { message } => {
                return Err(ExporterError::session_start(format!(
                    "backend rejected subscription: {}",
                    message
                )))
            }
            Frame::Stats { .. } => {
                return Err(ExporterError::session_start(
                    "backend sent stats before handshake",
                ))
            }
        };

        Ok(Self {
            lines,
            _writer: writer,
            service,
        })
    }

    /// Backend name and version announced in the handshake.
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Next raw line. `Ok(None)` means the backend closed the connection.
    pub async fn next_line(&mut self) -> Result<Option<String>> {
        Ok(self.lines.next_line().await?)
    }
}

/// Stats document as sent by the backend.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawStats {
    #[serde(deserialize_with = "nullable")]
    pub board: RawBoard,
    pub nvpmodel: Option<RawPowerMode>,
    #[serde(deserialize_with = "nullable")]
    pub cpu: RawCpu,
    #[serde(deserialize_with = "nullable_entries")]
    pub gpu: BTreeMap<String, RawGpu>,
    #[serde(deserialize_with = "nullable")]
    pub memory: RawMemory,
    #[serde(deserialize_with = "nullable_entries")]
    pub disk: BTreeMap<String, RawDisk>,
    #[serde(deserialize_with = "nullable")]
    pub uptime: f64,
    #[serde(deserialize_with = "nullable_entries")]
    pub temperature: BTreeMap<String, RawTemperature>,
    #[serde(deserialize_with = "nullable_entries")]
    pub fan: BTreeMap<String, RawFan>,
    #[serde(deserialize_with = "nullable")]
    pub power: RawPower,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawBoard {
    #[serde(deserialize_with = "nullable")]
    pub platform: RawPlatform,
    #[serde(deserialize_with = "nullable")]
    pub hardware: RawHardware,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawPlatform {
    #[serde(rename = "Machine")]
    pub machine: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawHardware {
    #[serde(rename = "Model")]
    pub model: Option<String>,
    #[serde(rename = "Jetpack")]
    pub jetpack: Option<String>,
    #[serde(rename = "L4T")]
    pub l4t: Option<String>,
    #[serde(rename = "699-level Part Number")]
    pub part_number: Option<String>,
    #[serde(rename = "P-Number")]
    pub p_number: Option<String>,
    #[serde(rename = "BoardIDs")]
    pub board_ids: Option<String>,
    #[serde(rename = "Module")]
    pub module: Option<String>,
    #[serde(rename = "SoC")]
    pub soc: Option<String>,
    #[serde(rename = "CUDA Arch BIN")]
    pub cuda_arch_bin: Option<String>,
    #[serde(rename = "Codename")]
    pub codename: Option<String>,
    #[serde(rename = "Serial Number")]
    pub serial_number: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawPowerMode {
    pub name: Option<String>,
}

/// Older backends send a bare list of cores, newer ones nest it under `cpu`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum RawCpu {
    Cores(#[serde(deserialize_with = "nullable_items")] Vec<RawCore>),
    Nested {
        #[serde(default, deserialize_with = "nullable_items")]
        cpu: Vec<RawCore>,
    },
}

impl Default for RawCpu {
    fn default() -> Self {
        Self::Cores(Vec::new())
    }
}

impl RawCpu {
    fn into_cores(self) -> Vec<RawCore> {
        match self {
            Self::Cores(cores) | Self::Nested { cpu: cores } => cores,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawCore {
    pub online: Option<bool>,
    pub freq: Option<RawFrequency>,
    #[serde(deserialize_with = "nullable")]
    pub idle: f64,
    #[serde(deserialize_with = "nullable")]
    pub user: f64,
    #[serde(deserialize_with = "nullable")]
    pub system: f64,
}

#[derive(Debug, Default, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct RawFrequency {
    #[serde(deserialize_with = "nullable")]
    pub cur: f64,
    #[serde(deserialize_with = "nullable")]
    pub min: f64,
    #[serde(deserialize_with = "nullable")]
    pub max: f64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawGpu {
    #[serde(deserialize_with = "nullable")]
    pub freq: RawFrequency,
    #[serde(deserialize_with = "nullable")]
    pub status: RawGpuStatus,
    pub utilization: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawGpuStatus {
    pub load: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawMemory {
    #[serde(rename = "RAM", deserialize_with = "nullable")]
    pub ram: RawRam,
    #[serde(rename = "SWAP", deserialize_with = "nullable")]
    pub swap: RawSwap,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawRam {
    #[serde(alias = "total", deserialize_with = "nullable")]
    pub tot: f64,
    #[serde(deserialize_with = "nullable")]
    pub used: f64,
    #[serde(deserialize_with = "nullable")]
    pub free: f64,
    #[serde(deserialize_with = "nullable")]
    pub buffers: f64,
    #[serde(deserialize_with = "nullable")]
    pub cached: f64,
    #[serde(deserialize_with = "nullable")]
    pub lfb: f64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawSwap {
    #[serde(alias = "total", deserialize_with = "nullable")]
    pub tot: f64,
    #[serde(deserialize_with = "nullable")]
    pub used: f64,
    #[serde(deserialize_with = "nullable")]
    pub cached: f64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawDisk {
    #[serde(deserialize_with = "nullable")]
    pub total: f64,
    #[serde(deserialize_with = "nullable")]
    pub used: f64,
    #[serde(alias = "available", deserialize_with = "nullable")]
    pub free: f64,
    pub percent: Option<f64>,
}

/// A temperature is either a bare reading or a sensor object.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum RawTemperature {
    Reading(f64),
    Sensor {
        #[serde(default)]
        temp: Option<f64>,
        #[serde(default = "default_ok", deserialize_with = "nullable_online")]
        online: bool,
    },
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawFan {
    /// One entry per channel; `null` for a channel without a reading
    #[serde(deserialize_with = "nullable")]
    pub speed: Vec<Option<f64>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawPower {
    #[serde(deserialize_with = "nullable_entries")]
    pub rail: BTreeMap<String, RawRail>,
    pub tot: Option<RawRail>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawRail {
    #[serde(alias = "cur", deserialize_with = "nullable")]
    pub power: f64,
}

/// A sensor with no `online` flag is online.
fn nullable_online<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<bool>::deserialize(deserializer)?.unwrap_or(true))
}

/// Empty strings are as good as missing.
fn present(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// One entry per fan channel. Multi-channel fans get `<name>_<channel>`,
/// suffixed further with `_` while that name belongs to another entry.
fn split_fan_channels(raw: BTreeMap<String, RawFan>) -> BTreeMap<String, f64> {
    let names: BTreeSet<String> = raw.keys().cloned().collect();
    let mut fan = BTreeMap::new();

    for (name, raw_fan) in raw {
        if let [speed] = raw_fan.speed.as_slice() {
            if let Some(speed) = *speed {
                fan.insert(name, speed);
            }
            continue;
        }

        for (channel, speed) in raw_fan.speed.into_iter().enumerate() {
            let Some(speed) = speed else { continue };
            let mut key = format!("{}_{}", name, channel);
            while names.contains(&key) || fan.contains_key(&key) {
                key.push('_');
            }
            fan.insert(key, speed);
        }
    }
    fan
}

impl From<RawFrequency> for Frequency {
    fn from(raw: RawFrequency) -> Self {
        Frequency::new(raw.cur, raw.min, raw.max)
    }
}

impl From<RawStats> for TelemetrySnapshot {
    fn from(raw: RawStats) -> Self {
        let hw = raw.board.hardware;
        let board = BoardInfo {
            machine: present(raw.board.platform.machine),
            jetpack: present(hw.jetpack),
            l4t: present(hw.l4t),
            model: present(hw.model),
            part_number: present(hw.part_number),
            p_number: present(hw.p_number),
            board_ids: present(hw.board_ids),
            module: present(hw.module),
            soc: present(hw.soc),
            cuda_arch_bin: present(hw.cuda_arch_bin),
            codename: present(hw.codename),
            serial_number: present(hw.serial_number),
        };

        let cpu = raw
            .cpu
            .into_cores()
            .into_iter()
            .map(|core| CpuCore {
                freq: match core.online {
                    Some(false) => None,
                    _ => core.freq.map(Frequency::from),
                },
                idle: core.idle,
                user: core.user,
                system: core.system,
            })
            .collect();

        let gpu = raw
            .gpu
            .into_iter()
            .map(|(id, gpu)| {
                let stats = GpuStats {
                    freq: gpu.freq.into(),
                    utilization: gpu.status.load.or(gpu.utilization),
                };
                (id, stats)
            })
            .collect();

        let memory = MemoryStats {
            ram: RamStats {
                total: raw.memory.ram.tot,
                used: raw.memory.ram.used,
                free: raw.memory.ram.free,
                buffers: raw.memory.ram.buffers,
                cached: raw.memory.ram.cached,
                lfb: raw.memory.ram.lfb,
            },
            swap: SwapStats {
                total: raw.memory.swap.tot,
                used: raw.memory.swap.used,
                cached: raw.memory.swap.cached,
            },
        };

        let disk = raw
            .disk
            .into_iter()
            .map(|(mountpoint, disk)| {
                let percent = disk.percent.unwrap_or(if disk.total > 0.0 {
                    disk.used / disk.total * 100.0
                } else {
                    0.0
                });
                let usage = DiskUsage {
                    total: disk.total,
                    used: disk.used,
                    free: disk.free,
                    percent,
                };
                (mountpoint, usage)
            })
            .collect();

        let temperature = raw
            .temperature
            .into_iter()
            .filter_map(|(sensor, reading)| match reading {
                RawTemperature::Reading(temp) => Some((sensor, temp)),
                RawTemperature::Sensor {
                    temp: Some(temp),
                    online: true,
                } => Some((sensor, temp)),
                RawTemperature::Sensor { .. } => None,
            })
            .collect();

        let fan = split_fan_channels(raw.fan);

        let mut power: BTreeMap<String, f64> = raw
            .power
            .rail
            .into_iter()
            .map(|(rail, reading)| (rail, reading.power))
            .collect();
        if let Some(total) = raw.power.tot {
            power.insert("total".to_string(), total.power);
        }

        TelemetrySnapshot {
            board,
            power_mode: raw.nvpmodel.and_then(|mode| present(mode.name)),
            cpu,
            gpu,
            memory,
            disk,
            uptime: Duration::try_from_secs_f64(raw.uptime).unwrap_or_default(),
            temperature,
            fan,
            power,
        }
    }
}
