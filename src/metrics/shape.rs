//! Shaping of a telemetry snapshot into metric records.
//!
//! Every function here is pure: it reads one snapshot and returns one record,
//! or `None` when the snapshot has nothing for that family.

use crate::metrics::record::{MetricKind, MetricRecord, MetricSpec};
use crate::telemetry::data::{BoardInfo, Frequency, TelemetrySnapshot};

/// Fallback for identity fields the backend did not report.
pub const UNKNOWN: &str = "unknown";

const NO_LABELS: [&str; 0] = [];

pub static BOARD_INFO: MetricSpec = MetricSpec {
    name: "jetson_info_board",
    help: "Board sys info",
    unit: None,
    kind: MetricKind::Info,
    labels: &["board_info"],
    info_keys: &["machine", "jetpack", "l4t", "model"],
};

pub static HARDWARE_INFO: MetricSpec = MetricSpec {
    name: "jetson_info_hardware",
    help: "Board hardware info",
    unit: None,
    kind: MetricKind::Info,
    labels: &["board_hw"],
    info_keys: &[
        "model",
        "part_number",
        "p_number",
        "board_ids",
        "module",
        "soc",
        "cuda_arch_bin",
        "codename",
        "serial_number",
    ],
};

pub static POWER_MODE: MetricSpec = MetricSpec {
    name: "jetson_nvpmode",
    help: "NV power mode",
    unit: None,
    kind: MetricKind::Info,
    labels: &["nvpmode"],
    info_keys: &["mode"],
};

pub static CPU: MetricSpec = MetricSpec {
    name: "jetson_usage_cpu",
    help: "CPU core frequency and idle counter",
    unit: None,
    kind: MetricKind::Gauge,
    labels: &["core", "statistic"],
    info_keys: &[],
};

pub static CPU_USAGE: MetricSpec = MetricSpec {
    name: "jetson_cpu_usage",
    help: "CPU core busy percentage",
    unit: Some("percent"),
    kind: MetricKind::Gauge,
    labels: &["core"],
    info_keys: &[],
};

pub static GPU: MetricSpec = MetricSpec {
    name: "jetson_usage_gpu",
    help: "GPU frequency",
    unit: None,
    kind: MetricKind::Gauge,
    labels: &["gpu", "statistic"],
    info_keys: &[],
};

pub static GPU_USAGE: MetricSpec = MetricSpec {
    name: "jetson_gpu_usage",
    help: "GPU utilization percentage",
    unit: Some("percent"),
    kind: MetricKind::Gauge,
    labels: &["gpu"],
    info_keys: &[],
};

pub static RAM: MetricSpec = MetricSpec {
    name: "jetson_usage_ram",
    help: "RAM usage in kibibytes (lfb in blocks)",
    unit: None,
    kind: MetricKind::Gauge,
    labels: &["statistic"],
    info_keys: &[],
};

pub static RAM_USAGE: MetricSpec = MetricSpec {
    name: "jetson_ram_usage",
    help: "RAM used percentage",
    unit: Some("percent"),
    kind: MetricKind::Gauge,
    labels: &[],
    info_keys: &[],
};

pub static SWAP: MetricSpec = MetricSpec {
    name: "jetson_usage_swap",
    help: "SWAP usage in kibibytes",
    unit: None,
    kind: MetricKind::Gauge,
    labels: &["statistic"],
    info_keys: &[],
};

pub static DISK: MetricSpec = MetricSpec {
    name: "jetson_usage_disk",
    help: "Root filesystem usage in gigabytes and percent",
    unit: None,
    kind: MetricKind::Gauge,
    labels: &["statistic"],
    info_keys: &[],
};

pub static UPTIME: MetricSpec = MetricSpec {
    name: "jetson_uptime",
    help: "System uptime",
    unit: Some("seconds"),
    kind: MetricKind::Gauge,
    labels: &[],
    info_keys: &[],
};

pub static TEMPERATURE: MetricSpec = MetricSpec {
    name: "jetson_temperature",
    help: "Sensor temperatures",
    unit: Some("celsius"),
    kind: MetricKind::Gauge,
    labels: &["sensor"],
    info_keys: &[],
};

pub static FAN: MetricSpec = MetricSpec {
    name: "jetson_usage_fan",
    help: "Fan speed",
    unit: Some("percent"),
    kind: MetricKind::Gauge,
    labels: &["fan"],
    info_keys: &[],
};

pub static POWER: MetricSpec = MetricSpec {
    name: "jetson_usage_power",
    help: "Power rail usage",
    unit: Some("milliwatts"),
    kind: MetricKind::Gauge,
    labels: &["rail"],
    info_keys: &[],
};

/// Every family, in emission order.
pub static SCHEMA: [&MetricSpec; 15] = [
    &BOARD_INFO,
    &HARDWARE_INFO,
    &POWER_MODE,
    &CPU,
    &CPU_USAGE,
    &GPU,
    &GPU_USAGE,
    &RAM,
    &RAM_USAGE,
    &SWAP,
    &DISK,
    &UPTIME,
    &TEMPERATURE,
    &FAN,
    &POWER,
];

/// Busy percentage of a core from its time counters.
///
/// All-zero counters count as fully idle.
pub fn cpu_usage_percent(idle: f64, user: f64, system: f64) -> f64 {
    let total = idle + user + system;
    if total <= 0.0 {
        return 0.0;
    }
    100.0 - (idle / total * 100.0)
}

/// Used RAM as a percentage of total; zero when total is zero.
pub fn ram_usage_percent(used: f64, total: f64) -> f64 {
    if total <= 0.0 {
        return 0.0;
    }
    used / total * 100.0
}

fn or_unknown(field: &Option<String>) -> String {
    field.as_deref().unwrap_or(UNKNOWN).to_string()
}

fn push_frequency(record: &mut MetricRecord, id: &str, freq: &Frequency) {
    record.push([id, "freq"], freq.cur);
    record.push([id, "min_freq"], freq.min);
    record.push([id, "max_freq"], freq.max);
}

fn non_empty(record: MetricRecord) -> Option<MetricRecord> {
    (!record.is_empty()).then_some(record)
}

pub fn board_info(snapshot: &TelemetrySnapshot) -> Option<MetricRecord> {
    let board: &BoardInfo = &snapshot.board;
    let mut record = MetricRecord::new(&BOARD_INFO);
    record.push_info(
        ["info"],
        vec![
            ("machine", or_unknown(&board.machine)),
            ("jetpack", or_unknown(&board.jetpack)),
            ("l4t", or_unknown(&board.l4t)),
            ("model", or_unknown(&board.model)),
        ],
    );
    Some(record)
}

pub fn hardware_info(snapshot: &TelemetrySnapshot) -> Option<MetricRecord> {
    let board = &snapshot.board;
    let mut record = MetricRecord::new(&HARDWARE_INFO);
    record.push_info(
        ["hardware"],
        vec![
            ("model", or_unknown(&board.model)),
            ("part_number", or_unknown(&board.part_number)),
            ("p_number", or_unknown(&board.p_number)),
            ("board_ids", or_unknown(&board.board_ids)),
            ("module", or_unknown(&board.module)),
            ("soc", or_unknown(&board.soc)),
            ("cuda_arch_bin", or_unknown(&board.cuda_arch_bin)),
            ("codename", or_unknown(&board.codename)),
            ("serial_number", or_unknown(&board.serial_number)),
        ],
    );
    Some(record)
}

pub fn power_mode(snapshot: &TelemetrySnapshot) -> Option<MetricRecord> {
    let mode = snapshot.power_mode.as_ref()?;
    let mut record = MetricRecord::new(&POWER_MODE);
    record.push_info(["mode"], vec![("mode", mode.clone())]);
    Some(record)
}

pub fn cpu(snapshot: &TelemetrySnapshot) -> Option<MetricRecord> {
    let mut record = MetricRecord::new(&CPU);
    for (index, core) in snapshot.cpu.iter().enumerate() {
        let id = index.to_string();
        if let Some(freq) = &core.freq {
            push_frequency(&mut record, &id, freq);
        }
        record.push([id.as_str(), "idle"], core.idle);
    }
    non_empty(record)
}

pub fn cpu_usage(snapshot: &TelemetrySnapshot) -> Option<MetricRecord> {
    let mut record = MetricRecord::new(&CPU_USAGE);
    for (index, core) in snapshot.cpu.iter().enumerate() {
        record.push(
            [index.to_string()],
            cpu_usage_percent(core.idle, core.user, core.system),
        );
    }
    non_empty(record)
}

pub fn gpu(snapshot: &TelemetrySnapshot) -> Option<MetricRecord> {
    let mut record = MetricRecord::new(&GPU);
    for (id, gpu) in &snapshot.gpu {
        push_frequency(&mut record, id, &gpu.freq);
    }
    non_empty(record)
}

pub fn gpu_usage(snapshot: &TelemetrySnapshot) -> Option<MetricRecord> {
    let mut record = MetricRecord::new(&GPU_USAGE);
    for (id, gpu) in &snapshot.gpu {
        record.push([id.as_str()], gpu.utilization.unwrap_or(0.0));
    }
    non_empty(record)
}

pub fn ram(snapshot: &TelemetrySnapshot) -> Option<MetricRecord> {
    let ram = &snapshot.memory.ram;
    let mut record = MetricRecord::new(&RAM);
    record.push(["total"], ram.total);
    record.push(["used"], ram.used);
    record.push(["buffers"], ram.buffers);
    record.push(["cached"], ram.cached);
    record.push(["lfb"], ram.lfb);
    record.push(["free"], ram.free);
    Some(record)
}

pub fn ram_usage(snapshot: &TelemetrySnapshot) -> Option<MetricRecord> {
    let ram = &snapshot.memory.ram;
    let mut record = MetricRecord::new(&RAM_USAGE);
    record.push(NO_LABELS, ram_usage_percent(ram.used, ram.total));
    Some(record)
}

pub fn swap(snapshot: &TelemetrySnapshot) -> Option<MetricRecord> {
    let swap = &snapshot.memory.swap;
    let mut record = MetricRecord::new(&SWAP);
    record.push(["total"], swap.total);
    record.push(["used"], swap.used);
    record.push(["cached"], swap.cached);
    Some(record)
}

/// Root mountpoint only.
pub fn disk(snapshot: &TelemetrySnapshot) -> Option<MetricRecord> {
    let root = snapshot.root_disk()?;
    let mut record = MetricRecord::new(&DISK);
    record.push(["total"], root.total);
    record.push(["used"], root.used);
    record.push(["free"], root.free);
    record.push(["percent"], root.percent);
    Some(record)
}

pub fn uptime(snapshot: &TelemetrySnapshot) -> Option<MetricRecord> {
    let mut record = MetricRecord::new(&UPTIME);
    record.push(NO_LABELS, snapshot.uptime.as_secs_f64());
    Some(record)
}

pub fn temperature(snapshot: &TelemetrySnapshot) -> Option<MetricRecord> {
    let mut record = MetricRecord::new(&TEMPERATURE);
    for (sensor, celsius) in &snapshot.temperature {
        record.push([sensor.as_str()], *celsius);
    }
    non_empty(record)
}

pub fn fan(snapshot: &TelemetrySnapshot) -> Option<MetricRecord> {
    let mut record = MetricRecord::new(&FAN);
    for (name, speed) in &snapshot.fan {
        record.push([name.as_str()], *speed);
    }
    non_empty(record)
}

pub fn power(snapshot: &TelemetrySnapshot) -> Option<MetricRecord> {
    let mut record = MetricRecord::new(&POWER);
    for (rail, milliwatts) in &snapshot.power {
        record.push([rail.as_str()], *milliwatts);
    }
    non_empty(record)
}

/// Shaping functions, in the same order as [`SCHEMA`].
pub static SHAPERS: [fn(&TelemetrySnapshot) -> Option<MetricRecord>; 15] = [
    board_info,
    hardware_info,
    power_mode,
    cpu,
    cpu_usage,
    gpu,
    gpu_usage,
    ram,
    ram_usage,
    swap,
    disk,
    uptime,
    temperature,
    fan,
    power,
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::data::{CpuCore, DiskUsage, GpuStats};
    use std::time::Duration;

    #[test]
    fn test_cpu_usage_percent() {
        assert!((cpu_usage_percent(70.0, 20.0, 10.0) - 30.0).abs() < 1e-9);
        assert_eq!(cpu_usage_percent(0.0, 0.0, 0.0), 0.0);
        assert_eq!(cpu_usage_percent(0.0, 5.0, 5.0), 100.0);
        assert_eq!(cpu_usage_percent(10.0, 0.0, 0.0), 0.0);
    }

    #[test]
    fn test_ram_usage_percent() {
        assert_eq!(ram_usage_percent(4_000_000.0, 8_000_000.0), 50.0);
        assert_eq!(ram_usage_percent(10.0, 0.0), 0.0);
    }

    #[test]
    fn test_schema_matches_shapers() {
        let mut snapshot = TelemetrySnapshot::default();
        snapshot.power_mode = Some("MAXN".to_string());
        snapshot.cpu.push(CpuCore::online(Frequency::new(1.0, 1.0, 1.0), 1.0, 1.0, 1.0));
        snapshot.gpu.insert("gpu".to_string(), GpuStats::default());
        snapshot.disk.insert("/".to_string(), DiskUsage::default());
        snapshot.temperature.insert("cpu".to_string(), 40.0);
        snapshot.fan.insert("pwmfan".to_string(), 30.0);
        snapshot.power.insert("VDD_IN".to_string(), 4000.0);

        for (spec, shaper) in SCHEMA.iter().zip(SHAPERS.iter()) {
            let record = shaper(&snapshot).expect("every family has data");
            assert_eq!(record.spec(), *spec);
            for point in record.points() {
                assert_eq!(point.label_values.len(), spec.labels.len(), "{}", spec.name);
            }
        }
    }

    #[test]
    fn test_offline_core_keeps_idle_only() {
        let mut snapshot = TelemetrySnapshot::default();
        snapshot.cpu.push(CpuCore {
            freq: None,
            idle: 5.0,
            user: 0.0,
            system: 0.0,
        });

        let record = cpu(&snapshot).expect("cpu record");
        assert_eq!(record.points().len(), 1);
        assert_eq!(record.value(&["0", "idle"]), Some(5.0));
        assert_eq!(record.value(&["0", "freq"]), None);
    }

    #[test]
    fn test_gpu_utilization_defaults_to_zero() {
        let mut snapshot = TelemetrySnapshot::default();
        snapshot.gpu.insert("gpu".to_string(), GpuStats::default());

        let record = gpu_usage(&snapshot).expect("gpu usage");
        assert_eq!(record.value(&["gpu"]), Some(0.0));
    }

    #[test]
    fn test_optional_families_absent() {
        let snapshot = TelemetrySnapshot::default();
        assert!(power_mode(&snapshot).is_none());
        assert!(cpu(&snapshot).is_none());
        assert!(disk(&snapshot).is_none());
        assert!(temperature(&snapshot).is_none());
        assert!(fan(&snapshot).is_none());
        assert!(power(&snapshot).is_none());

        // Memory and uptime always report, even when zero.
        assert!(ram(&snapshot).is_some());
        assert_eq!(swap(&snapshot).and_then(|r| r.value(&["total"])), Some(0.0));
        assert_eq!(uptime(&snapshot).and_then(|r| r.value(&[])), Some(0.0));
    }

    #[test]
    fn test_board_info_unknown_fields() {
        let mut snapshot = TelemetrySnapshot::default();
        snapshot.board.machine = Some("aarch64".to_string());
        snapshot.uptime = Duration::from_secs(1);

        let record = board_info(&snapshot).expect("board info");
        assert_eq!(record.info(&["info"], "machine"), Some("aarch64"));
        assert_eq!(record.info(&["info"], "jetpack"), Some(UNKNOWN));
        assert_eq!(record.info(&["info"], "l4t"), Some(UNKNOWN));
        assert_eq!(record.info(&["info"], "model"), Some(UNKNOWN));

        let hardware = hardware_info(&snapshot).expect("hardware info");
        for key in HARDWARE_INFO.info_keys {
            assert_eq!(hardware.info(&["hardware"], key), Some(UNKNOWN));
        }
    }
}
