//! Process metrics for the exporter itself.
//!
//! These are reported on every scrape, whether or not the telemetry backend
//! is ready.

use crate::error::Result;
use prometheus::core::{Collector, Desc};
use prometheus::proto::MetricFamily;
use prometheus::{Counter, Gauge, Opts};
use std::sync::Mutex;
use sysinfo::{Pid, ProcessesToUpdate, System};
use tracing::warn;

const RESIDENT_MEMORY: (&str, &str) = (
    "process_resident_memory_bytes",
    "Resident memory size in bytes",
);
const VIRTUAL_MEMORY: (&str, &str) = (
    "process_virtual_memory_bytes",
    "Virtual memory size in bytes",
);
const CPU_SECONDS: (&str, &str) = (
    "process_cpu_seconds_total",
    "Total user and system CPU time spent in seconds",
);
const START_TIME: (&str, &str) = (
    "process_start_time_seconds",
    "Start time of the process since unix epoch in seconds",
);

/// Collects resource usage of the current process through `sysinfo`.
pub struct ProcessCollector {
    pid: Pid,
    system: Mutex<System>,
    descs: Vec<Desc>,
}

impl ProcessCollector {
    /// Collector for the running process.
    pub fn for_self() -> Result<Self> {
        let descs = [RESIDENT_MEMORY, VIRTUAL_MEMORY, CPU_SECONDS, START_TIME]
            .into_iter()
            .map(|(name, help)| {
                Desc::new(
                    name.to_string(),
                    help.to_string(),
                    Vec::new(),
                    Default::default(),
                )
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(Self {
            pid: Pid::from_u32(std::process::id()),
            system: Mutex::new(System::new()),
            descs,
        })
    }

    fn gather(&self) -> prometheus::Result<Vec<MetricFamily>> {
        let mut system = match self.system.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("Process metrics mutex was poisoned, recovering");
                poisoned.into_inner()
            }
        };

        // Refresh only the current process
        system.refresh_processes(ProcessesToUpdate::Some(&[self.pid]), true);

        let Some(process) = system.process(self.pid) else {
            return Ok(Vec::new());
        };

        let resident = Gauge::new(RESIDENT_MEMORY.0, RESIDENT_MEMORY.1)?;
        resident.set(process.memory() as f64);

        let virtual_memory = Gauge::new(VIRTUAL_MEMORY.0, VIRTUAL_MEMORY.1)?;
        virtual_memory.set(process.virtual_memory() as f64);

        // accumulated_cpu_time is reported in milliseconds
        let cpu = Counter::with_opts(Opts::new(CPU_SECONDS.0, CPU_SECONDS.1))?;
        cpu.inc_by(process.accumulated_cpu_time() as f64 / 1000.0);

        let start = Gauge::new(START_TIME.0, START_TIME.1)?;
        start.set(process.start_time() as f64);

        let mut families = resident.collect();
        families.extend(virtual_memory.collect());
        families.extend(cpu.collect());
        families.extend(start.collect());
        Ok(families)
    }
}

impl Collector for ProcessCollector {
    fn desc(&self) -> Vec<&Desc> {
        self.descs.iter().collect()
    }

    fn collect(&self) -> Vec<MetricFamily> {
        match self.gather() {
            Ok(families) => families,
            Err(e) => {
                warn!("Failed to collect process metrics: {}", e);
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::{Encoder, TextEncoder};

    #[test]
    fn test_process_metrics_present() {
        let collector = ProcessCollector::for_self().expect("Should create collector");
        assert_eq!(collector.desc().len(), 4);

        let families = collector.collect();
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&families, &mut buffer)
            .expect("Should encode");
        let text = String::from_utf8(buffer).expect("utf8");

        assert!(text.contains("process_resident_memory_bytes"));
        assert!(text.contains("# TYPE process_cpu_seconds_total counter"));
    }
}
