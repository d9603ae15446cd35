//! Process resource sampling.

use sysinfo::{Pid, ProcessExt, System, SystemExt};

/// One CPU/memory reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceUsage {
    pub cpu_percent: f64,
    pub memory_mb: f64,
}

/// Source of periodic resource readings.
///
/// Returning `None` marks the tick as absent; the run carries on.
pub trait ResourceSampler: Send {
    fn sample(&mut self) -> Option<ResourceUsage>;
}

/// Samples CPU and resident memory of the current process via sysinfo.
pub struct ProcessSampler {
    system: System,
    pid: Option<Pid>,
}

impl ProcessSampler {
    pub fn new() -> Self {
        let pid = sysinfo::get_current_pid().ok();
        let mut system = System::new();

        // CPU usage is a delta between refreshes, so prime it once
        if let Some(pid) = pid {
            system.refresh_process(pid);
        }

        Self { system, pid }
    }
}

impl Default for ProcessSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceSampler for ProcessSampler {
    fn sample(&mut self) -> Option<ResourceUsage> {
        let pid = self.pid?;
        if !self.system.refresh_process(pid) {
            return None;
        }
        let process = self.system.process(pid)?;

        Some(ResourceUsage {
            cpu_percent: process.cpu_usage() as f64,
            memory_mb: process.memory() as f64 / (1024.0 * 1024.0),
        })
    }
}

/// Sampler that never produces a reading.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledSampler;

impl ResourceSampler for DisabledSampler {
    fn sample(&mut self) -> Option<ResourceUsage> {
        None
    }
}
