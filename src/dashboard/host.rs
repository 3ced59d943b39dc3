use std::collections::HashMap;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

/// Host utilization at one instant
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct HostSnapshot {
    pub cpu_percent: f32,
    pub memory_used: u64,
    pub memory_total: u64,
}

impl HostSnapshot {
    pub fn memory_percent(&self) -> f32 {
        if self.memory_total == 0 {
            return 0.0;
        }
        (self.memory_used as f64 / self.memory_total as f64 * 100.0) as f32
    }
}

/// Collects host CPU/RAM and per-service memory
pub struct HostSampler {
    system: System,
}

impl HostSampler {
    pub fn new() -> Self {
        let mut system = System::new();
        // CPU usage is a delta between two refreshes; prime the first one
        system.refresh_cpu_usage();
        system.refresh_memory();
        Self { system }
    }

    pub fn sample(&mut self) -> HostSnapshot {
        self.system.refresh_cpu_usage();
        self.system.refresh_memory();

        HostSnapshot {
            cpu_percent: self.system.global_cpu_usage(),
            memory_used: self.system.used_memory(),
            memory_total: self.system.total_memory(),
        }
    }

    /// Resident memory (bytes) of the given processes; exited ones are omitted
    pub fn process_memory(&mut self, pids: &[u32]) -> HashMap<u32, u64> {
        if pids.is_empty() {
            return HashMap::new();
        }

        let sys_pids: Vec<Pid> = pids.iter().map(|&pid| Pid::from_u32(pid)).collect();
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&sys_pids),
            true,
            ProcessRefreshKind::new().with_memory(),
        );

        sys_pids
            .iter()
            .filter_map(|pid| {
                self.system
                    .process(*pid)
                    .map(|process| (pid.as_u32(), process.memory()))
            })
            .collect()
    }
}

impl Default for HostSampler {
    fn default() -> Self {
        Self::new()
    }
}
