use crate::{Reading, StatsSource};
use anyhow::anyhow;
use sysinfo::{Networks, Pid, ProcessesToUpdate, System};

/// Host and current-process statistics read through `sysinfo`.
pub struct SystemStats {
    system: System,
    networks: Networks,
    pid: Option<Pid>,
}

impl SystemStats {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu_all();
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(e) => {
                tracing::warn!(error = %e, "Process statistics unavailable");
                None
            }
        };
        Self {
            system,
            networks: Networks::new_with_refreshed_list(),
            pid,
        }
    }

    fn host_memory(&mut self, out: &mut Vec<Reading>) {
        self.system.refresh_memory();
        let total = self.system.total_memory();
        let used = self.system.used_memory();
        out.push(Reading::ok("TotalMemory", total as f64));
        out.push(Reading::ok("UsedMemory", used as f64));
        out.push(Reading::ok("FreeMemory", self.system.free_memory() as f64));
        out.push(Reading::ok(
            "AvailableMemory",
            self.system.available_memory() as f64,
        ));
        out.push(Reading::ok("TotalSwap", self.system.total_swap() as f64));
        out.push(Reading::ok("UsedSwap", self.system.used_swap() as f64));
        out.push(Reading::ok("FreeSwap", self.system.free_swap() as f64));

        let used_pct = if total > 0 {
            Ok((used as f64 / total as f64) * 100.0)
        } else {
            Err(anyhow!("total memory reported as zero"))
        };
        out.push(Reading {
            name: "MemoryUsedPercent".into(),
            value: used_pct,
        });
    }

    fn cpu(&mut self, out: &mut Vec<Reading>) {
        self.system.refresh_cpu_all();
        out.push(Reading::ok(
            "CPUutilization",
            self.system.global_cpu_usage() as f64,
        ));
        out.push(Reading::ok("CPUCount", self.system.cpus().len() as f64));
        for (i, cpu) in self.system.cpus().iter().enumerate() {
            out.push(Reading::ok(
                format!("CPUutilization{}", i + 1),
                cpu.cpu_usage() as f64,
            ));
        }

        let load = System::load_average();
        out.push(Reading::ok("LoadAverage1", load.one));
        out.push(Reading::ok("LoadAverage5", load.five));
        out.push(Reading::ok("LoadAverage15", load.fifteen));
        out.push(Reading::ok("Uptime", System::uptime() as f64));
    }

    fn network(&mut self, out: &mut Vec<Reading>) {
        self.networks.refresh();
        let (mut rx, mut tx, mut prx, mut ptx) = (0u64, 0u64, 0u64, 0u64);
        for (_, data) in self.networks.iter() {
            rx += data.total_received();
            tx += data.total_transmitted();
            prx += data.total_packets_received();
            ptx += data.total_packets_transmitted();
        }
        out.push(Reading::ok("NetworkReceived", rx as f64));
        out.push(Reading::ok("NetworkTransmitted", tx as f64));
        out.push(Reading::ok("NetworkPacketsReceived", prx as f64));
        out.push(Reading::ok("NetworkPacketsTransmitted", ptx as f64));
    }

    fn process(&mut self, out: &mut Vec<Reading>) {
        const NAMES: [&str; 6] = [
            "ProcessResident",
            "ProcessVirtual",
            "ProcessCPU",
            "ProcessRunTime",
            "ProcessDiskRead",
            "ProcessDiskWritten",
        ];

        let process = match self.pid {
            Some(pid) => {
                self.system
                    .refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
                self.system.process(pid)
            }
            None => None,
        };
        let Some(process) = process else {
            for name in NAMES {
                out.push(Reading::failed(name, anyhow!("current process not found")));
            }
            return;
        };

        let disk = process.disk_usage();
        let values = [
            process.memory() as f64,
            process.virtual_memory() as f64,
            process.cpu_usage() as f64,
            process.run_time() as f64,
            disk.total_read_bytes as f64,
            disk.total_written_bytes as f64,
        ];
        for (name, value) in NAMES.into_iter().zip(values) {
            out.push(Reading::ok(name, value));
        }
    }
}

impl Default for SystemStats {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsSource for SystemStats {
    fn sample(&mut self) -> Vec<Reading> {
        let mut out = Vec::with_capacity(32);
        self.host_memory(&mut out);
        self.cpu(&mut out);
        self.network(&mut out);
        self.process(&mut out);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use telemon_common::types::validate_name;

    #[test]
    fn readings_have_valid_unique_names() {
        let mut stats = SystemStats::new();
        let readings = stats.sample();
        assert!(readings.len() >= 24);

        let mut names: Vec<&str> = readings.iter().map(|r| r.name.as_str()).collect();
        for name in &names {
            assert!(validate_name(name).is_ok(), "{name}");
        }
        names.sort();
        names.dedup();
        assert_eq!(names.len(), readings.len());
    }

    #[test]
    fn current_process_is_visible() {
        let mut stats = SystemStats::new();
        let readings = stats.sample();
        let resident = readings
            .iter()
            .find(|r| r.name == "ProcessResident")
            .unwrap();
        assert!(resident.value.is_ok());
    }
}
