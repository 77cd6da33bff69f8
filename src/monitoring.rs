//! Resource snapshots of the agent process and its host
//!
//! Used by the system health check and attached to every health report under
//! `data.system`.

use log::debug;
use serde::{Deserialize, Serialize};

/// Point-in-time view of the agent process
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessSnapshot {
    pub pid: u32,
    /// Resident memory in bytes, 0 if it could not be determined
    pub memory_usage_bytes: u64,
    pub cpu_count: usize,
    /// Worker threads of the current tokio runtime, if called from one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime_workers: Option<usize>,
}

impl ProcessSnapshot {
    pub fn capture() -> Self {
        let cpu_count = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let runtime_workers = tokio::runtime::Handle::try_current()
            .ok()
            .map(|handle| handle.metrics().num_workers());

        Self {
            pid: std::process::id(),
            memory_usage_bytes: get_memory_usage(),
            cpu_count,
            runtime_workers,
        }
    }
}

/// Resident memory of the current process
fn get_memory_usage() -> u64 {
    #[cfg(target_os = "macos")]
    {
        use std::process::Command;

        if let Ok(output) = Command::new("ps")
            .args(["-o", "rss=", "-p", &std::process::id().to_string()])
            .output()
        {
            if let Ok(output_str) = String::from_utf8(output.stdout) {
                if let Ok(rss_kb) = output_str.trim().parse::<u64>() {
                    return rss_kb * 1024;
                }
            }
        }
    }

    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
            if let Some(kb) = parse_kb_field(&status, "VmRSS:") {
                return kb * 1024;
            }
        }
    }

    #[cfg(unix)]
    {
        // Peak rather than current usage
        unsafe {
            let mut usage: libc::rusage = std::mem::zeroed();
            if libc::getrusage(libc::RUSAGE_SELF, &mut usage) == 0 {
                #[cfg(target_os = "macos")]
                return usage.ru_maxrss as u64;

                #[cfg(not(target_os = "macos"))]
                return (usage.ru_maxrss as u64) * 1024;
            }
        }
    }

    0
}

/// Value in kB of a `Name:   1234 kB` line
fn parse_kb_field(text: &str, field: &str) -> Option<u64> {
    text.lines()
        .find(|line| line.starts_with(field))
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|kb| kb.parse::<u64>().ok())
}

/// Host memory totals
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct HostMemory {
    pub total_bytes: u64,
    pub available_bytes: u64,
}

impl HostMemory {
    /// Read host memory from `/proc/meminfo`
    ///
    /// Returns `None` on hosts without procfs.
    pub fn read() -> Option<Self> {
        match std::fs::read_to_string("/proc/meminfo") {
            Ok(text) => Self::parse(&text),
            Err(e) => {
                debug!("Host memory unavailable: {}", e);
                None
            }
        }
    }

    /// Parse the contents of `/proc/meminfo`
    ///
    /// Older kernels lack `MemAvailable`; free plus page cache is used instead.
    pub fn parse(meminfo: &str) -> Option<Self> {
        let total_kb = parse_kb_field(meminfo, "MemTotal:")?;
        if total_kb == 0 {
            return None;
        }

        let available_kb = parse_kb_field(meminfo, "MemAvailable:").or_else(|| {
            let free = parse_kb_field(meminfo, "MemFree:")?;
            let cached = parse_kb_field(meminfo, "Cached:").unwrap_or(0);
            let buffers = parse_kb_field(meminfo, "Buffers:").unwrap_or(0);
            Some(free + cached + buffers)
        })?;

        Some(Self {
            total_bytes: total_kb * 1024,
            available_bytes: available_kb.min(total_kb) * 1024,
        })
    }

    pub fn used_bytes(&self) -> u64 {
        self.total_bytes - self.available_bytes
    }

    /// Used memory as a percentage of total (0-100)
    pub fn used_percent(&self) -> f64 {
        self.used_bytes() as f64 / self.total_bytes as f64 * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MEMINFO: &str = "MemTotal:       16000000 kB\n\
                           MemFree:         2000000 kB\n\
                           MemAvailable:    4000000 kB\n\
                           Buffers:          100000 kB\n\
                           Cached:          1500000 kB\n";

    #[test]
    fn test_parse_meminfo() {
        let memory = HostMemory::parse(MEMINFO).unwrap();
        assert_eq!(memory.total_bytes, 16_000_000 * 1024);
        assert_eq!(memory.available_bytes, 4_000_000 * 1024);
        assert!((memory.used_percent() - 75.0).abs() < 0.001);
    }

    #[test]
    fn test_parse_meminfo_without_available() {
        let text = "MemTotal: 1000 kB\nMemFree: 100 kB\nBuffers: 50 kB\nCached: 50 kB\n";
        let memory = HostMemory::parse(text).unwrap();
        assert_eq!(memory.available_bytes, 200 * 1024);
        assert!((memory.used_percent() - 80.0).abs() < 0.001);
    }

    #[test]
    fn test_parse_meminfo_rejects_garbage() {
        assert!(HostMemory::parse("").is_none());
        assert!(HostMemory::parse("MemTotal: 0 kB\nMemFree: 0 kB\n").is_none());
        assert!(HostMemory::parse("MemTotal: lots\n").is_none());
    }

    #[test]
    fn test_process_snapshot() {
        let snapshot = ProcessSnapshot::capture();
        assert_eq!(snapshot.pid, std::process::id());
        assert!(snapshot.cpu_count >= 1);
        assert!(snapshot.runtime_workers.is_none());
    }

    #[tokio::test]
    async fn test_process_snapshot_inside_runtime() {
        let snapshot = ProcessSnapshot::capture();
        assert_eq!(snapshot.runtime_workers, Some(1));
    }
}
