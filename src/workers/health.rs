//! Process health sampling
//!
//! CPU and memory come from procfs on Linux; other platforms report
//! zeros and rely on task counters alone for status derivation.

use std::time::Instant;

use crate::messages::ProcessHealth;

pub struct ProcessHealthProbe {
    started: Instant,
    #[cfg(target_os = "linux")]
    last_cpu_sample: Option<(Instant, u64)>,
}

impl ProcessHealthProbe {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            #[cfg(target_os = "linux")]
            last_cpu_sample: None,
        }
    }

    /// Takes one health sample. CPU percent is averaged over the window
    /// since the previous sample.
    pub fn sample(&mut self) -> ProcessHealth {
        ProcessHealth {
            cpu_percent: self.cpu_percent(),
            memory_bytes: memory_bytes(),
            uptime_sec: self.started.elapsed().as_secs_f64(),
        }
    }

    #[cfg(target_os = "linux")]
    fn cpu_percent(&mut self) -> f64 {
        let now = Instant::now();
        let Some(ticks) = cpu_ticks() else { return 0.0 };
        let percent = match self.last_cpu_sample {
            Some((last_at, last_ticks)) => {
                let elapsed = now.duration_since(last_at).as_secs_f64();
                if elapsed <= 0.0 {
                    0.0
                } else {
                    let tick_hz = procfs::ticks_per_second() as f64;
                    let used_sec = ticks.saturating_sub(last_ticks) as f64 / tick_hz;
                    (used_sec / elapsed) * 100.0
                }
            }
            None => 0.0,
        };
        self.last_cpu_sample = Some((now, ticks));
        percent
    }

    #[cfg(not(target_os = "linux"))]
    fn cpu_percent(&mut self) -> f64 {
        0.0
    }
}

impl Default for ProcessHealthProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(target_os = "linux")]
fn cpu_ticks() -> Option<u64> {
    let stat = procfs::process::Process::myself().ok()?.stat().ok()?;
    Some(stat.utime + stat.stime)
}

#[cfg(target_os = "linux")]
fn memory_bytes() -> u64 {
    use procfs::WithCurrentSystemInfo;
    procfs::process::Process::myself()
        .ok()
        .and_then(|process| process.stat().ok())
        .map(|stat| stat.rss_bytes().get())
        .unwrap_or(0)
}

#[cfg(not(target_os = "linux"))]
fn memory_bytes() -> u64 {
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uptime_grows_between_samples() {
        let mut probe = ProcessHealthProbe::new();
        let first = probe.sample();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let second = probe.sample();
        assert!(second.uptime_sec > first.uptime_sec);
    }
}
