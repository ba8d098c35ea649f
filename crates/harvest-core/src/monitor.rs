//! Host resource sampling for a worker or batch session.
//!
//! A [`ResourceMonitor`] is an owned value: each worker loop (or test) keeps its
//! own instance, and only its owner mutates it.

use std::fmt;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use sysinfo::System;

use crate::concurrency::HostResources;

const BYTES_PER_MIB: f64 = 1024.0 * 1024.0;
const BYTES_PER_GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Source of host resource readings.
pub trait ResourceProbe: Send {
    /// Global CPU usage in percent.
    fn cpu_percent(&mut self) -> f32;

    /// Used memory in percent of total memory.
    fn memory_percent(&mut self) -> f32;

    /// Used memory in MiB.
    fn used_memory_mib(&mut self) -> f64;

    /// CPU count and total memory, used to size worker pools.
    fn host(&mut self) -> HostResources;
}

/// [`ResourceProbe`] backed by `sysinfo`.
pub struct SysinfoProbe {
    system: System,
}

impl SysinfoProbe {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu_usage();
        system.refresh_memory();
        Self { system }
    }
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceProbe for SysinfoProbe {
    fn cpu_percent(&mut self) -> f32 {
        self.system.refresh_cpu_usage();
        self.system.global_cpu_usage()
    }

    fn memory_percent(&mut self) -> f32 {
        self.system.refresh_memory();
        let total = self.system.total_memory();
        if total == 0 {
            return 0.0;
        }
        (self.system.used_memory() as f64 * 100.0 / total as f64) as f32
    }

    fn used_memory_mib(&mut self) -> f64 {
        self.system.refresh_memory();
        self.system.used_memory() as f64 / BYTES_PER_MIB
    }

    fn host(&mut self) -> HostResources {
        self.system.refresh_memory();
        HostResources {
            cpu_count: self.system.cpus().len().max(1),
            total_memory_gib: self.system.total_memory() as f64 / BYTES_PER_GIB,
        }
    }
}

/// Running statistics accumulated by a [`ResourceMonitor`].
#[derive(Debug, Clone)]
pub struct SessionStats {
    pub started_at: DateTime<Utc>,
    started: Instant,
    pub max_cpu: f32,
    pub max_memory: f32,
    pub cpu_samples: Vec<f32>,
    pub memory_samples: Vec<f32>,
}

impl SessionStats {
    fn start() -> Self {
        Self {
            started_at: Utc::now(),
            started: Instant::now(),
            max_cpu: 0.0,
            max_memory: 0.0,
            cpu_samples: Vec::new(),
            memory_samples: Vec::new(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn avg_cpu(&self) -> f32 {
        average(&self.cpu_samples)
    }

    pub fn avg_memory(&self) -> f32 {
        average(&self.memory_samples)
    }

    pub fn sample_count(&self) -> usize {
        self.cpu_samples.len()
    }
}

fn average(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().sum::<f32>() / samples.len() as f32
}

/// Final figures of a monitored session.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceSummary {
    pub elapsed: Duration,
    pub avg_cpu: f32,
    pub max_cpu: f32,
    pub avg_memory: f32,
    pub max_memory: f32,
    pub samples: usize,
}

impl fmt::Display for ResourceSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "elapsed {:.1}s | CPU avg {:.1}% max {:.1}% | RAM avg {:.1}% max {:.1}% | {} samples",
            self.elapsed.as_secs_f64(),
            self.avg_cpu,
            self.max_cpu,
            self.avg_memory,
            self.max_memory,
            self.samples
        )
    }
}

/// Periodic CPU/memory sampler with running max and average.
pub struct ResourceMonitor<P: ResourceProbe> {
    probe: P,
    stats: SessionStats,
}

impl<P: ResourceProbe> ResourceMonitor<P> {
    /// Start a monitored session now.
    pub fn start(probe: P) -> Self {
        tracing::debug!("Resource monitoring started");
        Self {
            probe,
            stats: SessionStats::start(),
        }
    }

    /// Take one CPU and memory reading.
    pub fn sample(&mut self) {
        let cpu = self.probe.cpu_percent();
        let memory = self.probe.memory_percent();

        self.stats.max_cpu = self.stats.max_cpu.max(cpu);
        self.stats.max_memory = self.stats.max_memory.max(memory);
        self.stats.cpu_samples.push(cpu);
        self.stats.memory_samples.push(memory);

        tracing::debug!(cpu = %cpu, memory = %memory, "Resource sample");
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn summary(&self) -> ResourceSummary {
        ResourceSummary {
            elapsed: self.stats.elapsed(),
            avg_cpu: self.stats.avg_cpu(),
            max_cpu: self.stats.max_cpu,
            avg_memory: self.stats.avg_memory(),
            max_memory: self.stats.max_memory,
            samples: self.stats.sample_count(),
        }
    }

    /// End the session and return its summary.
    pub fn finish(self) -> ResourceSummary {
        let summary = self.summary();
        tracing::info!(%summary, "Resource usage");
        summary
    }
}
