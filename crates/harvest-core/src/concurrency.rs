//! Worker-count policy and static sharding.
//!
//! Two distribution models exist and are never mixed within one run: the
//! broker-mediated pull model, where any number of workers poll a shared
//! queue, and the static model, where a known number of workers each take a
//! contiguous [`shard`] of the job list.

use std::fmt;
use std::str::FromStr;

use crate::error::AppError;

/// Host figures that drive worker sizing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HostResources {
    pub cpu_count: usize,
    pub total_memory_gib: f64,
}

/// Concurrency policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConcurrencyMode {
    /// A quarter of the CPUs.
    Conservative,
    /// Half of the CPUs.
    Balanced,
    /// Every CPU.
    Aggressive,
    /// Chosen from total memory: 16 GiB or more uses every CPU, 8 to 16 GiB
    /// uses half, below 8 GiB a quarter.
    #[default]
    Auto,
}

impl ConcurrencyMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConcurrencyMode::Conservative => "conservative",
            ConcurrencyMode::Balanced => "balanced",
            ConcurrencyMode::Aggressive => "aggressive",
            ConcurrencyMode::Auto => "auto",
        }
    }

    /// Number of parallel workers for the given host.
    pub fn worker_count(&self, host: &HostResources) -> usize {
        let cpus = host.cpu_count;
        match self {
            ConcurrencyMode::Conservative => (cpus / 4).max(1),
            ConcurrencyMode::Balanced => (cpus / 2).max(1),
            ConcurrencyMode::Aggressive => cpus.max(1),
            ConcurrencyMode::Auto => {
                if host.total_memory_gib >= 16.0 {
                    cpus.max(1)
                } else if host.total_memory_gib >= 8.0 {
                    (cpus / 2).max(1)
                } else {
                    (cpus / 4).max(1)
                }
            }
        }
    }
}

impl fmt::Display for ConcurrencyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ConcurrencyMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "conservative" => Ok(ConcurrencyMode::Conservative),
            "balanced" => Ok(ConcurrencyMode::Balanced),
            "aggressive" => Ok(ConcurrencyMode::Aggressive),
            "auto" => Ok(ConcurrencyMode::Auto),
            _ => Err(format!("Unknown concurrency mode: {}", s)),
        }
    }
}

/// Worker count from an explicit override, falling back to the policy.
pub fn resolve_workers(
    mode: ConcurrencyMode,
    override_workers: Option<usize>,
    host: &HostResources,
) -> usize {
    match override_workers {
        Some(n) if n > 0 => n,
        _ => mode.worker_count(host),
    }
}

/// Contiguous slice of `jobs` assigned to worker `worker_index` (1-based) out of
/// `worker_count`.
///
/// Every worker gets `len / worker_count` jobs; the last one also takes the
/// remainder. Concatenating all shards in index order yields `jobs` exactly.
pub fn shard<T>(jobs: &[T], worker_index: usize, worker_count: usize) -> Result<&[T], AppError> {
    if worker_count == 0 {
        return Err(AppError::ConfigError(
            "worker count must be at least 1".into(),
        ));
    }
    if worker_index == 0 || worker_index > worker_count {
        return Err(AppError::ConfigError(format!(
            "worker index {worker_index} out of range 1..={worker_count}"
        )));
    }

    let chunk_size = jobs.len() / worker_count;
    let start = (worker_index - 1) * chunk_size;
    let end = if worker_index == worker_count {
        jobs.len()
    } else {
        start + chunk_size
    };
    Ok(&jobs[start..end])
}
