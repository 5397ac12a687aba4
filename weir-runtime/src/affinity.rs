//! Worker placement hints: CPU pinning and realtime priority.
//!
//! Hints are validated during setup, where a bad value is a configuration
//! error, and applied on the worker thread itself, where a refusal from
//! the OS only warrants a warning.

use weir_core::error::Result;

#[cfg(target_os = "linux")]
mod imp {
    use std::collections::HashSet;

    use weir_core::error::{Result, WeirError};

    pub fn validate_cpu_pinning(stage: &str, cpus: &[u32]) -> Result<()> {
        if cpus.is_empty() {
            tracing::warn!(stage, "cpu pinning configured but no CPUs specified");
            return Ok(());
        }

        let configured = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_CONF) };
        let mut max_cpu_id = libc::CPU_SETSIZE as u32;
        if configured > 0 && (configured as u32) < max_cpu_id {
            max_cpu_id = configured as u32;
        }

        let mut seen = HashSet::with_capacity(cpus.len());
        for &cpu in cpus {
            if cpu >= max_cpu_id {
                return Err(WeirError::InvalidCpuPinning {
                    stage: stage.to_string(),
                    cause: format!("CPU id {} out of range 0-{}", cpu, max_cpu_id - 1),
                });
            }
            if !seen.insert(cpu) {
                return Err(WeirError::InvalidCpuPinning {
                    stage: stage.to_string(),
                    cause: format!("duplicate CPU id {}", cpu),
                });
            }
        }
        Ok(())
    }

    pub fn apply_cpu_pinning(stage: &str, worker: usize, cpus: &[u32]) {
        if cpus.is_empty() {
            return;
        }

        let mut set: libc::cpu_set_t = unsafe { std::mem::zeroed() };
        for &cpu in cpus {
            unsafe { libc::CPU_SET(cpu as usize, &mut set) };
        }

        let rc = unsafe { libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set) };
        if rc != 0 {
            tracing::warn!(
                stage,
                worker,
                error = %std::io::Error::last_os_error(),
                "failed to set cpu affinity"
            );
        } else {
            tracing::info!(stage, worker, ?cpus, "worker pinned to CPUs");
        }
    }

    pub fn validate_realtime_priority(stage: &str, priority: i32) -> Result<()> {
        let min = unsafe { libc::sched_get_priority_min(libc::SCHED_FIFO) };
        let max = unsafe { libc::sched_get_priority_max(libc::SCHED_FIFO) };
        if min == -1 || max == -1 {
            tracing::warn!(stage, "unable to resolve realtime priority range");
            return Ok(());
        }

        if priority < min || priority > max {
            return Err(WeirError::InvalidRealtimePriority {
                stage: stage.to_string(),
                priority,
                min,
                max,
            });
        }
        Ok(())
    }

    pub fn apply_realtime_priority(stage: &str, worker: usize, priority: i32) {
        let param = libc::sched_param {
            sched_priority: priority,
        };
        let rc = unsafe { libc::pthread_setschedparam(libc::pthread_self(), libc::SCHED_FIFO, &param) };
        if rc != 0 {
            tracing::warn!(
                stage,
                worker,
                priority,
                error = %std::io::Error::from_raw_os_error(rc),
                "failed to set realtime priority"
            );
        } else {
            tracing::info!(stage, worker, priority, "worker realtime priority set (policy=FIFO)");
        }
    }
}

#[cfg(not(target_os = "linux"))]
mod imp {
    use weir_core::error::Result;

    pub fn validate_cpu_pinning(stage: &str, _cpus: &[u32]) -> Result<()> {
        tracing::warn!(stage, "cpu pinning requested but not supported on this platform");
        Ok(())
    }

    pub fn apply_cpu_pinning(_stage: &str, _worker: usize, _cpus: &[u32]) {}

    pub fn validate_realtime_priority(stage: &str, _priority: i32) -> Result<()> {
        tracing::warn!(stage, "realtime priority requested but not supported on this platform");
        Ok(())
    }

    pub fn apply_realtime_priority(_stage: &str, _worker: usize, _priority: i32) {}
}

/// Reject CPU lists that name unusable or duplicate CPUs.
pub fn validate_cpu_pinning(stage: &str, cpus: &[u32]) -> Result<()> {
    imp::validate_cpu_pinning(stage, cpus)
}

/// Pin the calling worker thread to the given CPUs. Failures warn only.
pub fn apply_cpu_pinning(stage: &str, worker: usize, cpus: &[u32]) {
    imp::apply_cpu_pinning(stage, worker, cpus)
}

/// Reject priorities outside the scheduler's SCHED_FIFO range.
pub fn validate_realtime_priority(stage: &str, priority: i32) -> Result<()> {
    imp::validate_realtime_priority(stage, priority)
}

/// Apply a SCHED_FIFO priority to the calling worker thread. Failures
/// warn only.
pub fn apply_realtime_priority(stage: &str, worker: usize, priority: i32) {
    imp::apply_realtime_priority(stage, worker, priority)
}
