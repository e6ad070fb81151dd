//! Resource limits applied in the child between fork and exec

use nix::sys::resource::{Resource, getrlimit, rlim_t, setrlimit};

use crate::types::ResourceLimits;

/// Resolved `setrlimit` calls for one child
///
/// Built in the parent so that the pre-exec hook only issues syscalls.
#[derive(Debug, Clone, Default)]
pub(crate) struct RlimitSet {
    entries: Vec<(Resource, rlim_t)>,
}

impl RlimitSet {
    pub(crate) fn from_limits(limits: &ResourceLimits) -> Self {
        let mut entries = Vec::new();

        if let Some(secs) = limits.time_limit {
            // RLIMIT_CPU has whole-second granularity
            let secs = secs.ceil().max(1.0) as rlim_t;
            entries.push((Resource::RLIMIT_CPU, secs));
        }
        if let Some(kb) = limits.memory_limit {
            entries.push((Resource::RLIMIT_AS, kb_to_bytes(kb)));
        }
        if let Some(kb) = limits.stack_limit {
            entries.push((Resource::RLIMIT_STACK, kb_to_bytes(kb)));
        }
        if let Some(procs) = limits.max_processes {
            entries.push((Resource::RLIMIT_NPROC, rlim_t::from(procs)));
        }
        if let Some(kb) = limits.max_output {
            entries.push((Resource::RLIMIT_FSIZE, kb_to_bytes(kb)));
        }
        if let Some(files) = limits.max_open_files {
            entries.push((Resource::RLIMIT_NOFILE, rlim_t::from(files)));
        }
        entries.push((Resource::RLIMIT_CORE, 0));

        Self { entries }
    }

    /// Apply every limit to the calling process
    ///
    /// Values above the current hard limit are clamped to it, so an
    /// unprivileged service never fails to lower its own limits.
    pub(crate) fn apply(&self) -> std::io::Result<()> {
        for &(resource, value) in &self.entries {
            let (_, hard) = getrlimit(resource)?;
            let value = value.min(hard);
            setrlimit(resource, value, value)?;
        }
        Ok(())
    }

    #[cfg(test)]
    fn get(&self, resource: Resource) -> Option<rlim_t> {
        self.entries
            .iter()
            .find(|(r, _)| *r == resource)
            .map(|&(_, value)| value)
    }
}

fn kb_to_bytes(kb: u64) -> rlim_t {
    kb.saturating_mul(1024) as rlim_t
}
