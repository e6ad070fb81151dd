//! Cleanup of descendants that leave their process group
//!
//! A child can fork a process that calls `setsid()`, which puts it out of
//! reach of `killpg`. The service marks itself as a child subreaper, so such
//! a process is reparented to the service once its parent dies instead of to
//! init. Every live child spawned through [`spawn_tracked`] is registered;
//! any other process whose top-level ancestor below the service is not
//! registered has lost its request and is killed and reaped by
//! [`kill_escaped`].

use std::collections::{BTreeSet, HashMap};
use std::io;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::sys::wait::{WaitPidFlag, waitpid};
use nix::unistd::Pid;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

/// Pids of children spawned by this service that have not been reaped yet
static LIVE: Mutex<BTreeSet<i32>> = Mutex::new(BTreeSet::new());

/// Rounds of kill-and-reap before giving up on stragglers
const MAX_ROUNDS: u32 = 100;
const ROUND_DELAY: Duration = Duration::from_millis(10);

fn live() -> MutexGuard<'static, BTreeSet<i32>> {
    LIVE.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A registered child pid; unregisters on drop
#[derive(Debug)]
pub(crate) struct Tracked(Option<i32>);

impl Drop for Tracked {
    fn drop(&mut self) {
        if let Some(pid) = self.0 {
            live().remove(&pid);
        }
    }
}

/// Spawn `command` and register the child as a live request process
///
/// The registry lock is held across the spawn so a concurrent sweep never
/// sees the new child unregistered.
pub(crate) fn spawn_tracked(command: &mut Command) -> io::Result<(Child, Tracked)> {
    become_subreaper();

    let mut live = live();
    let child = command.spawn()?;
    let pid = child.id().map(|pid| pid as i32);
    if let Some(pid) = pid {
        live.insert(pid);
    }
    Ok((child, Tracked(pid)))
}

#[cfg(target_os = "linux")]
fn become_subreaper() {
    static SUBREAPER: std::sync::Once = std::sync::Once::new();
    SUBREAPER.call_once(|| {
        if let Err(e) = nix::sys::prctl::set_child_subreaper(true) {
            warn!(error = %e, "failed to become child subreaper, escaped processes go to init");
        }
    });
}

#[cfg(not(target_os = "linux"))]
fn become_subreaper() {}

/// Kill and reap every escaped descendant of this service
///
/// Returns how many processes were killed.
pub(crate) async fn kill_escaped() -> usize {
    match tokio::task::spawn_blocking(kill_escaped_blocking).await {
        Ok(killed) => killed,
        Err(e) => {
            warn!(error = %e, "escaped process sweep failed");
            0
        }
    }
}

fn kill_escaped_blocking() -> usize {
    let mut killed = 0;
    for _ in 0..MAX_ROUNDS {
        let round = sweep_once();
        killed += round.killed;
        if round.pending == 0 {
            if killed > 0 {
                debug!(killed, "killed escaped processes");
            }
            return killed;
        }
        std::thread::sleep(ROUND_DELAY);
    }
    warn!(killed, "escaped processes still present after sweep");
    killed
}

#[derive(Debug, Default)]
struct Round {
    killed: usize,
    /// Escapees not yet reaped by this service
    pending: usize,
}

fn sweep_once() -> Round {
    let me = std::process::id() as i32;
    let mut round = Round::default();

    // Held while killing so no child is spawned between snapshot and kill
    let live = live();
    let table = process_table();

    for (&pid, entry) in &table {
        let Some(top) = top_ancestor(&table, pid, me) else {
            continue;
        };
        if live.contains(&top) {
            continue;
        }

        if entry.state == 'Z' {
            if entry.ppid == me {
                reap(pid);
            } else {
                // Reparented to us once its parent is reaped
                round.pending += 1;
            }
            continue;
        }

        match kill(Pid::from_raw(pid), Signal::SIGKILL) {
            Ok(()) => {
                debug!(pid, "killed escaped process");
                round.killed += 1;
                round.pending += 1;
            }
            Err(Errno::ESRCH) => {}
            Err(e) => warn!(pid, error = %e, "failed to kill escaped process"),
        }
    }

    round
}

fn reap(pid: i32) {
    match waitpid(Pid::from_raw(pid), Some(WaitPidFlag::WNOHANG)) {
        Ok(_) | Err(Errno::ECHILD) => {}
        Err(e) => debug!(pid, error = %e, "failed to reap escaped process"),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ProcEntry {
    state: char,
    ppid: i32,
}

/// Snapshot of every process on the host, keyed by pid
fn process_table() -> HashMap<i32, ProcEntry> {
    let mut table = HashMap::new();
    let Ok(entries) = std::fs::read_dir("/proc") else {
        return table;
    };
    for entry in entries.flatten() {
        let Some(pid) = entry.file_name().to_str().and_then(|s| s.parse().ok()) else {
            continue;
        };
        if let Ok(stat) = std::fs::read_to_string(entry.path().join("stat"))
            && let Some(parsed) = parse_stat(&stat)
        {
            table.insert(pid, parsed);
        }
    }
    table
}

/// Parse the state and parent pid out of `/proc/<pid>/stat`
///
/// The command name may contain spaces and parentheses, so fields are read
/// after the last `)`.
fn parse_stat(stat: &str) -> Option<ProcEntry> {
    let (_, rest) = stat.rsplit_once(')')?;
    let mut fields = rest.split_whitespace();
    let state = fields.next()?.chars().next()?;
    let ppid = fields.next()?.parse().ok()?;
    Some(ProcEntry { state, ppid })
}

/// The ancestor of `pid` whose parent is `root`, or `None` if `pid` does not
/// descend from `root`
fn top_ancestor(table: &HashMap<i32, ProcEntry>, pid: i32, root: i32) -> Option<i32> {
    let mut current = pid;
    // Bounded so a pid reused mid-snapshot cannot loop forever
    for _ in 0..table.len() {
        let entry = table.get(&current)?;
        if entry.ppid == root {
            return Some(current);
        }
        if entry.ppid <= 1 {
            return None;
        }
        current = entry.ppid;
    }
    None
}
