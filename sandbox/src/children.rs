// Copyright 2025 Taskcheck project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use std::mem;
use std::process::{Child, Command};
use std::time::{Duration, Instant};

use nix::sys::signal;
use nix::unistd::{getpgid, Pid};

const WAIT_POLL_TIME: Duration = Duration::from_millis(10);

/// What `wait4` told us about a reaped child.
pub struct ExitReport {
    pub status: libc::c_int,
    /// Combined user+system cpu time of the child.
    pub cpu_time: Duration,
    pub wall_time: Duration,
    /// True when the child was killed by us for exceeding its wall-clock deadline.
    pub wall_killed: bool,
}

impl ExitReport {
    pub fn exit_code(&self) -> Option<i32> {
        libc::WIFEXITED(self.status).then(|| libc::WEXITSTATUS(self.status))
    }

    pub fn signal(&self) -> Option<i32> {
        libc::WIFSIGNALED(self.status).then(|| libc::WTERMSIG(self.status))
    }
}

/// A child process running in its own PGID, with a drop implementation that will kill that
/// PGID. The fresh process group makes it safe to tear down everything a run spawned, not just
/// the immediate child.
pub struct ManagedChild {
    child: Child,
    started_at: Instant,
    reaped: bool,
}

impl ManagedChild {
    pub fn spawn(command: &mut Command) -> std::io::Result<ManagedChild> {
        use std::os::unix::process::CommandExt;

        // Adjust the Command to create its own PGID as it starts, to make it safe to kill the
        // PGID later.
        unsafe {
            command.pre_exec(|| {
                nix::unistd::setsid()
                    .map(|_pgid| ())
                    .map_err(|e| std::io::Error::other(format!("Could not create new pgid: {e}")))
            });
        }

        let child = command.spawn()?;
        Ok(ManagedChild {
            child,
            started_at: Instant::now(),
            reaped: false,
        })
    }

    pub fn id(&self) -> u32 {
        self.child.id()
    }

    fn pgid(&self) -> Result<Pid, String> {
        let pid = Pid::from_raw(self.child.id() as i32);
        getpgid(Some(pid)).map_err(|e| format!("Could not get process group id of child: {e}"))
    }

    /// Send a signal to the child's process group.
    fn signal_pg(&self, sig: signal::Signal) -> Result<(), String> {
        let pgid = self.pgid()?;
        // The negative PGID will signal the entire process group.
        signal::kill(Pid::from_raw(-pgid.as_raw()), sig)
            .map_err(|e| format!("Failed to signal child process group: {e}"))
    }

    fn kill_pgid(&self) -> Result<(), String> {
        self.signal_pg(signal::Signal::SIGKILL)
    }

    /// `wait4` once without blocking. Returns the report when the child has been reaped.
    fn try_reap(&mut self, wall_killed: bool) -> Result<Option<ExitReport>, String> {
        let mut status: libc::c_int = 0;
        let mut rusage: libc::rusage = unsafe { mem::zeroed() };
        let pid = unsafe {
            libc::wait4(
                self.child.id() as libc::pid_t,
                &mut status,
                libc::WNOHANG,
                &mut rusage,
            )
        };
        match pid {
            -1 => Err(format!(
                "wait4 failed: {}",
                std::io::Error::last_os_error()
            )),
            0 => Ok(None),
            _ => {
                self.reaped = true;
                Ok(Some(ExitReport {
                    status,
                    cpu_time: timeval_to_duration(rusage.ru_utime)
                        + timeval_to_duration(rusage.ru_stime),
                    wall_time: self.started_at.elapsed(),
                    wall_killed,
                }))
            }
        }
    }

    ///
    /// Wait for the child to exit, polling `wait4` so that rusage is collected for exactly this
    /// child. If `deadline` passes before the child exits, its process group is killed and the
    /// report is marked wall-killed.
    ///
    /// This blocks the calling thread; callers run it on a blocking-task thread.
    ///
    pub fn wait_with_deadline(&mut self, deadline: Option<Instant>) -> Result<ExitReport, String> {
        let mut wall_killed = false;
        loop {
            if let Some(report) = self.try_reap(wall_killed)? {
                return Ok(report);
            }
            if !wall_killed {
                if let Some(deadline) = deadline {
                    if Instant::now() >= deadline {
                        log::debug!("child {} exceeded its wall-clock deadline", self.id());
                        self.kill_pgid()?;
                        wall_killed = true;
                        continue;
                    }
                }
            }
            std::thread::sleep(WAIT_POLL_TIME);
        }
    }
}

/// Implements drop by killing and reaping the process group, so that an abandoned run cannot
/// leak children or zombies.
impl Drop for ManagedChild {
    fn drop(&mut self) {
        if !self.reaped {
            let _ = self.kill_pgid();
            let _ = self.child.wait();
            self.reaped = true;
        }
    }
}

fn timeval_to_duration(tv: libc::timeval) -> Duration {
    Duration::new(tv.tv_sec as u64, (tv.tv_usec as u32) * 1_000)
}
