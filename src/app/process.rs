use std::process::{Child, Command as ProcessCommand, ExitStatus};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};

#[cfg(unix)]
use std::os::unix::process::CommandExt;

const POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy)]
pub(crate) struct PlayerExit {
    pub(crate) status: ExitStatus,
    pub(crate) elapsed: Duration,
}

/// Restores the previous disposition of a signal when dropped.
#[cfg(unix)]
struct SignalGuard {
    signum: libc::c_int,
    previous: libc::sigaction,
}

#[cfg(unix)]
impl SignalGuard {
    fn ignore(signum: libc::c_int) -> Result<Self> {
        unsafe {
            let mut ignored: libc::sigaction = std::mem::zeroed();
            ignored.sa_sigaction = libc::SIG_IGN;
            libc::sigemptyset(&mut ignored.sa_mask);

            let mut previous: libc::sigaction = std::mem::zeroed();
            if libc::sigaction(signum, &ignored, &mut previous) != 0 {
                return Err(anyhow!("failed to ignore signal {signum}"));
            }
            Ok(Self { signum, previous })
        }
    }
}

#[cfg(unix)]
impl Drop for SignalGuard {
    fn drop(&mut self) {
        unsafe {
            let _ = libc::sigaction(self.signum, &self.previous, std::ptr::null_mut());
        }
    }
}

/// Gives the terminal back to our process group when dropped, if it was
/// handed to the player.
#[cfg(unix)]
struct ForegroundGuard {
    tty_fd: libc::c_int,
    our_pgrp: libc::pid_t,
    handed_off: bool,
}

#[cfg(unix)]
impl ForegroundGuard {
    fn hand_to(&mut self, child_pgrp: libc::pid_t) {
        self.handed_off = unsafe { libc::tcsetpgrp(self.tty_fd, child_pgrp) == 0 };
    }
}

#[cfg(unix)]
impl Drop for ForegroundGuard {
    fn drop(&mut self) {
        if self.handed_off {
            unsafe {
                let _ = libc::tcsetpgrp(self.tty_fd, self.our_pgrp);
            }
        }
    }
}

/// Runs the player to completion, calling `on_checkpoint` with the elapsed
/// playback time every `checkpoint_every` and once more after it exits.
///
/// Checkpoint failures while the player runs are logged and playback goes
/// on; a failure of the final checkpoint is returned.
pub(crate) fn run_player<F>(
    cmd: ProcessCommand,
    checkpoint_every: Duration,
    mut on_checkpoint: F,
) -> Result<PlayerExit>
where
    F: FnMut(Duration) -> Result<()>,
{
    let started = Instant::now();
    let status = with_sigint_ignored(|| {
        spawn_and_wait(cmd, checkpoint_every, started, |elapsed| {
            if let Err(err) = on_checkpoint(elapsed) {
                tracing::warn!(error = %err, "playback checkpoint failed");
            }
        })
    })?;

    let elapsed = started.elapsed();
    on_checkpoint(elapsed).context("failed to record final playback position")?;
    tracing::info!(?status, elapsed_secs = elapsed.as_secs_f64(), "player exited");
    Ok(PlayerExit { status, elapsed })
}

#[cfg(unix)]
fn with_sigint_ignored<F, R>(f: F) -> Result<R>
where
    F: FnOnce() -> Result<R>,
{
    let _sigint = SignalGuard::ignore(libc::SIGINT)?;
    f()
}

#[cfg(not(unix))]
fn with_sigint_ignored<F, R>(f: F) -> Result<R>
where
    F: FnOnce() -> Result<R>,
{
    f()
}

#[cfg(unix)]
fn spawn_and_wait(
    mut cmd: ProcessCommand,
    checkpoint_every: Duration,
    started: Instant,
    checkpoint: impl FnMut(Duration),
) -> Result<ExitStatus> {
    let tty_fd = libc::STDIN_FILENO;
    let our_pgrp = unsafe { libc::tcgetpgrp(tty_fd) };
    let has_tty = our_pgrp != -1;

    let _sigttou = if has_tty {
        Some(SignalGuard::ignore(libc::SIGTTOU)?)
    } else {
        None
    };
    let mut foreground = ForegroundGuard {
        tty_fd,
        our_pgrp,
        handed_off: false,
    };

    unsafe {
        cmd.pre_exec(move || {
            libc::signal(libc::SIGINT, libc::SIG_DFL);
            libc::signal(libc::SIGQUIT, libc::SIG_DFL);
            libc::signal(libc::SIGTSTP, libc::SIG_DFL);
            if has_tty && libc::setpgid(0, 0) != 0 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }

    let child = cmd.spawn().context("failed to launch player")?;
    if has_tty {
        foreground.hand_to(child.id() as libc::pid_t);
    }
    wait_with_checkpoints(child, checkpoint_every, started, checkpoint)
}

#[cfg(not(unix))]
fn spawn_and_wait(
    mut cmd: ProcessCommand,
    checkpoint_every: Duration,
    started: Instant,
    checkpoint: impl FnMut(Duration),
) -> Result<ExitStatus> {
    let child = cmd.spawn().context("failed to launch player")?;
    wait_with_checkpoints(child, checkpoint_every, started, checkpoint)
}

fn wait_with_checkpoints(
    mut child: Child,
    checkpoint_every: Duration,
    started: Instant,
    mut checkpoint: impl FnMut(Duration),
) -> Result<ExitStatus> {
    tracing::debug!(pid = child.id(), "player started");
    let mut last_checkpoint = started;
    loop {
        if let Some(status) = child.try_wait().context("failed waiting on player")? {
            return Ok(status);
        }
        thread::sleep(POLL_INTERVAL.min(checkpoint_every));
        if last_checkpoint.elapsed() >= checkpoint_every {
            last_checkpoint = Instant::now();
            checkpoint(started.elapsed());
        }
    }
}
