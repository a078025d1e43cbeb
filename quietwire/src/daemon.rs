//! PID-file based process supervision for daemonized runs.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context as _, Result, bail};
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;

/// Forks into the background and records our PID.
///
/// A pidfile pointing at a live process refuses the start; a stale one is
/// reclaimed.
#[expect(
    clippy::print_stderr,
    reason = "No logger is active this early during startup."
)]
pub(crate) fn daemonize(pid_file: &Path) -> Result<()> {
    if let Some(pid) = read_pid(pid_file)? {
        if is_alive(pid) {
            bail!(
                "already running with PID {pid} (per `{}`)",
                pid_file.display()
            );
        }

        eprintln!(
            "removing stale PID file `{}` (process {pid} is gone)",
            pid_file.display()
        );
        std::fs::remove_file(pid_file)
            .with_context(|| format!("Failed to remove `{}`", pid_file.display()))?;
    }

    // SAFETY: We are single-threaded this early; the tokio runtime is only
    // built after the fork.
    match unsafe { libc::fork() } {
        -1 => return Err(std::io::Error::last_os_error()).context("Failed to fork"),
        0 => {}
        _parent => std::process::exit(0),
    }

    if unsafe { libc::setsid() } == -1 {
        return Err(std::io::Error::last_os_error()).context("Failed to create session");
    }

    redirect_stdio_to_devnull()?;

    write_pid(pid_file)
}

fn redirect_stdio_to_devnull() -> Result<()> {
    let devnull = unsafe { libc::open(c"/dev/null".as_ptr() as _, libc::O_RDWR) };
    if devnull == -1 {
        return Err(std::io::Error::last_os_error()).context("Failed to open /dev/null");
    }

    unsafe {
        libc::dup2(devnull, 0);
        libc::dup2(devnull, 1);
        libc::dup2(devnull, 2);
        if devnull > 2 {
            libc::close(devnull);
        }
    }

    Ok(())
}

/// Signals the daemonized process recorded in the pidfile and waits for it to
/// exit.
pub(crate) fn stop(pid_file: &Path) -> Result<()> {
    let pid = read_pid(pid_file)?
        .with_context(|| format!("not running (no PID recorded in `{}`)", pid_file.display()))?;

    kill(pid, Signal::SIGTERM).with_context(|| format!("Failed to signal process {pid}"))?;

    for _ in 0..50 {
        if !is_alive(pid) {
            remove_pid_file(pid_file);
            return Ok(());
        }

        std::thread::sleep(Duration::from_millis(100));
    }

    bail!("process {pid} did not exit within 5s")
}

/// Like [`stop`], but tolerates a tunnel that is not running.
pub(crate) fn stop_if_running(pid_file: &Path) -> Result<()> {
    match read_pid(pid_file)? {
        None => Ok(()),
        Some(pid) if !is_alive(pid) => {
            remove_pid_file(pid_file);
            Ok(())
        }
        Some(_) => stop(pid_file),
    }
}

pub(crate) fn remove_pid_file(pid_file: &Path) {
    let _ = std::fs::remove_file(pid_file);
}

fn read_pid(pid_file: &Path) -> Result<Option<Pid>> {
    let contents = match std::fs::read_to_string(pid_file) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to read `{}`", pid_file.display()));
        }
    };

    let pid = contents
        .trim()
        .parse::<i32>()
        .with_context(|| format!("`{}` does not contain a PID", pid_file.display()))?;

    Ok(Some(Pid::from_raw(pid)))
}

fn write_pid(pid_file: &Path) -> Result<()> {
    std::fs::write(pid_file, std::process::id().to_string())
        .with_context(|| format!("Failed to write `{}`", pid_file.display()))
}

fn is_alive(pid: Pid) -> bool {
    kill(pid, None).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_pidfile_reads_as_not_running() {
        let dir = tempfile::tempdir().unwrap();

        assert_eq!(read_pid(&dir.path().join("missing.pid")).unwrap(), None);
    }

    #[test]
    fn pid_roundtrips_through_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("quietwire.pid");

        write_pid(&pid_file).unwrap();

        let pid = read_pid(&pid_file).unwrap().unwrap();
        assert_eq!(pid.as_raw(), std::process::id() as i32);
    }

    #[test]
    fn garbage_in_the_pidfile_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("quietwire.pid");
        std::fs::write(&pid_file, "not a pid").unwrap();

        assert!(read_pid(&pid_file).is_err());
    }

    #[test]
    fn our_own_process_is_alive() {
        assert!(is_alive(Pid::from_raw(std::process::id() as i32)));
    }

    #[test]
    fn a_never_assigned_pid_is_not_alive() {
        // Way above any realistic pid_max.
        assert!(!is_alive(Pid::from_raw(i32::MAX)));
    }

    #[test]
    fn stopping_without_a_pidfile_reports_not_running() {
        let dir = tempfile::tempdir().unwrap();

        let err = stop(&dir.path().join("missing.pid")).unwrap_err();
        assert!(err.to_string().contains("not running"));
    }

    #[test]
    fn stop_if_running_reclaims_a_stale_pidfile() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("quietwire.pid");
        std::fs::write(&pid_file, i32::MAX.to_string()).unwrap();

        stop_if_running(&pid_file).unwrap();

        assert!(!pid_file.exists());
    }

    #[test]
    fn stop_if_running_without_a_pidfile_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();

        stop_if_running(&dir.path().join("missing.pid")).unwrap();
    }
}
