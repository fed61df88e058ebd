use std::fs;
use std::io::{self, ErrorKind};
use std::path::PathBuf;

use crate::config;

fn pid_file() -> PathBuf {
    config::config_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join("mgw.pid")
}

/// Record the current process id for later stop/status commands.
pub fn write_pid() -> io::Result<()> {
    let path = pid_file();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let pid = std::process::id();
    fs::write(&path, pid.to_string())?;
    tracing::info!("PID {} written to {:?}", pid, path);
    Ok(())
}

pub fn read_pid() -> io::Result<u32> {
    let raw = fs::read_to_string(pid_file())?;
    raw.trim()
        .parse::<u32>()
        .map_err(|e| io::Error::new(ErrorKind::InvalidData, e))
}

pub fn cleanup_pid() -> io::Result<()> {
    let path = pid_file();
    if path.exists() {
        fs::remove_file(&path)?;
        tracing::info!("PID file removed: {:?}", path);
    }
    Ok(())
}

/// Probe whether a process with this pid is alive.
#[cfg(unix)]
pub fn is_process_running(pid: u32) -> bool {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    kill(Pid::from_raw(pid as i32), Signal::SIGCONT).is_ok()
}

#[cfg(windows)]
pub fn is_process_running(pid: u32) -> bool {
    use std::process::Command;

    Command::new("tasklist")
        .args(["/FI", &format!("PID eq {}", pid)])
        .output()
        .ok()
        .and_then(|output| {
            String::from_utf8(output.stdout)
                .ok()
                .map(|s| s.contains(&pid.to_string()))
        })
        .unwrap_or(false)
}
