use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex};

use tempfile::TempDir;

use super::cancel::CancelToken;
use super::process::{ChildOutput, run_to_completion};
use crate::error::{RunError, SetupError};

/// A persistent OpenSSH control master shared by every remote operation of a
/// run. Dropping it asks the master to exit and removes the socket directory.
#[derive(Debug)]
pub struct ControlConnection {
    ssh_program: PathBuf,
    user: Option<String>,
    host: String,
    control_path: PathBuf,
    control_dir: Option<TempDir>,
}

impl ControlConnection {
    /// Start a backgrounded, persisting control master for `host`.
    pub fn establish(
        ssh_program: &Path,
        user: Option<&str>,
        host: &str,
    ) -> Result<Self, SetupError> {
        let control_dir = tempfile::Builder::new().prefix("rsync_ssh_").tempdir().map_err(|e| {
            SetupError::ConnectionSetup(host.to_string(), format!("control dir: {}", e))
        })?;
        let control_path = control_dir.path().join("control_%h_%p_%r");
        let conn = ControlConnection {
            ssh_program: ssh_program.to_path_buf(),
            user: user.map(str::to_string),
            host: host.to_string(),
            control_path,
            control_dir: Some(control_dir),
        };

        let mut cmd = Command::new(&conn.ssh_program);
        if let Some(u) = &conn.user {
            cmd.arg("-l").arg(u);
        }
        cmd.arg("-nNf")
            .args(["-o", "ControlMaster=yes"])
            .arg("-o")
            .arg(conn.control_path_option())
            .args(["-o", "ControlPersist=yes"])
            .arg(&conn.host);
        tracing::debug!("[sync][conn] establishing control master: {:?}", cmd);
        // the backgrounded master inherits any pipes we hand it, so don't capture
        let failure = match cmd
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .status()
        {
            Ok(st) if st.success() => None,
            Ok(st) => Some(match st.code() {
                Some(c) => format!("ssh exited with status {}", c),
                None => "ssh terminated by signal".to_string(),
            }),
            Err(e) => Some(e.to_string()),
        };
        if let Some(detail) = failure {
            // no master to stop; only the socket dir needs removing
            let mut conn = conn;
            conn.remove_control_dir();
            return Err(SetupError::ConnectionSetup(conn.host.clone(), detail));
        }
        tracing::info!("[sync][conn] control connection to {} ready", conn.host);
        Ok(conn)
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn control_path(&self) -> &Path {
        &self.control_path
    }

    fn control_path_option(&self) -> String {
        format!("ControlPath={}", self.control_path.display())
    }

    /// Base ssh invocation routed through the control socket.
    pub fn ssh_command(&self) -> Command {
        control_command(&self.ssh_program, &self.control_path, self.user.as_deref())
    }

    /// Everything needed to stop this master from outside the owning thread.
    /// `None` once the connection has been torn down.
    pub fn stop_handle(&self) -> Option<MasterStop> {
        let dir = self.control_dir.as_ref()?;
        Some(MasterStop {
            ssh_program: self.ssh_program.clone(),
            user: self.user.clone(),
            host: self.host.clone(),
            control_path: self.control_path.clone(),
            control_dir: dir.path().to_path_buf(),
        })
    }

    /// Transport override handed to `rsync -e`.
    pub fn rsync_shell(&self) -> String {
        rsync_shell_string(&self.ssh_program, &self.control_path, self.user.as_deref())
    }

    /// Run `remote_cmd` on the host over the shared connection.
    pub fn exec(
        &self,
        remote_cmd: &str,
        stdin: Option<Vec<u8>>,
        cancel: &CancelToken,
    ) -> Result<ChildOutput, RunError> {
        let mut cmd = self.ssh_command();
        cmd.arg(&self.host).arg(remote_cmd);
        run_to_completion(&mut cmd, stdin, cancel)
    }

    fn remove_control_dir(&mut self) {
        if let Some(dir) = self.control_dir.take() {
            let shown = dir.path().display().to_string();
            if let Err(e) = dir.close() {
                tracing::warn!("[sync][conn] failed to remove control dir {}: {}", shown, e);
            }
        }
    }

    fn teardown(&mut self) {
        if self.control_dir.is_none() {
            return;
        }
        send_master_exit(&self.ssh_program, &self.control_path, self.user.as_deref(), &self.host);
        self.remove_control_dir();
    }

    /// Explicit close; equivalent to dropping the connection.
    pub fn close(mut self) {
        self.teardown();
    }
}

impl Drop for ControlConnection {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Detached copy of a master's identity, used to stop it when the process
/// is about to exit without unwinding.
#[derive(Debug, Clone)]
pub struct MasterStop {
    ssh_program: PathBuf,
    user: Option<String>,
    host: String,
    control_path: PathBuf,
    control_dir: PathBuf,
}

impl MasterStop {
    /// Ask the master to exit and remove the socket directory.
    pub fn stop(&self) {
        send_master_exit(&self.ssh_program, &self.control_path, self.user.as_deref(), &self.host);
        if let Err(e) = std::fs::remove_dir_all(&self.control_dir)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            tracing::warn!(
                "[sync][conn] failed to remove control dir {}: {}",
                self.control_dir.display(),
                e
            );
        }
    }
}

/// Slot shared with the Ctrl-C handler. While armed, a forced exit stops
/// the master first.
#[derive(Debug, Clone, Default)]
pub struct ForcedTeardown(Arc<Mutex<Option<MasterStop>>>);

impl ForcedTeardown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arm(&self, stop: MasterStop) {
        *self.0.lock().unwrap_or_else(|p| p.into_inner()) = Some(stop);
    }

    pub fn disarm(&self) {
        self.0.lock().unwrap_or_else(|p| p.into_inner()).take();
    }

    /// Stop the armed master, if any. Runs at most once per arming.
    pub fn run(&self) {
        let stop = self.0.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(stop) = stop {
            tracing::debug!("[sync][conn] forced teardown of master for {}", stop.host);
            stop.stop();
        }
    }
}

fn control_command(ssh_program: &Path, control_path: &Path, user: Option<&str>) -> Command {
    let mut cmd = Command::new(ssh_program);
    cmd.arg("-o").arg(format!("ControlPath={}", control_path.display()));
    if let Some(u) = user {
        cmd.arg("-l").arg(u);
    }
    cmd
}

fn send_master_exit(ssh_program: &Path, control_path: &Path, user: Option<&str>, host: &str) {
    let mut cmd = control_command(ssh_program, control_path, user);
    cmd.args(["-O", "exit"]).arg(host);
    match cmd.stdin(Stdio::null()).stdout(Stdio::null()).stderr(Stdio::null()).status() {
        Ok(st) if st.success() => {
            tracing::debug!("[sync][conn] control master for {} closed", host)
        }
        Ok(st) => {
            tracing::warn!("[sync][conn] control master exit request for {} returned {}", host, st)
        }
        Err(e) => tracing::warn!("[sync][conn] failed to close control master: {}", e),
    }
}

pub(crate) fn rsync_shell_string(
    ssh_program: &Path,
    control_path: &Path,
    user: Option<&str>,
) -> String {
    let mut s = format!("{} -o ControlPath={}", ssh_program.display(), control_path.display());
    if let Some(u) = user {
        s.push_str(" -l ");
        s.push_str(u);
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rsync_shell_routes_through_control_path() {
        let s = rsync_shell_string(
            Path::new("ssh"),
            Path::new("/tmp/rsync_ssh_x/control_%h_%p_%r"),
            Some("alice"),
        );
        assert_eq!(s, "ssh -o ControlPath=/tmp/rsync_ssh_x/control_%h_%p_%r -l alice");
        let anon = rsync_shell_string(Path::new("/usr/bin/ssh"), Path::new("/c"), None);
        assert_eq!(anon, "/usr/bin/ssh -o ControlPath=/c");
    }

    #[cfg(unix)]
    #[test]
    fn failed_master_is_setup_error() {
        // `false` stands in for an ssh that cannot reach the host
        let err = ControlConnection::establish(Path::new("false"), Some("bob"), "unreachable")
            .expect_err("must fail");
        assert!(matches!(err, SetupError::ConnectionSetup(ref h, _) if h == "unreachable"));
    }

    #[cfg(unix)]
    fn fake_ssh(dir: &Path) -> (PathBuf, PathBuf) {
        use std::os::unix::fs::PermissionsExt;
        let log = dir.join("ssh.log");
        let script = dir.join("fake-ssh");
        let body = format!("#!/bin/sh\nprintf '%s\\n' \"$*\" >> '{}'\n", log.display());
        std::fs::write(&script, body).unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        (script, log)
    }

    #[cfg(unix)]
    #[test]
    fn forced_teardown_stops_master_and_removes_socket_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let (ssh, log) = fake_ssh(tmp.path());
        let conn = ControlConnection::establish(&ssh, Some("carol"), "db01").unwrap();
        let dir = conn.control_path().parent().unwrap().to_path_buf();
        assert!(dir.is_dir());

        let slot = ForcedTeardown::new();
        slot.arm(conn.stop_handle().unwrap());
        slot.clone().run();
        assert!(!dir.exists());
        let calls = std::fs::read_to_string(&log).unwrap();
        let exit = calls.lines().find(|l| l.contains("-O exit")).expect("exit request sent");
        assert!(exit.contains("-l carol") && exit.ends_with("db01"));

        // a second run is a no-op once the slot has fired
        slot.run();
        let after = std::fs::read_to_string(&log).unwrap();
        assert_eq!(after.lines().filter(|l| l.contains("-O exit")).count(), 1);
        drop(conn);
    }

    #[cfg(unix)]
    #[test]
    fn disarmed_slot_leaves_master_alone() {
        let tmp = tempfile::tempdir().unwrap();
        let (ssh, log) = fake_ssh(tmp.path());
        let conn = ControlConnection::establish(&ssh, None, "db02").unwrap();
        let slot = ForcedTeardown::new();
        slot.arm(conn.stop_handle().unwrap());
        slot.disarm();
        slot.run();
        assert!(conn.control_path().parent().unwrap().is_dir());
        assert!(!std::fs::read_to_string(&log).unwrap().contains("-O exit"));
        conn.close();
        assert!(std::fs::read_to_string(&log).unwrap().contains("-O exit"));
    }

    #[test]
    fn missing_ssh_program_is_setup_error() {
        let err = ControlConnection::establish(
            Path::new("/nonexistent/prsync-ssh"),
            None,
            "host",
        )
        .expect_err("must fail");
        assert!(matches!(err, SetupError::ConnectionSetup(_, _)));
    }
}
