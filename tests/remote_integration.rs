#![cfg(unix)]
// Remote destinations against a stand-in ssh: the control master and `-O exit`
// calls are only logged, while remote commands run under `sh -c` inside a
// temporary directory playing the remote login directory.

use std::collections::HashSet;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use prsync::sync::{
    CancelToken, ControlConnection, ExistenceProbe, RemoteProbe, SyncOptions, Syncer,
};

const FAKE_SSH: &str = r#"#!/bin/sh
log='@LOG@'
case "$*" in
  *ControlMaster=yes*) printf 'master %s\n' "$*" >> "$log"; exit 0 ;;
esac
for a in "$@"; do
  if [ "$a" = "-O" ]; then printf 'exit %s\n' "$*" >> "$log"; exit 0; fi
done
printf 'exec %s\n' "$*" >> "$log"
if [ -n '@FAIL@' ]; then
  echo "connection reset" >&2
  exit 255
fi
eval "cmd=\${$#}"
cd '@HOME@' || exit 255
exec sh -c "$cmd"
"#;

// Logs each call and the files named by its manifest; transfers nothing.
const FAKE_RSYNC: &str = r#"#!/bin/sh
log='@LOG@'
printf 'call %s\n' "$*" >> "$log"
for a in "$@"; do
  case "$a" in
    --files-from=*)
      list="${a#--files-from=}"
      while IFS= read -r p; do printf 'file %s\n' "$p" >> "$log"; done < "$list" ;;
  esac
done
exit 0
"#;

struct Remote {
    root: tempfile::TempDir,
    home: PathBuf,
    ssh: PathBuf,
    ssh_log: PathBuf,
    rsync: PathBuf,
    rsync_log: PathBuf,
}

fn write_script(path: &Path, body: &str) {
    std::fs::write(path, body).unwrap();
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
}

fn remote(check_fails: bool) -> Remote {
    let root = tempfile::tempdir().unwrap();
    let home = root.path().join("home");
    std::fs::create_dir_all(home.join("backup/sub")).unwrap();
    std::fs::write(home.join("backup/a.txt"), "old a").unwrap();
    std::fs::write(home.join("backup/sub/c.txt"), "old c").unwrap();

    let ssh_log = root.path().join("ssh.log");
    let ssh = root.path().join("fake-ssh");
    let body = FAKE_SSH
        .replace("@LOG@", &ssh_log.display().to_string())
        .replace("@HOME@", &home.display().to_string())
        .replace("@FAIL@", if check_fails { "1" } else { "" });
    write_script(&ssh, &body);

    let rsync_log = root.path().join("rsync.log");
    let rsync = root.path().join("fake-rsync");
    write_script(&rsync, &FAKE_RSYNC.replace("@LOG@", &rsync_log.display().to_string()));
    Remote { root, home, ssh, ssh_log, rsync, rsync_log }
}

fn lines_with(log: &Path, prefix: &str) -> Vec<String> {
    std::fs::read_to_string(log)
        .unwrap_or_default()
        .lines()
        .filter(|l| l.starts_with(prefix))
        .map(str::to_string)
        .collect()
}

fn set(items: &[&str]) -> HashSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn make_source(root: &Path) -> PathBuf {
    let src = root.join("src");
    std::fs::create_dir_all(src.join("sub")).unwrap();
    std::fs::write(src.join("a.txt"), "a").unwrap();
    std::fs::write(src.join("b.txt"), "b").unwrap();
    std::fs::write(src.join("sub/d.txt"), "d").unwrap();
    src
}

fn syncer(r: &Remote, src: &Path, destination: &str) -> Syncer {
    Syncer::prepare(SyncOptions {
        source: src.to_path_buf(),
        destination: destination.to_string(),
        jobs: 2,
        // one file per bucket
        bucket_size_mib: 0,
        rsync_args: vec!["-a".to_string()],
        rsync_program: r.rsync.clone(),
        ssh_program: r.ssh.clone(),
    })
    .expect("prepare")
}

#[test]
fn test_existing_files_detected_in_one_round_trip() {
    let r = remote(false);
    let conn = ControlConnection::establish(&r.ssh, Some("alice"), "db01").unwrap();
    let rels = ["a.txt", "b.txt", "sub/c.txt", "with space.txt"];
    let absolute = r.home.join("backup").display().to_string();

    for (i, root) in ["~/backup", "backup", absolute.as_str()].into_iter().enumerate() {
        let found = RemoteProbe::new(&conn, root).existing(&rels, &CancelToken::new()).unwrap();
        assert_eq!(found, set(&["a.txt", "sub/c.txt"]), "root={}", root);
        assert_eq!(lines_with(&r.ssh_log, "exec").len(), i + 1, "one exec per call");
    }

    let execs = lines_with(&r.ssh_log, "exec");
    assert!(execs.iter().all(|l| l.contains("ControlPath=") && l.contains("-l alice")));
    conn.close();
}

#[test]
fn test_existence_check_on_home_directory_itself() {
    let r = remote(false);
    std::fs::write(r.home.join("top.txt"), "x").unwrap();
    let conn = ControlConnection::establish(&r.ssh, None, "db01").unwrap();
    let found = RemoteProbe::new(&conn, "~")
        .existing(&["top.txt", "backup/a.txt", "nope.txt"], &CancelToken::new())
        .unwrap();
    assert_eq!(found, set(&["top.txt", "backup/a.txt"]));
}

#[test]
fn test_remote_run_skips_existing_and_routes_rsync_through_master() {
    let r = remote(false);
    let src = make_source(r.root.path());
    let s = syncer(&r, &src, "alice@db01:~/backup");
    let control_dir = s.connection().unwrap().control_path().parent().unwrap().to_path_buf();
    assert!(control_dir.is_dir());

    let report = s.run(&CancelToken::new(), None);
    assert_eq!(report.total_files, 3);
    assert_eq!(report.buckets, 3);
    assert_eq!(report.completed_files, 3);
    assert_eq!(report.skipped_files, 1);
    assert_eq!(report.transferred_files, 2);
    assert_eq!(report.exit_code(), 0);

    // exactly one existence round trip per bucket
    assert_eq!(lines_with(&r.ssh_log, "exec").len(), 3);
    let calls = lines_with(&r.rsync_log, "call");
    assert_eq!(calls.len(), 2);
    for call in &calls {
        assert!(call.contains("-a -e "), "{}", call);
        assert!(call.contains("fake-ssh -o ControlPath="), "{}", call);
        assert!(call.contains("-l alice"), "{}", call);
        assert!(call.ends_with(" alice@db01:~/backup"), "{}", call);
    }
    let sent: HashSet<String> = lines_with(&r.rsync_log, "file")
        .iter()
        .map(|l| l.trim_start_matches("file ").to_string())
        .collect();
    assert_eq!(sent, set(&["b.txt", "sub/d.txt"]));

    s.close();
    assert!(!control_dir.exists(), "control dir removed on close");
    let exits = lines_with(&r.ssh_log, "exit");
    assert_eq!(exits.len(), 1);
    assert!(exits[0].contains("-O exit") && exits[0].ends_with("db01"));
    assert!(lines_with(&r.ssh_log, "master")[0].contains("ControlPersist=yes"));
}

#[test]
fn test_failed_existence_check_keeps_files_pending() {
    let r = remote(true);
    let src = make_source(r.root.path());
    let s = syncer(&r, &src, "db01:~/backup");

    let report = s.run(&CancelToken::new(), None);
    assert_eq!(report.skipped_files, 0);
    assert_eq!(report.transferred_files, 3);
    assert_eq!(lines_with(&r.rsync_log, "call").len(), 3);
    assert!(report.is_success());
}

#[test]
fn test_cancelled_remote_run_still_tears_down() {
    let r = remote(false);
    let src = make_source(r.root.path());
    let s = syncer(&r, &src, "db01:backup");
    let control_dir = s.connection().unwrap().control_path().parent().unwrap().to_path_buf();
    let cancel = CancelToken::new();
    cancel.cancel();

    let report = s.run(&cancel, None);
    assert!(report.cancelled);
    assert!(lines_with(&r.rsync_log, "call").is_empty());
    drop(s);
    assert!(!control_dir.exists());
    assert_eq!(lines_with(&r.ssh_log, "exit").len(), 1);
}
