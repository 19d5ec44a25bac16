use std::sync::LazyLock;

use regex::Regex;

// [user@]host:path; neither user nor host may contain '/', ':' or '@'
static REMOTE_SPEC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:([^@:/]+)@)?([^@:/]+):(.+)$").expect("valid remote spec pattern")
});

/// Parts of a remote destination string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteSpec {
    pub user: Option<String>,
    pub host: String,
    pub path: String,
}

// `X:\...` only; `x:/data` stays a valid spec for a single-letter host
fn is_windows_drive(s: &str) -> bool {
    let bytes = s.as_bytes();
    bytes.len() >= 3 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' && bytes[2] == b'\\'
}

/// Split `[user@]host:path` into its parts. Returns `None` for anything that
/// should be treated as a local path (including `C:\...` drive paths and
/// `host:` with an empty path).
pub fn parse_remote_spec(input: &str) -> Option<RemoteSpec> {
    if is_windows_drive(input) {
        return None;
    }
    let caps = REMOTE_SPEC.captures(input)?;
    let user = caps.get(1).map(|m| m.as_str().to_string());
    let host = caps.get(2)?.as_str().to_string();
    let path = caps.get(3)?.as_str().to_string();
    Some(RemoteSpec { user, host, path })
}

pub fn is_remote_spec(s: &str) -> bool {
    parse_remote_spec(s).is_some()
}

/// Parse a whitespace separated flag string the way the shell-free CLI does.
pub fn split_args(s: &str) -> Vec<String> {
    s.split_whitespace().map(str::to_string).collect()
}
