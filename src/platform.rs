use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use sha2::{Digest, Sha256};

use crate::error::Result;

/// UTC timestamp in the normalized on-disk form: RFC 3339, `Z` suffix,
/// millisecond part stripped.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn now_string() -> String {
    format_timestamp(Utc::now())
}

pub fn sha256_string(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())
}

pub fn sha256_file(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

/// Unique path under the OS temp directory.
pub fn temp_path(prefix: &str) -> PathBuf {
    let mut bytes = [0u8; 8];
    let suffix = match getrandom::fill(&mut bytes) {
        Ok(()) => bytes.iter().fold(String::new(), |mut acc, b| {
            acc.push_str(&format!("{b:02x}"));
            acc
        }),
        Err(_) => format!("{}", std::process::id()),
    };
    std::env::temp_dir().join(format!("{prefix}-{suffix}"))
}

/// Whether an external tool resolves on PATH.
pub fn tool_available(name: &str) -> bool {
    let Some(path_var) = std::env::var_os("PATH") else {
        return false;
    };
    std::env::split_paths(&path_var).any(|dir| {
        let candidate = dir.join(name);
        candidate.is_file()
            || (cfg!(windows) && dir.join(format!("{name}.exe")).is_file())
    })
}
