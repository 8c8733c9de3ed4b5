//! Canonical JSON utilities.
//! - Objects: keys sorted lexicographically (UTF-8 codepoint order)
//! - Arrays: order preserved (caller is responsible for stable ordering)
//! - Compact form: no extra spaces, no trailing newline (hash input)
//! - Pretty form: two-space indent, sorted keys, trailing LF (checkpoints)
//! - Atomic write: unique temp file in the same dir + fsync(temp) + rename;
//!   fsync(dir) on Unix. A failed rename surfaces as `IoError::AtomicWrite`
//!   and leaves the prior file intact.

use std::ffi::OsString;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::Value;

use crate::IoError;

/// Convert any `Serialize` into canonical compact bytes.
pub fn to_canonical_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, IoError> {
    let v = serde_json::to_value(value)?;
    let mut out = Vec::with_capacity(1024);
    write_canonical_value(&v, &mut out);
    Ok(out)
}

/// Convert any `Serialize` into deterministic pretty bytes (sorted keys,
/// two-space indent, trailing LF).
pub fn to_pretty_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, IoError> {
    // serde_json's default Map is ordered, so re-building the value through
    // it yields sorted keys; pretty-printing then preserves that order.
    let v = serde_json::to_value(value)?;
    let mut s = serde_json::to_string_pretty(&v)?;
    s.push('\n');
    Ok(s.into_bytes())
}

fn write_canonical_value(v: &Value, out: &mut Vec<u8>) {
    match v {
        Value::Null => out.extend_from_slice(b"null"),
        Value::Bool(b) => out.extend_from_slice(if *b { b"true" } else { b"false" }),
        Value::Number(n) => out.extend_from_slice(n.to_string().as_bytes()),
        Value::String(s) => {
            let quoted = serde_json::to_string(s).expect("string serialization cannot fail");
            out.extend_from_slice(quoted.as_bytes());
        }
        Value::Array(arr) => {
            out.push(b'[');
            let mut first = true;
            for elem in arr {
                if !first {
                    out.push(b',');
                }
                first = false;
                write_canonical_value(elem, out);
            }
            out.push(b']');
        }
        Value::Object(map) => {
            out.push(b'{');
            let mut keys: Vec<&str> = map.keys().map(|k| k.as_str()).collect();
            keys.sort_unstable();
            let mut first = true;
            for k in keys {
                if !first {
                    out.push(b',');
                }
                first = false;
                let quoted_key = serde_json::to_string(k).expect("key serialization cannot fail");
                out.extend_from_slice(quoted_key.as_bytes());
                out.push(b':');
                write_canonical_value(&map[k], out);
            }
            out.push(b'}');
        }
    }
}

/// Write `bytes` to `path` atomically. Parent directories are created as
/// needed (0755 on Unix by default).
pub fn atomic_write(path: &Path, bytes: &[u8]) -> Result<(), IoError> {
    let parent = path.parent().ok_or_else(|| IoError::AtomicWrite {
        path: path.to_path_buf(),
        reason: "path has no parent directory".into(),
    })?;
    fs::create_dir_all(parent).map_err(|e| IoError::File {
        path: parent.to_path_buf(),
        source: e,
    })?;

    let tmp = make_unique_tmp_path(path);
    let result = write_and_rename(&tmp, path, parent, bytes);
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

fn write_and_rename(tmp: &Path, target: &Path, parent: &Path, bytes: &[u8]) -> Result<(), IoError> {
    let atomic_err = |reason: String| IoError::AtomicWrite {
        path: target.to_path_buf(),
        reason,
    };

    let mut tf = OpenOptions::new()
        .write(true)
        .create_new(true) // avoid clobbering another writer's temp
        .open(tmp)
        .map_err(|e| atomic_err(format!("create temp {}: {e}", tmp.display())))?;
    tf.write_all(bytes)
        .map_err(|e| atomic_err(format!("write temp: {e}")))?;
    tf.sync_all()
        .map_err(|e| atomic_err(format!("fsync temp: {e}")))?;
    drop(tf);

    fs::rename(tmp, target).map_err(|e| atomic_err(format!("rename: {e}")))?;

    // Persist the rename itself on Unix; elsewhere the rename is the best we
    // can do.
    let _ = fsync_dir(parent);
    Ok(())
}

/// Create a unique temp path next to `target`: "<filename>.<pid>.<counter>.tmp"
fn make_unique_tmp_path(target: &Path) -> PathBuf {
    use std::sync::atomic::{AtomicU64, Ordering};

    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let pid = std::process::id();
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);

    let fname = target
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("file");
    let tmp_name: OsString = OsString::from(format!("{fname}.{pid}.{n}.tmp"));

    match target.parent() {
        Some(dir) => dir.join(tmp_name),
        None => PathBuf::from(tmp_name),
    }
}

#[cfg(unix)]
fn fsync_dir(dir: &Path) -> std::io::Result<()> {
    let df = OpenOptions::new().read(true).open(dir)?;
    df.sync_all()
}

#[cfg(not(unix))]
#[inline]
fn fsync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}
