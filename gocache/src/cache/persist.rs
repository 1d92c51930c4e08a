//! Atomic on-disk persistence for the response store.
//!
//! Uses `bincode` for the opaque binary encoding (the spec leaves the
//! format's choice up to the implementation; `bincode` is what the closest
//! reference proxy in this codebase's lineage, `CacheBolt`, reaches for).
//! `save` writes to a temp file in the target's directory, fsync-closes it,
//! then renames over the destination so a write failure never corrupts an
//! existing cache file.

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use crate::cache::entry::CachedResponse;
use crate::error::{ProxyError, Result};

const BINCODE_CONFIG: bincode::config::Configuration = bincode::config::standard();

pub fn save_to_file(path: &Path, entries: &[(String, CachedResponse)]) -> Result<()> {
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| Path::new("."));
    let tmp_path = dir.join(format!(
        ".{}.tmp",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("gocache-cache")
    ));

    let encoded = bincode::serde::encode_to_vec(entries, BINCODE_CONFIG)
        .map_err(|e| ProxyError::Persistence(format!("encode failed: {e}")))?;

    {
        let mut file = File::create(&tmp_path)
            .map_err(|e| ProxyError::Persistence(format!("create temp file failed: {e}")))?;
        file.write_all(&encoded)
            .map_err(|e| ProxyError::Persistence(format!("write failed: {e}")))?;
        file.sync_all()
            .map_err(|e| ProxyError::Persistence(format!("fsync failed: {e}")))?;
    }

    fs::rename(&tmp_path, path)
        .map_err(|e| ProxyError::Persistence(format!("rename failed: {e}")))?;

    Ok(())
}

pub fn load_from_file(path: &Path) -> Result<Vec<(String, CachedResponse)>> {
    let bytes = fs::read(path).map_err(|e| ProxyError::Persistence(format!("read failed: {e}")))?;

    let (entries, _): (Vec<(String, CachedResponse)>, usize) =
        bincode::serde::decode_from_slice(&bytes, BINCODE_CONFIG)
            .map_err(|e| ProxyError::Persistence(format!("corrupt cache file: {e}")))?;

    Ok(entries)
}
