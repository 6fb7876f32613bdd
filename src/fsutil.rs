//! Filesystem helpers shared by the split and archive writers.

use std::fs::File;
use std::path::{Path, PathBuf};

use crate::Result;

/// Sibling temp path used for write-then-rename replacement.
pub(crate) fn tmp_path_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string());
    path.with_file_name(format!("{name}.tmp"))
}

pub(crate) fn fsync_dir(path: &Path) -> Result<()> {
    let dir = File::open(path)?;
    dir.sync_all()?;
    Ok(())
}
