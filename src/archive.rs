//! On-disk archive persistence.
//!
//! One self-describing JSON file per physical quantity/location. Updates
//! never edit in place: the existing file is read, merged in memory with
//! the incoming dataset, and the combined file replaces it through a
//! temp-file rename.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use log::debug;

use crate::cfmeta::{apply_encoding, update_coverage, CfMeta};
use crate::dataset::{Dataset, Variable};
use crate::fsutil::{fsync_dir, tmp_path_for};
use crate::merge;
use crate::{Error, Result};

/// Read an archive file, rejecting one whose series lengths disagree
/// with its time axis.
pub fn read_archive(path: &Path) -> Result<Dataset> {
    let file = File::open(path)?;
    let ds: Dataset = serde_json::from_reader(BufReader::new(file))?;
    for (name, var) in &ds.variables {
        if let Variable::Series { values, .. } = var {
            if values.len() != ds.time.len() {
                return Err(Error::ShapeMismatch {
                    variable: name.clone(),
                    expected: ds.time.len(),
                    actual: values.len(),
                });
            }
        }
    }
    Ok(ds)
}

/// Persist a dataset, merging with any archive already at `path`.
///
/// After a non-trivial merge the encoding annotation is reapplied from
/// `cfmeta` (the merge may have changed the time range and resolution);
/// coverage attributes are refreshed on every write.
pub fn write_archive(mut ds: Dataset, path: &Path, cfmeta: Option<&CfMeta>) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    if path.exists() {
        let existing = read_archive(path)?;
        ds = merge::merge(&existing, &ds)?;
        if let Some(meta) = cfmeta {
            if ds.attrs.contains_key("merged") {
                apply_encoding(&mut ds, meta, None);
            }
        }
    }

    update_coverage(&mut ds);

    let tmp = tmp_path_for(path);
    {
        let file = File::create(&tmp)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, &ds)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
    }
    fs::rename(&tmp, path)?;
    if let Some(parent) = path.parent() {
        fsync_dir(parent)?;
    }
    debug!("wrote archive {}", path.display());
    Ok(())
}
