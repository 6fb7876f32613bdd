//! Splitting raw logger files into daily per-table files.
//!
//! One pass per raw file: plan day partitions, append each day's rows to
//! its daily file (creating it with the 4-line header on first contact),
//! then truncate the source back to its header plus anything appended
//! past the read snapshot. Truncation replaces the file atomically, so a
//! crash mid-pass leaves either the full source or the cleanly truncated
//! one; daily writes that already happened are simply repeated on the
//! next run (at-least-once, see `read_raw_table` for collapse on read).

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use log::{debug, info};

use crate::config::{render_template, Config};
use crate::fsutil::{fsync_dir, tmp_path_for};
use crate::partition::{plan_partitions, HEADER_LINES};
use crate::{Error, Result};

/// Per-table summary of one split pass.
#[derive(Debug, Clone)]
pub struct SplitOutcome {
    pub table: String,
    pub days: usize,
    pub rows_written: usize,
    pub rows_discarded: usize,
}

/// Split every configured table's raw file under `inpath` into daily
/// files under `outpath`. `tables` restricts the set; `None` means the
/// config's tables (or its table-list file).
pub fn split_raw_to_daily(
    config: &Config,
    inpath: &Path,
    outpath: &Path,
    tables: Option<&[String]>,
) -> Result<Vec<SplitOutcome>> {
    let tables = match tables {
        Some(tables) => tables.to_vec(),
        None => config.table_names()?,
    };
    let mut outcomes = Vec::with_capacity(tables.len());
    for table in &tables {
        outcomes.push(split_table(config, inpath, outpath, table)?);
    }
    Ok(outcomes)
}

/// Split one table's raw file. A file with no valid day partitions is a
/// no-op: nothing is written and the source is left untouched.
pub fn split_table(
    config: &Config,
    inpath: &Path,
    outpath: &Path,
    table: &str,
) -> Result<SplitOutcome> {
    let vars = config.substitutions(table, None);
    let infname = inpath.join(render_template(&config.fname_raw, &vars));

    let content = fs::read_to_string(&infname)?;
    let lines: Vec<&str> = content.lines().collect();
    if lines.len() < HEADER_LINES {
        return Err(Error::MalformedRaw(format!(
            "{}: expected a {HEADER_LINES}-line header",
            infname.display()
        )));
    }
    // lines past this snapshot may be appended by the logger while we
    // work; truncation must preserve them
    let snapshot = lines.len();

    let plan = plan_partitions(&lines);
    if plan.is_empty() {
        info!("{}: no day partitions, nothing to do", infname.display());
        return Ok(SplitOutcome {
            table: table.to_string(),
            days: 0,
            rows_written: 0,
            rows_discarded: plan.discarded.len(),
        });
    }

    let header = &lines[..HEADER_LINES];
    let discard: HashSet<usize> = plan.discarded.iter().copied().collect();
    let filtered: Vec<&str> = lines[HEADER_LINES..]
        .iter()
        .enumerate()
        .filter(|(i, _)| !discard.contains(&(i + HEADER_LINES)))
        .map(|(_, line)| *line)
        .collect();

    info!(
        "{}: writing {} data lines across {} day(s), {} discarded",
        infname.display(),
        filtered.len(),
        plan.partitions.len(),
        plan.discarded.len()
    );

    let mut rows_written = 0;
    for part in &plan.partitions {
        let day_vars = config.substitutions(table, Some(part.day));
        let outfname = outpath
            .join(render_template(&config.path_sfx, &day_vars))
            .join(render_template(&config.fname_out, &day_vars));
        let rows = &filtered[part.rows.clone()];
        append_day_file(&outfname, header, rows)?;
        debug!("{}: appended {} lines", outfname.display(), rows.len());
        rows_written += rows.len();
    }

    truncate_source(&infname, snapshot)?;
    debug!(
        "{}: removed {} processed lines",
        infname.display(),
        snapshot - HEADER_LINES
    );

    Ok(SplitOutcome {
        table: table.to_string(),
        days: plan.partitions.len(),
        rows_written,
        rows_discarded: plan.discarded.len(),
    })
}

/// Append one day's rows to its daily file, writing the header first if
/// the file does not exist yet. Safe to call repeatedly for the same day
/// across raw-file batches: existing content is never rewritten.
fn append_day_file(path: &Path, header: &[&str], rows: &[&str]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    if !path.exists() {
        let mut file = BufWriter::new(File::create(path)?);
        for line in header {
            writeln!(file, "{line}")?;
        }
        file.flush()?;
    }
    let mut file = BufWriter::new(OpenOptions::new().append(true).open(path)?);
    for line in rows {
        writeln!(file, "{line}")?;
    }
    file.flush()?;
    Ok(())
}

/// Rewrite the raw source as its header plus any lines past the read
/// snapshot, via a temp file and atomic rename.
pub fn truncate_source(path: &Path, snapshot: usize) -> Result<()> {
    let content = fs::read_to_string(path)?;
    let lines: Vec<&str> = content.lines().collect();

    let tmp = tmp_path_for(path);
    {
        let mut file = BufWriter::new(File::create(&tmp)?);
        for line in &lines[..HEADER_LINES.min(lines.len())] {
            writeln!(file, "{line}")?;
        }
        if lines.len() > snapshot {
            for line in &lines[snapshot..] {
                writeln!(file, "{line}")?;
            }
        }
        file.flush()?;
        file.get_ref().sync_all()?;
    }
    fs::rename(&tmp, path)?;
    if let Some(parent) = path.parent() {
        fsync_dir(parent)?;
    }
    Ok(())
}
