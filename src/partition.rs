//! Day-boundary planning over raw logger files.
//!
//! A raw file carries a fixed 4-line header; every data row starts with a
//! 10-character timestamp field. The planner groups data rows by calendar
//! day and reports rows whose timestamp does not parse, which are
//! excluded from every range and later dropped from the source.

use std::collections::BTreeSet;
use std::ops::Range;

use log::debug;
use time::macros::format_description;
use time::{Date, OffsetDateTime};

/// Number of header lines at the top of every raw and daily file.
pub const HEADER_LINES: usize = 4;

/// A contiguous range of post-discard data rows sharing one calendar day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayPartition {
    pub day: Date,
    /// Row range relative to the discard-filtered data rows. The final
    /// partition extends to the end of the filtered rows.
    pub rows: Range<usize>,
}

/// Output of [`plan_partitions`]: day ranges in file order plus the line
/// indices (0-based within the whole file, header included) of rows whose
/// timestamp failed to parse.
#[derive(Debug, Clone, Default)]
pub struct PartitionPlan {
    pub partitions: Vec<DayPartition>,
    pub discarded: Vec<usize>,
}

impl PartitionPlan {
    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }
}

/// Parse the calendar day out of a row's timestamp field.
///
/// Accepts `YYYY-MM-DD` prefixes (with or without a trailing time-of-day)
/// and 10-digit unix-seconds strings. Surrounding quotes are ignored.
pub fn parse_day(field: &str) -> Option<Date> {
    let field = field.trim().trim_matches('"');
    if field.len() < 10 || !field.is_char_boundary(10) {
        return None;
    }
    let head = &field[..10];
    if head.bytes().all(|b| b.is_ascii_digit()) {
        let secs: i64 = head.parse().ok()?;
        return OffsetDateTime::from_unix_timestamp(secs)
            .ok()
            .map(|dt| dt.date());
    }
    let format = format_description!("[year]-[month]-[day]");
    Date::parse(head, &format).ok()
}

/// Compute the per-day row-range plan for a raw file's lines.
///
/// Rows with unparseable timestamps join the discard set and are removed
/// from the row-index space before day boundaries are computed: each
/// day's first-occurrence index is decremented once per discarded row
/// before it, so the ranges address the discard-filtered rows directly.
pub fn plan_partitions<S: AsRef<str>>(lines: &[S]) -> PartitionPlan {
    let data: &[S] = if lines.len() > HEADER_LINES {
        &lines[HEADER_LINES..]
    } else {
        &[]
    };

    let mut discarded: Vec<usize> = Vec::new();
    let mut firsts: Vec<(Date, usize)> = Vec::new();
    let mut seen: BTreeSet<Date> = BTreeSet::new();

    for (row, line) in data.iter().enumerate() {
        let field = line.as_ref().split(',').next().unwrap_or("");
        match parse_day(field) {
            Some(day) => {
                if seen.insert(day) {
                    firsts.push((day, row));
                }
            }
            None => {
                debug!(
                    "discarding line {} with unparseable timestamp {:?}",
                    row + HEADER_LINES,
                    field
                );
                discarded.push(row);
            }
        }
    }

    // compact first-occurrence indices over the removed rows
    let starts: Vec<(Date, usize)> = firsts
        .into_iter()
        .map(|(day, idx)| {
            let removed = discarded.iter().filter(|&&d| d < idx).count();
            (day, idx - removed)
        })
        .collect();

    let kept = data.len() - discarded.len();
    let mut partitions = Vec::with_capacity(starts.len());
    for (i, &(day, start)) in starts.iter().enumerate() {
        let end = starts.get(i + 1).map(|&(_, next)| next).unwrap_or(kept);
        partitions.push(DayPartition {
            day,
            rows: start..end,
        });
    }

    PartitionPlan {
        partitions,
        discarded: discarded.into_iter().map(|d| d + HEADER_LINES).collect(),
    }
}
