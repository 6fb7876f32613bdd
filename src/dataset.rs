//! In-memory time-indexed datasets.
//!
//! A [`Dataset`] holds a time coordinate (nanoseconds since the unix
//! epoch) and named variables. A variable either carries one value per
//! timestamp (time-varying) or a single scalar treated as authoritative
//! metadata during merges.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, OffsetDateTime, PrimitiveDateTime};

use crate::partition::HEADER_LINES;
use crate::{Error, Result};

pub type AttrMap = BTreeMap<String, Value>;

/// A named dataset variable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Variable {
    /// Time-varying values aligned with the dataset's time coordinate.
    /// Missing samples are NaN (stored as null in the archive file).
    Series {
        #[serde(with = "float_values")]
        values: Vec<f64>,
        #[serde(default)]
        attrs: AttrMap,
        #[serde(default)]
        encoding: AttrMap,
    },
    /// Time-invariant metadata, overwritten wholesale on merge.
    Scalar {
        value: Value,
        #[serde(default)]
        attrs: AttrMap,
    },
}

impl Variable {
    pub fn is_series(&self) -> bool {
        matches!(self, Variable::Series { .. })
    }

    pub fn attrs(&self) -> &AttrMap {
        match self {
            Variable::Series { attrs, .. } => attrs,
            Variable::Scalar { attrs, .. } => attrs,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Dataset {
    /// Time coordinate, nanoseconds since the unix epoch.
    pub time: Vec<i64>,
    #[serde(default)]
    pub variables: BTreeMap<String, Variable>,
    #[serde(default)]
    pub attrs: AttrMap,
    #[serde(default)]
    pub time_encoding: AttrMap,
}

impl Dataset {
    pub fn new(time: Vec<i64>) -> Self {
        Self {
            time,
            ..Self::default()
        }
    }

    pub fn len(&self) -> usize {
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    /// Add a time-varying variable. The value count must match the time
    /// coordinate.
    pub fn insert_series(&mut self, name: impl Into<String>, values: Vec<f64>) -> Result<()> {
        let name = name.into();
        if values.len() != self.time.len() {
            return Err(Error::ShapeMismatch {
                variable: name,
                expected: self.time.len(),
                actual: values.len(),
            });
        }
        self.variables.insert(
            name,
            Variable::Series {
                values,
                attrs: AttrMap::new(),
                encoding: AttrMap::new(),
            },
        );
        Ok(())
    }

    /// Add a time-invariant metadata variable.
    pub fn insert_scalar(&mut self, name: impl Into<String>, value: Value) {
        self.variables.insert(
            name.into(),
            Variable::Scalar {
                value,
                attrs: AttrMap::new(),
            },
        );
    }

    pub fn series(&self, name: &str) -> Option<&[f64]> {
        match self.variables.get(name) {
            Some(Variable::Series { values, .. }) => Some(values),
            _ => None,
        }
    }

    /// Sort the time coordinate ascending, reordering every series.
    ///
    /// Duplicate timestamps collapse to one sample when their series
    /// values agree (NaN is compatible with anything); disagreeing
    /// duplicates fail with `InvalidTimeAxis`.
    pub fn sort_by_time(&mut self) -> Result<()> {
        let n = self.time.len();
        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by_key(|&i| self.time[i]);

        let mut new_time: Vec<i64> = Vec::with_capacity(n);
        let mut groups: Vec<Vec<usize>> = Vec::new();
        for &i in &order {
            let ts = self.time[i];
            if new_time.last() == Some(&ts) {
                if let Some(group) = groups.last_mut() {
                    group.push(i);
                    continue;
                }
            }
            new_time.push(ts);
            groups.push(vec![i]);
        }

        for (name, var) in self.variables.iter_mut() {
            if let Variable::Series { values, .. } = var {
                let mut merged = Vec::with_capacity(groups.len());
                for (slot, group) in groups.iter().enumerate() {
                    let mut out = f64::NAN;
                    for &i in group {
                        let v = values[i];
                        if v.is_nan() {
                            continue;
                        }
                        if out.is_nan() {
                            out = v;
                        } else if out != v {
                            return Err(Error::InvalidTimeAxis(format!(
                                "duplicate timestamp {} with conflicting values for '{}'",
                                format_timestamp(new_time[slot]),
                                name
                            )));
                        }
                    }
                    merged.push(out);
                }
                *values = merged;
            }
        }

        self.time = new_time;
        Ok(())
    }

    /// Project this dataset onto a new time axis. Timestamps absent from
    /// this dataset become NaN; scalars are carried over unchanged.
    pub fn reindex(&self, axis: &[i64]) -> Dataset {
        let index: HashMap<i64, usize> = self
            .time
            .iter()
            .enumerate()
            .map(|(i, &t)| (t, i))
            .collect();

        let mut variables = BTreeMap::new();
        for (name, var) in &self.variables {
            let projected = match var {
                Variable::Series {
                    values,
                    attrs,
                    encoding,
                } => Variable::Series {
                    values: axis
                        .iter()
                        .map(|t| index.get(t).map(|&i| values[i]).unwrap_or(f64::NAN))
                        .collect(),
                    attrs: attrs.clone(),
                    encoding: encoding.clone(),
                },
                scalar => scalar.clone(),
            };
            variables.insert(name.clone(), projected);
        }

        Dataset {
            time: axis.to_vec(),
            variables,
            attrs: self.attrs.clone(),
            time_encoding: self.time_encoding.clone(),
        }
    }
}

/// Parse a row timestamp field into epoch nanoseconds.
///
/// Accepts `YYYY-MM-DD HH:MM:SS`, bare `YYYY-MM-DD` (midnight) and
/// 10-digit unix-seconds strings, with optional surrounding quotes.
pub fn parse_timestamp(field: &str) -> Option<i64> {
    let field = field.trim().trim_matches('"');
    let datetime = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    if let Ok(dt) = PrimitiveDateTime::parse(field, &datetime) {
        return Some(dt.assume_utc().unix_timestamp_nanos() as i64);
    }
    if field.len() >= 10 && field.is_char_boundary(10) {
        let head = &field[..10];
        if head.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(secs) = head.parse::<i64>() {
                return Some(secs.checked_mul(1_000_000_000)?);
            }
        }
        let date = format_description!("[year]-[month]-[day]");
        if let Ok(day) = Date::parse(head, &date) {
            return Some(day.midnight().assume_utc().unix_timestamp_nanos() as i64);
        }
    }
    None
}

/// RFC 3339 rendering of an epoch-nanosecond timestamp, for attributes
/// and error messages.
pub fn format_timestamp(ns: i64) -> String {
    OffsetDateTime::from_unix_timestamp_nanos(ns as i128)
        .ok()
        .and_then(|dt| dt.format(&Rfc3339).ok())
        .unwrap_or_else(|| ns.to_string())
}

/// `YYYY-MM-DD` rendering of an epoch-nanosecond timestamp.
pub(crate) fn format_day(ns: i64) -> String {
    let format = format_description!("[year]-[month]-[day]");
    OffsetDateTime::from_unix_timestamp_nanos(ns as i128)
        .ok()
        .and_then(|dt| dt.date().format(&format).ok())
        .unwrap_or_else(|| ns.to_string())
}

/// Parse a raw or daily table file into a dataset.
///
/// Line 2 of the 4-line header names the columns; the first column is the
/// timestamp, the rest become f64 series (unparseable cells turn into
/// NaN). Rows with unparseable timestamps are skipped, and duplicate rows
/// re-appended across crash recoveries collapse during the final sort.
pub fn read_raw_table(path: &Path) -> Result<Dataset> {
    let content = fs::read_to_string(path)?;
    let lines: Vec<&str> = content.lines().collect();
    if lines.len() < HEADER_LINES {
        return Err(Error::MalformedRaw(format!(
            "{}: expected a {HEADER_LINES}-line header",
            path.display()
        )));
    }

    let mut header_reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .from_reader(lines[1].as_bytes());
    let mut columns: Vec<String> = Vec::new();
    if let Some(record) = header_reader.records().next() {
        columns = record?.iter().map(|s| s.to_string()).collect();
    }
    if columns.len() < 2 {
        return Err(Error::MalformedRaw(format!(
            "{}: header names fewer than two columns",
            path.display()
        )));
    }

    let data = lines[HEADER_LINES..].join("\n");
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(data.as_bytes());

    let mut time: Vec<i64> = Vec::new();
    let mut series: Vec<Vec<f64>> = vec![Vec::new(); columns.len() - 1];
    for record in reader.records() {
        let record = record?;
        let Some(first) = record.get(0) else {
            continue;
        };
        let Some(ts) = parse_timestamp(first) else {
            debug!("{}: skipping row with timestamp {:?}", path.display(), first);
            continue;
        };
        time.push(ts);
        for (i, column) in series.iter_mut().enumerate() {
            let value = record
                .get(i + 1)
                .and_then(|s| s.trim().trim_matches('"').parse::<f64>().ok())
                .unwrap_or(f64::NAN);
            column.push(value);
        }
    }

    let mut ds = Dataset::new(time);
    for (i, values) in series.into_iter().enumerate() {
        ds.insert_series(columns[i + 1].clone(), values)?;
    }
    ds.sort_by_time()?;
    Ok(ds)
}

/// Serde adapter storing non-finite values as null so archive files stay
/// valid JSON.
mod float_values {
    use serde::ser::SerializeSeq;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(values: &[f64], serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(values.len()))?;
        for v in values {
            if v.is_finite() {
                seq.serialize_element(v)?;
            } else {
                seq.serialize_element(&Option::<f64>::None)?;
            }
        }
        seq.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<f64>, D::Error> {
        let raw = Vec::<Option<f64>>::deserialize(deserializer)?;
        Ok(raw.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect())
    }
}
