//! Calibration lookup tables.
//!
//! A calibration file is a JSON object whose date keys (anything starting
//! with `'2'`) each map instrument ids to a five-element row of
//! `[factor, error, temp_a, temp_b, temp_c]`, plus a `units` array giving
//! the unit string for each column. Missing row elements default to NaN
//! for the error and to the identity coefficients `0, 0, 1` for the
//! temperature polynomial.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde_json::Value;

use crate::config::Config;
use crate::dataset::{format_day, parse_timestamp, AttrMap};
use crate::{Error, Result};

/// Calibration history of one instrument, sorted by time.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationSeries {
    /// Calibration dates as epoch nanoseconds, ascending.
    pub time: Vec<i64>,
    pub factor: Vec<f64>,
    pub error: Vec<f64>,
    pub temp_coeff_a: Vec<f64>,
    pub temp_coeff_b: Vec<f64>,
    pub temp_coeff_c: Vec<f64>,
    /// Unit strings for factor, error and the three coefficients.
    pub units: Vec<String>,
}

/// One calibration record picked out of a [`CalibrationSeries`].
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationEntry {
    pub time: i64,
    pub factor: f64,
    pub error: f64,
    pub temp_coeff_a: f64,
    pub temp_coeff_b: f64,
    pub temp_coeff_c: f64,
}

impl CalibrationSeries {
    pub fn len(&self) -> usize {
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    /// The record whose calibration date is closest to `at`.
    pub fn nearest(&self, at: i64) -> Option<CalibrationEntry> {
        let (idx, _) = self
            .time
            .iter()
            .enumerate()
            .min_by_key(|(_, &t)| (t - at).unsigned_abs())?;
        Some(CalibrationEntry {
            time: self.time[idx],
            factor: self.factor[idx],
            error: self.error[idx],
            temp_coeff_a: self.temp_coeff_a[idx],
            temp_coeff_b: self.temp_coeff_b[idx],
            temp_coeff_c: self.temp_coeff_c[idx],
        })
    }
}

fn row_element(row: &[Value], idx: usize, default: f64) -> f64 {
    row.get(idx).and_then(Value::as_f64).unwrap_or(default)
}

/// Read the calibration history for one instrument from `path`. Returns
/// `None` when the instrument has no record at any date.
pub fn parse_calibration(path: &Path, instrument_id: &str) -> Result<Option<CalibrationSeries>> {
    let file = File::open(path)?;
    let table: BTreeMap<String, Value> = serde_json::from_reader(BufReader::new(file))?;

    let units: Vec<String> = match table.get("units") {
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| v.as_str().unwrap_or_default().to_string())
            .collect(),
        _ => Vec::new(),
    };

    // entries keyed by date; a BTreeMap iterates them in date order, and
    // the timestamps parse to the same order
    let mut series = CalibrationSeries {
        time: Vec::new(),
        factor: Vec::new(),
        error: Vec::new(),
        temp_coeff_a: Vec::new(),
        temp_coeff_b: Vec::new(),
        temp_coeff_c: Vec::new(),
        units,
    };
    for (key, entries) in &table {
        if !key.starts_with('2') {
            continue;
        }
        let Some(row) = entries.get(instrument_id).and_then(Value::as_array) else {
            continue;
        };
        let ts = parse_timestamp(key).ok_or_else(|| {
            Error::BadMetadata(format!("calibration date {key:?} is not a date"))
        })?;
        series.time.push(ts);
        series.factor.push(row_element(row, 0, f64::NAN));
        series.error.push(row_element(row, 1, f64::NAN));
        series.temp_coeff_a.push(row_element(row, 2, 0.0));
        series.temp_coeff_b.push(row_element(row, 3, 0.0));
        series.temp_coeff_c.push(row_element(row, 4, 1.0));
    }

    if series.is_empty() {
        return Ok(None);
    }
    Ok(Some(series))
}

fn json_floats(values: &[f64]) -> Value {
    Value::Array(values.iter().map(|&v| Value::from(v)).collect())
}

/// Resolve instrument metadata by serial number or instrument id.
///
/// The instrument map (`file_instrument_map` in the config) keys device
/// descriptions by instrument id; when only a serial is given, the map is
/// scanned for a matching `"serial"` field. The calibration history is
/// attached when the instrument has one; with `at` set it collapses to
/// the record nearest that time.
pub fn meta_lookup(
    config: &Config,
    serial: Option<&str>,
    instrument_id: Option<&str>,
    at: Option<i64>,
) -> Result<AttrMap> {
    if serial.is_none() && instrument_id.is_none() {
        return Err(Error::BadMetadata(
            "meta lookup needs a serial or an instrument id".into(),
        ));
    }
    let map_path = config
        .file_instrument_map
        .as_deref()
        .ok_or(Error::MissingConfig("file_instrument_map"))?;
    let file = File::open(map_path)?;
    let mapping: BTreeMap<String, AttrMap> = serde_json::from_reader(BufReader::new(file))?;

    let instrument_id = match instrument_id {
        Some(id) => id.to_string(),
        None => {
            let serial = serial.unwrap_or_default();
            mapping
                .iter()
                .find(|(_, entry)| {
                    entry.get("serial").and_then(Value::as_str) == Some(serial)
                })
                .map(|(id, _)| id.clone())
                .ok_or_else(|| {
                    Error::BadMetadata(format!("no instrument with serial {serial:?}"))
                })?
        }
    };

    let mut out = AttrMap::new();
    out.insert("device".into(), Value::Null);
    out.insert("serial".into(), serial.map_or(Value::Null, Value::from));
    out.insert("instrument_id".into(), Value::from(instrument_id.clone()));
    out.insert("calibration_factor".into(), Value::Null);
    out.insert("calibration_error".into(), Value::Null);
    out.insert("calibration_date".into(), Value::Null);
    out.insert("calibration_factor_units".into(), Value::Null);
    out.insert("calibration_error_units".into(), Value::Null);

    let entry = mapping.get(&instrument_id).ok_or_else(|| {
        Error::BadMetadata(format!("instrument {instrument_id:?} not in the map"))
    })?;
    for (key, value) in entry {
        out.insert(key.clone(), value.clone());
    }

    let cal_path = config
        .file_calibration
        .as_deref()
        .ok_or(Error::MissingConfig("file_calibration"))?;
    if let Some(series) = parse_calibration(cal_path, &instrument_id)? {
        let (dates, factors, errors) = match at.and_then(|t| series.nearest(t)) {
            Some(picked) => (vec![picked.time], vec![picked.factor], vec![picked.error]),
            None => (series.time.clone(), series.factor.clone(), series.error.clone()),
        };
        let dates: Vec<Value> = dates.iter().map(|&t| Value::from(format_day(t))).collect();
        out.insert("calibration_factor".into(), json_floats(&factors));
        out.insert("calibration_error".into(), json_floats(&errors));
        out.insert("calibration_date".into(), Value::Array(dates));
        if let Some(unit) = series.units.first() {
            out.insert("calibration_factor_units".into(), Value::from(unit.clone()));
        }
        if let Some(unit) = series.units.get(1) {
            out.insert("calibration_error_units".into(), Value::from(unit.clone()));
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const DAY: i64 = 86_400_000_000_000;

    const CALIBRATION: &str = r#"{
        "units": ["uV/Wm-2", "%", "1/K2", "1/K", "1"],
        "2024-01-10": {"A001": [7.12, 0.5, null, null, null]},
        "2024-06-01": {"A001": [7.08, null, 0.1, 0.2, 0.9], "B002": [12.5, 1.0, null, null, null]}
    }"#;

    fn write_file(dir: &Path, name: &str, content: &str) -> std::path::PathBuf {
        let path = dir.join(name);
        let mut file = File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn parses_history_in_date_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "calibration.json", CALIBRATION);
        let series = parse_calibration(&path, "A001").unwrap().unwrap();
        assert_eq!(series.len(), 2);
        assert!(series.time[0] < series.time[1]);
        assert_eq!(series.factor, vec![7.12, 7.08]);
        assert_eq!(series.error[0], 0.5);
        assert!(series.error[1].is_nan());
        assert_eq!(series.temp_coeff_a, vec![0.0, 0.1]);
        assert_eq!(series.temp_coeff_c, vec![1.0, 0.9]);
        assert_eq!(series.units[0], "uV/Wm-2");
    }

    #[test]
    fn unknown_instrument_has_no_history() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "calibration.json", CALIBRATION);
        assert!(parse_calibration(&path, "Z999").unwrap().is_none());
    }

    #[test]
    fn nearest_picks_closest_date() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "calibration.json", CALIBRATION);
        let series = parse_calibration(&path, "A001").unwrap().unwrap();
        let early = series.nearest(series.time[0] + DAY).unwrap();
        assert_eq!(early.factor, 7.12);
        let late = series.nearest(series.time[1] + 300 * DAY).unwrap();
        assert_eq!(late.factor, 7.08);
    }

    #[test]
    fn lookup_by_serial_resolves_instrument() {
        let dir = tempfile::tempdir().unwrap();
        let cal = write_file(dir.path(), "calibration.json", CALIBRATION);
        let map = write_file(
            dir.path(),
            "instruments.json",
            r#"{"A001": {"serial": "SN-17", "device": "pyranometer"}}"#,
        );
        let config = Config {
            file_calibration: Some(cal),
            file_instrument_map: Some(map),
            ..Config::default()
        };
        let meta = meta_lookup(&config, Some("SN-17"), None, None).unwrap();
        assert_eq!(*meta.get("instrument_id").unwrap(), "A001");
        assert_eq!(*meta.get("device").unwrap(), "pyranometer");
        assert_eq!(
            *meta.get("calibration_date").unwrap(),
            serde_json::json!(["2024-01-10", "2024-06-01"])
        );
        assert_eq!(*meta.get("calibration_factor_units").unwrap(), "uV/Wm-2");
    }

    #[test]
    fn lookup_at_a_time_collapses_to_one_record() {
        let dir = tempfile::tempdir().unwrap();
        let cal = write_file(dir.path(), "calibration.json", CALIBRATION);
        let map = write_file(
            dir.path(),
            "instruments.json",
            r#"{"A001": {"serial": "SN-17", "device": "pyranometer"}}"#,
        );
        let config = Config {
            file_calibration: Some(cal),
            file_instrument_map: Some(map),
            ..Config::default()
        };
        let at = parse_timestamp("2024-05-20").unwrap();
        let meta = meta_lookup(&config, None, Some("A001"), Some(at)).unwrap();
        assert_eq!(
            *meta.get("calibration_date").unwrap(),
            serde_json::json!(["2024-06-01"])
        );
        assert_eq!(
            *meta.get("calibration_factor").unwrap(),
            serde_json::json!([7.08])
        );
    }
}
