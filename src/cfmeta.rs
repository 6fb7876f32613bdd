//! Climate-and-forecast metadata assembly.
//!
//! Parses the cfmeta JSON file into global attributes, per-variable
//! attributes and per-variable encoding, and applies encoding and
//! coverage attributes to datasets before they are persisted.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde_json::Value;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::config::{render_template, Config};
use crate::dataset::{format_day, format_timestamp, AttrMap, Dataset, Variable};
use crate::{Error, Result};

/// Attribute keys that belong in a variable's storage encoding rather
/// than its plain attributes.
const ENCODING_KEYS: &[&str] = &[
    "scale_factor",
    "add_offset",
    "_FillValue",
    "dtype",
    "zlib",
    "gzip",
    "complevel",
    "calendar",
];

#[derive(Debug, Clone, Default)]
pub struct CfMeta {
    pub global_attrs: AttrMap,
    pub var_attrs: BTreeMap<String, AttrMap>,
    pub var_encoding: BTreeMap<String, AttrMap>,
}

/// Load the cfmeta file named by the config.
pub fn load_cfmeta(config: &Config) -> Result<CfMeta> {
    let path = config
        .file_cfmeta
        .as_ref()
        .ok_or(Error::MissingConfig("file_cfmeta"))?;
    parse_cfmeta(path, config)
}

/// Parse a cfmeta JSON file. Global attribute strings are rendered
/// against the config's substitution map; per-variable attributes are
/// split into plain attributes and encoding, with gzip compression
/// defaults and the declared storage type added to the encoding.
pub fn parse_cfmeta(path: &Path, config: &Config) -> Result<CfMeta> {
    let value: Value = serde_json::from_reader(BufReader::new(File::open(path)?))?;
    let root = value.as_object().ok_or_else(|| {
        Error::BadMetadata(format!("{}: expected a JSON object", path.display()))
    })?;

    // no table in scope here; a {table} placeholder stays intact
    let mut subst = config.substitutions("", None);
    subst.remove("table");
    let mut global_attrs = AttrMap::new();
    if let Some(attrs) = root.get("attributes").and_then(Value::as_object) {
        for (key, value) in attrs {
            let rendered = match value {
                Value::String(text) => Value::String(render_template(text, &subst)),
                other => other.clone(),
            };
            global_attrs.insert(key.clone(), rendered);
        }
    }
    for key in ["contributor_name", "contributor_role"] {
        if let Some(value) = config.extra.get(key) {
            global_attrs.insert(key.to_string(), Value::String(value.clone()));
        }
    }

    let mut var_attrs = BTreeMap::new();
    let mut var_encoding = BTreeMap::new();
    if let Some(variables) = root.get("variables").and_then(Value::as_object) {
        for (name, entry) in variables {
            let entry = entry.as_object().ok_or_else(|| {
                Error::BadMetadata(format!(
                    "{}: variable '{name}' is not a JSON object",
                    path.display()
                ))
            })?;

            let mut encoding = AttrMap::new();
            if let Some(ty) = entry.get("type") {
                encoding.insert("dtype".to_string(), ty.clone());
            }
            encoding.insert("gzip".to_string(), Value::Bool(true));
            encoding.insert("complevel".to_string(), Value::from(6));

            let mut plain = AttrMap::new();
            if let Some(attrs) = entry.get("attributes").and_then(Value::as_object) {
                for (key, value) in attrs {
                    if ENCODING_KEYS.contains(&key.as_str()) {
                        encoding.insert(key.clone(), value.clone());
                    } else {
                        plain.insert(key.clone(), value.clone());
                    }
                }
            }

            var_attrs.insert(name.clone(), plain);
            var_encoding.insert(name.clone(), encoding);
        }
    }

    Ok(CfMeta {
        global_attrs,
        var_attrs,
        var_encoding,
    })
}

/// Deep merge of per-variable encoding maps: override keys win
/// field-by-field, never by whole-record replacement.
pub fn merge_encoding(
    defaults: &BTreeMap<String, AttrMap>,
    overrides: &BTreeMap<String, AttrMap>,
) -> BTreeMap<String, AttrMap> {
    let mut merged = defaults.clone();
    for (name, encoding) in overrides {
        let slot = merged.entry(name.clone()).or_default();
        for (key, value) in encoding {
            slot.insert(key.clone(), value.clone());
        }
    }
    merged
}

/// Apply per-variable encoding to a dataset.
///
/// Encoding keys match dataset variables by prefix so disambiguated
/// names (`temp_1`) inherit their base variable's encoding. A
/// `valid_range` entry is mirrored into the variable's attributes. The
/// time coordinate is stored as float64 seconds since midnight of the
/// first sample's day.
pub fn apply_encoding(
    ds: &mut Dataset,
    cfmeta: &CfMeta,
    overrides: Option<&BTreeMap<String, AttrMap>>,
) {
    let encoding = match overrides {
        Some(over) => merge_encoding(&cfmeta.var_encoding, over),
        None => cfmeta.var_encoding.clone(),
    };

    for (key, enc) in &encoding {
        let matching: Vec<String> = ds
            .variables
            .keys()
            .filter(|name| name.starts_with(key.as_str()))
            .cloned()
            .collect();
        for name in matching {
            if let Some(Variable::Series {
                attrs,
                encoding: slot,
                ..
            }) = ds.variables.get_mut(&name)
            {
                *slot = enc.clone();
                if let Some(range) = enc.get("valid_range") {
                    attrs.insert("valid_range".to_string(), range.clone());
                }
            }
        }
    }

    if let Some(&first) = ds.time.first() {
        ds.time_encoding
            .insert("dtype".to_string(), Value::String("float64".to_string()));
        ds.time_encoding.insert(
            "units".to_string(),
            Value::String(format!("seconds since {}T00:00Z", format_day(first))),
        );
    }
}

/// Refresh the global attributes describing time and geospatial
/// coverage.
pub fn update_coverage(ds: &mut Dataset) {
    let (Some(&first), Some(&last)) = (ds.time.first(), ds.time.last()) else {
        return;
    };
    let duration = last - first;
    let resolution = if ds.len() > 1 {
        duration / (ds.len() as i64 - 1)
    } else {
        0
    };

    let now = OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default();
    ds.attrs
        .insert("date_created".to_string(), Value::String(now));
    ds.attrs.insert(
        "time_coverage_start".to_string(),
        Value::String(format_timestamp(first)),
    );
    ds.attrs.insert(
        "time_coverage_end".to_string(),
        Value::String(format_timestamp(last)),
    );
    ds.attrs.insert(
        "time_coverage_duration".to_string(),
        Value::String(iso_duration(duration)),
    );
    ds.attrs.insert(
        "time_coverage_resolution".to_string(),
        Value::String(iso_duration(resolution)),
    );

    let lat = variable_bounds(ds, "lat");
    let lon = variable_bounds(ds, "lon");
    if let (Some((lat_min, lat_max)), Some((lon_min, lon_max))) = (lat, lon) {
        ds.attrs
            .insert("geospatial_lat_min".to_string(), Value::from(lat_min));
        ds.attrs
            .insert("geospatial_lat_max".to_string(), Value::from(lat_max));
        ds.attrs.insert(
            "geospatial_lat_units".to_string(),
            Value::String("degN".to_string()),
        );
        ds.attrs
            .insert("geospatial_lon_min".to_string(), Value::from(lon_min));
        ds.attrs
            .insert("geospatial_lon_max".to_string(), Value::from(lon_max));
        ds.attrs.insert(
            "geospatial_lon_units".to_string(),
            Value::String("degE".to_string()),
        );
    }
}

fn variable_bounds(ds: &Dataset, name: &str) -> Option<(f64, f64)> {
    match ds.variables.get(name)? {
        Variable::Series { values, .. } => {
            let mut min = f64::INFINITY;
            let mut max = f64::NEG_INFINITY;
            for &v in values {
                if v.is_nan() {
                    continue;
                }
                min = min.min(v);
                max = max.max(v);
            }
            if min.is_finite() {
                Some((min, max))
            } else {
                None
            }
        }
        Variable::Scalar { value, .. } => value.as_f64().map(|v| (v, v)),
    }
}

/// ISO 8601 duration in the `P{d}DT{h}H{m}M{s}S` form.
pub fn iso_duration(ns: i64) -> String {
    let total_secs = ns / 1_000_000_000;
    let frac_ns = (ns % 1_000_000_000).unsigned_abs();
    let days = total_secs / 86_400;
    let hours = (total_secs % 86_400) / 3_600;
    let minutes = (total_secs % 3_600) / 60;
    let secs = total_secs % 60;
    if frac_ns == 0 {
        format!("P{days}DT{hours}H{minutes}M{secs}S")
    } else {
        let frac = format!("{frac_ns:09}");
        let frac = frac.trim_end_matches('0');
        format!("P{days}DT{hours}H{minutes}M{secs}.{frac}S")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const CFMETA: &str = r#"{
        "attributes": {
            "title": "Observations at {site}",
            "source": "{table} logger",
            "conventions": "CF-1.10",
            "processing_level": 1
        },
        "variables": {
            "temp": {
                "type": "int16",
                "attributes": {
                    "units": "degC",
                    "scale_factor": 0.01,
                    "_FillValue": -9999,
                    "valid_range": [-4000, 6000]
                }
            },
            "rh": {
                "type": "int16",
                "attributes": {"units": "%"}
            }
        }
    }"#;

    fn write_cfmeta(dir: &tempfile::TempDir) -> std::path::PathBuf {
        let path = dir.path().join("cfmeta.json");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(CFMETA.as_bytes()).unwrap();
        path
    }

    fn site_config() -> Config {
        let mut config = Config::default();
        config
            .extra
            .insert("site".to_string(), "lindenberg".to_string());
        config
    }

    #[test]
    fn global_attrs_render_config_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_cfmeta(&dir);
        let meta = parse_cfmeta(&path, &site_config()).unwrap();
        assert_eq!(
            meta.global_attrs.get("title").unwrap(),
            "Observations at lindenberg"
        );
        assert_eq!(meta.global_attrs.get("processing_level").unwrap(), 1);
        // table is unknown at parse time
        assert_eq!(meta.global_attrs.get("source").unwrap(), "{table} logger");
    }

    #[test]
    fn encoding_keys_are_split_from_attributes() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_cfmeta(&dir);
        let meta = parse_cfmeta(&path, &site_config()).unwrap();

        let attrs = meta.var_attrs.get("temp").unwrap();
        assert_eq!(attrs.get("units").unwrap(), "degC");
        assert!(!attrs.contains_key("scale_factor"));

        let enc = meta.var_encoding.get("temp").unwrap();
        assert_eq!(enc.get("scale_factor").unwrap(), 0.01);
        assert_eq!(enc.get("dtype").unwrap(), "int16");
        assert_eq!(enc.get("gzip").unwrap(), true);
        assert_eq!(enc.get("complevel").unwrap(), 6);
    }

    #[test]
    fn merge_encoding_is_field_by_field() {
        let mut defaults = BTreeMap::new();
        let mut temp = AttrMap::new();
        temp.insert("dtype".to_string(), "int16".into());
        temp.insert("scale_factor".to_string(), 0.01.into());
        defaults.insert("temp".to_string(), temp);

        let mut overrides = BTreeMap::new();
        let mut over = AttrMap::new();
        over.insert("scale_factor".to_string(), 0.1.into());
        overrides.insert("temp".to_string(), over);

        let merged = merge_encoding(&defaults, &overrides);
        let temp = merged.get("temp").unwrap();
        // overridden field wins, untouched field survives
        assert_eq!(temp.get("scale_factor").unwrap(), 0.1);
        assert_eq!(temp.get("dtype").unwrap(), "int16");
    }

    #[test]
    fn encoding_applies_to_renamed_variables() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_cfmeta(&dir);
        let meta = parse_cfmeta(&path, &site_config()).unwrap();

        let day_ns = 1_735_689_600_000_000_000; // 2025-01-01
        let mut ds = Dataset::new(vec![day_ns, day_ns + 60_000_000_000]);
        ds.insert_series("temp", vec![1.0, 2.0]).unwrap();
        ds.insert_series("temp_1", vec![3.0, 4.0]).unwrap();
        apply_encoding(&mut ds, &meta, None);

        for name in ["temp", "temp_1"] {
            match ds.variables.get(name).unwrap() {
                Variable::Series { attrs, encoding, .. } => {
                    assert_eq!(encoding.get("dtype").unwrap(), "int16");
                    assert!(attrs.contains_key("valid_range"));
                }
                _ => panic!("expected series"),
            }
        }
        assert_eq!(
            ds.time_encoding.get("units").unwrap(),
            "seconds since 2025-01-01T00:00Z"
        );
    }

    #[test]
    fn coverage_attributes_describe_the_axis() {
        let mut ds = Dataset::new(vec![0, 60_000_000_000, 120_000_000_000]);
        ds.insert_series("temp", vec![1.0, 2.0, 3.0]).unwrap();
        ds.insert_scalar("lat", 52.2.into());
        ds.insert_scalar("lon", 14.1.into());
        update_coverage(&mut ds);

        assert_eq!(
            ds.attrs.get("time_coverage_start").unwrap(),
            "1970-01-01T00:00:00Z"
        );
        assert_eq!(
            ds.attrs.get("time_coverage_duration").unwrap(),
            "P0DT0H2M0S"
        );
        assert_eq!(
            ds.attrs.get("time_coverage_resolution").unwrap(),
            "P0DT0H1M0S"
        );
        assert_eq!(ds.attrs.get("geospatial_lat_min").unwrap(), 52.2);
        assert_eq!(ds.attrs.get("geospatial_lon_units").unwrap(), "degE");
    }

    #[test]
    fn iso_durations() {
        assert_eq!(iso_duration(0), "P0DT0H0M0S");
        assert_eq!(iso_duration(90_061_000_000_000), "P1DT1H1M1S");
        assert_eq!(iso_duration(500_000_000), "P0DT0H0M0.5S");
    }
}
