//! Processing configuration and output path templates.
//!
//! A `Config` is passed explicitly into every entry point; there is no
//! process-wide configuration state. Loading a JSON file merges it
//! field-by-field over the built-in defaults.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use time::macros::format_description;
use time::Date;

use crate::{Error, Result};

/// Configuration for one logger station.
///
/// Extra string-valued keys in the config file are collected into
/// `extra` and participate in path-template substitution alongside the
/// named fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Logger name substituted for `{loggername}`.
    pub logger_name: String,

    /// Table names to process. Empty means "read the table-list file".
    pub tables: Vec<String>,

    /// Raw input filename template.
    pub fname_raw: String,

    /// Daily output filename template.
    pub fname_out: String,

    /// Output path suffix template, joined between the output root and
    /// the output filename.
    pub path_sfx: String,

    /// Temporal resolution label substituted for `{resolution}`.
    pub resolution: String,

    /// Data level label substituted for `{datalvl}`.
    pub datalvl: String,

    /// Filename extension substituted for `{sfx}`.
    pub sfx: String,

    /// JSON file whose top-level keys are the known logger tables.
    pub file_logger_tables: Option<PathBuf>,

    /// CF metadata JSON file (global/variable attributes and encoding).
    pub file_cfmeta: Option<PathBuf>,

    /// Calibration table JSON file.
    pub file_calibration: Option<PathBuf>,

    /// Instrument map JSON file (id -> device/serial metadata).
    pub file_instrument_map: Option<PathBuf>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            logger_name: "logger".to_string(),
            tables: Vec::new(),
            fname_raw: "{loggername}_{table}.dat".to_string(),
            fname_out: "{dt}_{loggername}_{table}_{datalvl}.{sfx}".to_string(),
            path_sfx: "{table}".to_string(),
            resolution: "full".to_string(),
            datalvl: "l0".to_string(),
            sfx: "dat".to_string(),
            file_logger_tables: None,
            file_cfmeta: None,
            file_calibration: None,
            file_instrument_map: None,
            extra: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Load a JSON config file, merging it over the built-in defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }

    /// The tables to process: the configured list, or the keys of the
    /// table-list JSON file when the list is empty.
    pub fn table_names(&self) -> Result<Vec<String>> {
        if !self.tables.is_empty() {
            return Ok(self.tables.clone());
        }
        let path = self
            .file_logger_tables
            .as_ref()
            .ok_or(Error::MissingConfig("file_logger_tables"))?;
        let value: serde_json::Value = serde_json::from_reader(BufReader::new(File::open(path)?))?;
        let map = value.as_object().ok_or_else(|| {
            Error::BadMetadata(format!("{}: expected a JSON object", path.display()))
        })?;
        Ok(map.keys().cloned().collect())
    }

    /// Substitution map for path templates: all extra keys plus the
    /// recognized `{loggername}`, `{table}`, `{resolution}`, `{datalvl}`,
    /// `{sfx}` and, when a day is given, `{dt}`.
    pub fn substitutions(&self, table: &str, day: Option<Date>) -> BTreeMap<String, String> {
        let mut vars = self.extra.clone();
        vars.insert("loggername".to_string(), self.logger_name.clone());
        vars.insert("table".to_string(), table.to_string());
        vars.insert("resolution".to_string(), self.resolution.clone());
        vars.insert("datalvl".to_string(), self.datalvl.clone());
        vars.insert("sfx".to_string(), self.sfx.clone());
        if let Some(day) = day {
            let format = format_description!("[year]-[month]-[day]");
            if let Ok(dt) = day.format(&format) {
                vars.insert("dt".to_string(), dt);
            }
        }
        vars
    }
}

/// Substitute `{key}` placeholders in a template. Unknown placeholders
/// are left intact.
pub fn render_template(template: &str, vars: &BTreeMap<String, String>) -> String {
    let mut out = template.to_string();
    for (key, value) in vars {
        out = out.replace(&format!("{{{key}}}"), value);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    #[test]
    fn partial_config_merges_over_defaults() {
        let config: Config = serde_json::from_str(
            r#"{"logger_name": "station7", "tables": ["met"], "station_id": "S7"}"#,
        )
        .unwrap();

        assert_eq!(config.logger_name, "station7");
        assert_eq!(config.tables, vec!["met".to_string()]);
        // untouched fields keep their defaults
        assert_eq!(config.datalvl, "l0");
        assert_eq!(config.fname_raw, "{loggername}_{table}.dat");
        // unrecognized keys land in extra
        assert_eq!(config.extra.get("station_id").unwrap(), "S7");
    }

    #[test]
    fn render_substitutes_known_keys() {
        let config = Config {
            logger_name: "station1".to_string(),
            ..Config::default()
        };
        let vars = config.substitutions("met", Some(date!(2025 - 01 - 02)));
        let path = render_template("{dt}_{loggername}_{table}_{datalvl}.{sfx}", &vars);
        assert_eq!(path, "2025-01-02_station1_met_l0.dat");
    }

    #[test]
    fn render_leaves_unknown_placeholders() {
        let vars = BTreeMap::new();
        assert_eq!(render_template("a/{mystery}/b", &vars), "a/{mystery}/b");
    }

    #[test]
    fn table_names_fall_back_to_the_list_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tables.json");
        std::fs::write(&path, r#"{"met": {}, "soil": {}}"#).unwrap();
        let config = Config {
            file_logger_tables: Some(path),
            ..Config::default()
        };
        let mut names = config.table_names().unwrap();
        names.sort();
        assert_eq!(names, vec!["met".to_string(), "soil".to_string()]);
    }

    #[test]
    fn empty_tables_without_a_list_file_is_an_error() {
        let err = Config::default().table_names().unwrap_err();
        assert!(matches!(err, Error::MissingConfig("file_logger_tables")));
    }

    #[test]
    fn non_object_table_list_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tables.json");
        std::fs::write(&path, r#"["met", "soil"]"#).unwrap();
        let config = Config {
            file_logger_tables: Some(path),
            ..Config::default()
        };
        let err = config.table_names().unwrap_err();
        assert!(matches!(err, Error::BadMetadata(_)));
    }

    #[test]
    fn extra_keys_substitute_in_templates() {
        let mut config = Config::default();
        config
            .extra
            .insert("site".to_string(), "lindenberg".to_string());
        let vars = config.substitutions("met", None);
        assert_eq!(render_template("{site}/{table}", &vars), "lindenberg/met");
    }
}
