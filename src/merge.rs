//! Merging time-indexed datasets.
//!
//! Two entry points: [`merge`] reconciles an existing archive with newly
//! processed data for the same quantity, and [`merge_many`]
//! combines any number of per-device datasets onto one time axis,
//! disambiguating colliding variable names.

use std::collections::BTreeSet;

use log::{debug, info};
use serde_json::Value;

use crate::dataset::{format_timestamp, Dataset, Variable};
use crate::{Error, Result};

/// Merge `incoming` into `existing` along the time axis.
///
/// Both inputs are sorted defensively first (daily files arrive in
/// append order, not time order). Identical time axes mean a re-run of
/// the same processing and yield `incoming` as a full overwrite.
/// Otherwise time-invariant variables from `incoming` overwrite their
/// namesakes, and time-varying variables merge over the union axis;
/// overlapping timestamps with differing non-NaN values fail with
/// `MergeConflict` rather than silently picking a winner.
///
/// A non-trivial merge is tagged with a `merged` attribute; the caller
/// reapplies attribute and encoding annotation afterwards since the time
/// range and resolution may have changed.
pub fn merge(existing: &Dataset, incoming: &Dataset) -> Result<Dataset> {
    let mut existing = existing.clone();
    existing.sort_by_time()?;
    let mut incoming = incoming.clone();
    incoming.sort_by_time()?;

    if existing.time == incoming.time {
        info!("identical time axis, overwriting existing dataset");
        return Ok(incoming);
    }
    info!(
        "merging {} existing and {} incoming samples",
        existing.len(),
        incoming.len()
    );

    let axis = union_axis(&[existing.time.as_slice(), incoming.time.as_slice()]);
    let left = existing.reindex(&axis);
    let right = incoming.reindex(&axis);

    let mut merged = Dataset::new(axis.clone());
    let names: BTreeSet<&String> = left.variables.keys().chain(right.variables.keys()).collect();
    for &name in &names {
        let var = match (left.variables.get(name.as_str()), right.variables.get(name.as_str())) {
            (
                Some(Variable::Series { values: a, .. }),
                Some(Variable::Series {
                    values: b,
                    attrs,
                    encoding,
                }),
            ) => Variable::Series {
                values: combine_series(name, &axis, a, b)?,
                attrs: attrs.clone(),
                encoding: encoding.clone(),
            },
            // incoming wins for scalars and for kind changes
            (_, Some(var)) => var.clone(),
            (Some(var), None) => var.clone(),
            (None, None) => continue,
        };
        merged.variables.insert(name.clone(), var);
    }

    merged.attrs = left.attrs.clone();
    merged.attrs.extend(right.attrs.clone());
    merged.attrs.insert("merged".to_string(), Value::from(1));
    merged.time_encoding = if right.time_encoding.is_empty() {
        left.time_encoding.clone()
    } else {
        right.time_encoding.clone()
    };
    Ok(merged)
}

fn combine_series(name: &str, axis: &[i64], existing: &[f64], incoming: &[f64]) -> Result<Vec<f64>> {
    let mut out = Vec::with_capacity(axis.len());
    for (i, &ts) in axis.iter().enumerate() {
        let a = existing[i];
        let b = incoming[i];
        let value = match (a.is_nan(), b.is_nan()) {
            (true, true) => f64::NAN,
            (false, true) => a,
            (true, false) => b,
            (false, false) => {
                if a != b {
                    return Err(Error::MergeConflict {
                        variable: name.to_string(),
                        timestamp: format_timestamp(ts),
                    });
                }
                a
            }
        };
        out.push(value);
    }
    Ok(out)
}

fn union_axis(axes: &[&[i64]]) -> Vec<i64> {
    let mut union: BTreeSet<i64> = BTreeSet::new();
    for axis in axes {
        union.extend(axis.iter().copied());
    }
    union.into_iter().collect()
}

/// Combine datasets sharing a time dimension onto the sorted union of
/// their time axes, folding left to right.
///
/// Variables named in `override_names` always take the latest value.
/// Other name collisions rename the incoming variable: its trailing
/// numeric suffix (if any) is stripped to get the base name, and a fresh
/// suffix equal to the number of accumulator variables sharing that base
/// is appended, so k sources of `temp` come out as `temp`, `temp_1`, ...
/// `temp_{k-1}`.
pub fn merge_many(datasets: &[Dataset], override_names: &[String]) -> Result<Dataset> {
    if datasets.is_empty() {
        return Ok(Dataset::default());
    }

    let mut sorted: Vec<Dataset> = Vec::with_capacity(datasets.len());
    for ds in datasets {
        let mut ds = ds.clone();
        ds.sort_by_time()?;
        sorted.push(ds);
    }

    let axes: Vec<&[i64]> = sorted.iter().map(|ds| ds.time.as_slice()).collect();
    let axis = union_axis(&axes);
    let reindexed: Vec<Dataset> = sorted.iter().map(|ds| ds.reindex(&axis)).collect();

    let mut acc = reindexed[0].clone();
    for ds in &reindexed[1..] {
        for (name, var) in &ds.variables {
            if override_names.iter().any(|o| o == name) {
                acc.variables.insert(name.clone(), var.clone());
                continue;
            }
            if !acc.variables.contains_key(name) {
                acc.variables.insert(name.clone(), var.clone());
                continue;
            }
            let (base, _) = split_name_suffix(name);
            let mut count = acc
                .variables
                .keys()
                .filter(|k| split_name_suffix(k).0 == base)
                .count();
            // the counted suffixes need not be dense; skip taken names
            while acc.variables.contains_key(&format!("{base}_{count}")) {
                count += 1;
            }
            let renamed = format!("{base}_{count}");
            debug!("renaming colliding variable '{name}' to '{renamed}'");
            acc.variables.insert(renamed, var.clone());
        }
    }
    Ok(acc)
}

/// Split a trailing numeric disambiguation suffix off a variable name.
/// `temp_2` becomes `("temp", Some(2))`; a base legitimately ending in
/// digits without an underscore, like `pm25`, is left whole.
pub fn split_name_suffix(name: &str) -> (&str, Option<u32>) {
    if let Some(pos) = name.rfind('_') {
        let digits = &name[pos + 1..];
        if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(n) = digits.parse() {
                return (&name[..pos], Some(n));
            }
        }
    }
    (name, None)
}
