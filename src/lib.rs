//! Daily splitting and archive maintenance for field-logger time series.
//!
//! Raw logger files accumulate rows for one or more days; [`split`]
//! partitions them into per-day files and truncates the source, so the
//! logger can keep appending while the pipeline drains. Drained data is
//! read into [`Dataset`]s and folded into self-describing JSON archives
//! ([`archive`]), with merge semantics that tolerate replayed rows and
//! reject silent overwrites ([`merge`]). Attribute and encoding
//! annotation follows a CF-style metadata table ([`cfmeta`]), and
//! instrument calibration histories resolve through [`calibration`].

pub mod archive;
pub mod calibration;
pub mod cfmeta;
pub mod config;
pub mod dataset;
pub mod error;
pub mod merge;
pub mod partition;
pub mod split;

mod fsutil;

pub use config::Config;
pub use dataset::{Dataset, Variable};
pub use error::{Error, Result};
pub use split::{split_raw_to_daily, split_table, SplitOutcome};
