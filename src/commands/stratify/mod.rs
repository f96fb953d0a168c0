//! Cross-split similarity aggregation and novelty stratification of a test
//! set against its training set.

mod aggregate;
mod cache;
mod columnar;
mod fingerprints;
mod output;
mod pipeline;
mod providers;
mod quality;
mod run;
mod similarity_source;
mod split_registry;
mod store;
mod stratifier;

pub use cache::MetricCache;
pub use output::{read_stratified_table, stratified_table_path};
#[cfg(test)]
pub use output::write_stratified_table;
pub use pipeline::validate_labels;
pub use run::{run, run_manifest_path};
