use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use arrow::array::ArrayRef;

use crate::config::{NOT_NOVEL_COLUMN, QUALITY_COLUMN, SYSTEM_ID_COLUMN};
use crate::model::{MaxSimilarityRow, MaxSimilarityTable};
use crate::util::write_atomically;

use super::columnar::{
    PARQUET_EXTENSION, ParquetTable, bool_array, encode_parquet, float_array, string_array,
};

pub fn stratified_table_path(output_dir: &Path, test_label: &str) -> PathBuf {
    output_dir.join(format!("{test_label}_set.{PARQUET_EXTENSION}"))
}

/// Columns are `system_id`, the metrics, `passes_quality`, the categories
/// and `not_novel`. Rows are sorted by system id so identical tables produce
/// identical bytes.
pub fn encode_stratified_table(table: &MaxSimilarityTable) -> Result<Vec<u8>> {
    let mut rows = table.rows.iter().collect::<Vec<_>>();
    rows.sort_by(|a, b| a.system_id.cmp(&b.system_id));

    let mut columns: Vec<(&str, ArrayRef)> =
        Vec::with_capacity(table.metrics.len() + table.categories.len() + 3);
    columns.push((
        SYSTEM_ID_COLUMN,
        string_array(rows.iter().map(|row| row.system_id.as_str())),
    ));
    for (idx, metric) in table.metrics.iter().enumerate() {
        columns.push((
            metric.as_str(),
            float_array(rows.iter().map(|row| row.similarities[idx])),
        ));
    }
    columns.push((
        QUALITY_COLUMN,
        bool_array(rows.iter().map(|row| row.passes_quality)),
    ));
    for (idx, category) in table.categories.iter().enumerate() {
        columns.push((
            category.as_str(),
            bool_array(rows.iter().map(|row| row.categories[idx])),
        ));
    }
    columns.push((
        NOT_NOVEL_COLUMN,
        bool_array(rows.iter().map(|row| row.not_novel)),
    ));

    encode_parquet(columns).context("failed to encode stratified table")
}

pub fn write_stratified_table(path: &Path, table: &MaxSimilarityTable) -> Result<()> {
    let data = encode_stratified_table(table)?;
    write_atomically(path, &data)
}

/// Reads a table written by `write_stratified_table`. Metric and category
/// columns are told apart by their position around `passes_quality`.
pub fn read_stratified_table(path: &Path) -> Result<MaxSimilarityTable> {
    let table = ParquetTable::read(path)?;
    decode_stratified_table(&table).with_context(|| format!("failed to parse {}", path.display()))
}

fn decode_stratified_table(source: &ParquetTable) -> Result<MaxSimilarityTable> {
    let columns = source.column_names();
    let quality_idx = columns
        .iter()
        .position(|name| *name == QUALITY_COLUMN)
        .with_context(|| format!("missing {QUALITY_COLUMN} column"))?;
    if columns.first() != Some(&SYSTEM_ID_COLUMN) || columns.last() != Some(&NOT_NOVEL_COLUMN) {
        bail!("expected {SYSTEM_ID_COLUMN} first and {NOT_NOVEL_COLUMN} last");
    }
    let not_novel_idx = columns.len() - 1;

    let metrics = columns[1..quality_idx]
        .iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>();
    let categories = columns[quality_idx + 1..not_novel_idx]
        .iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>();

    let system_ids = source.strings(SYSTEM_ID_COLUMN)?;
    let metric_values = metrics
        .iter()
        .map(|metric| source.floats(metric))
        .collect::<Result<Vec<_>>>()?;
    let quality = source.booleans(QUALITY_COLUMN)?;
    let category_values = categories
        .iter()
        .map(|category| source.booleans(category))
        .collect::<Result<Vec<_>>>()?;
    let not_novel = source.booleans(NOT_NOVEL_COLUMN)?;

    let mut rows = Vec::with_capacity(system_ids.len());
    for (row, system_id) in system_ids.into_iter().enumerate() {
        let system_id =
            system_id.with_context(|| format!("row {} has no {SYSTEM_ID_COLUMN}", row + 1))?;
        let similarities = metrics
            .iter()
            .zip(&metric_values)
            .map(|(metric, values)| {
                values[row].with_context(|| format!("null {metric} on row {}", row + 1))
            })
            .collect::<Result<Vec<f64>>>()?;
        let flags = categories
            .iter()
            .zip(&category_values)
            .map(|(category, values)| required_flag(category, values[row], row))
            .collect::<Result<Vec<bool>>>()?;

        rows.push(MaxSimilarityRow {
            system_id,
            similarities,
            passes_quality: required_flag(QUALITY_COLUMN, quality[row], row)?,
            categories: flags,
            not_novel: required_flag(NOT_NOVEL_COLUMN, not_novel[row], row)?,
        });
    }

    Ok(MaxSimilarityTable {
        metrics,
        categories,
        rows,
    })
}

fn required_flag(column: &str, value: Option<bool>, row: usize) -> Result<bool> {
    value.with_context(|| format!("null {column} on row {}", row + 1))
}
