use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow::array::{Array, ArrayRef, BooleanArray, Float64Array, StringArray};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;

pub const PARQUET_EXTENSION: &str = "parquet";

/// Encodes named columns as a single-row-group Parquet file.
///
/// Every field is declared nullable, matching what pandas writes.
pub fn encode_parquet(columns: Vec<(&str, ArrayRef)>) -> Result<Vec<u8>> {
    let fields = columns
        .iter()
        .map(|(name, array)| Field::new(*name, array.data_type().clone(), true))
        .collect::<Vec<_>>();
    let schema = Arc::new(Schema::new(fields));
    let arrays = columns.into_iter().map(|(_, array)| array).collect();
    let batch =
        RecordBatch::try_new(schema.clone(), arrays).context("failed to assemble record batch")?;

    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();
    let mut writer = ArrowWriter::try_new(Vec::new(), schema, Some(props))
        .context("failed to start parquet writer")?;
    writer
        .write(&batch)
        .context("failed to write parquet row group")?;
    writer.into_inner().context("failed to finish parquet file")
}

pub fn string_array<'a>(values: impl IntoIterator<Item = &'a str>) -> ArrayRef {
    Arc::new(StringArray::from_iter_values(values))
}

/// `-0.0` is stored as `0.0` so equal tables encode to equal bytes.
pub fn float_array(values: impl IntoIterator<Item = f64>) -> ArrayRef {
    Arc::new(Float64Array::from_iter_values(
        values
            .into_iter()
            .map(|value| if value == 0.0 { 0.0 } else { value }),
    ))
}

pub fn bool_array(values: impl IntoIterator<Item = bool>) -> ArrayRef {
    Arc::new(values.into_iter().map(Some).collect::<BooleanArray>())
}

/// A fully read Parquet file. The schema comes from the file footer, so
/// column names are known even when the file holds no rows.
#[derive(Debug)]
pub struct ParquetTable {
    schema: SchemaRef,
    batches: Vec<RecordBatch>,
}

impl ParquetTable {
    pub fn read(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
        let builder = ParquetRecordBatchReaderBuilder::try_new(file)
            .with_context(|| format!("failed to read parquet footer: {}", path.display()))?;
        let schema = builder.schema().clone();
        let reader = builder
            .build()
            .with_context(|| format!("failed to start parquet reader: {}", path.display()))?;
        let batches = reader
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("failed to decode parquet rows: {}", path.display()))?;
        Ok(Self { schema, batches })
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.schema
            .fields()
            .iter()
            .map(|field| field.name().as_str())
            .collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.schema.index_of(name).is_ok()
    }

    pub fn num_rows(&self) -> usize {
        self.batches.iter().map(RecordBatch::num_rows).sum()
    }

    fn column(&self, name: &str, data_type: &DataType) -> Result<Vec<ArrayRef>> {
        let idx = self
            .schema
            .index_of(name)
            .with_context(|| format!("missing {name} column"))?;
        self.batches
            .iter()
            .map(|batch| {
                cast(batch.column(idx), data_type)
                    .with_context(|| format!("column {name} cannot be read as {data_type}"))
            })
            .collect()
    }

    /// Numeric and dictionary-encoded columns are cast to text.
    pub fn strings(&self, name: &str) -> Result<Vec<Option<String>>> {
        let mut out = Vec::with_capacity(self.num_rows());
        for array in self.column(name, &DataType::Utf8)? {
            let values = array
                .as_any()
                .downcast_ref::<StringArray>()
                .with_context(|| format!("column {name} did not decode as text"))?;
            out.extend(values.iter().map(|value| value.map(str::to_string)));
        }
        Ok(out)
    }

    pub fn floats(&self, name: &str) -> Result<Vec<Option<f64>>> {
        let mut out = Vec::with_capacity(self.num_rows());
        for array in self.column(name, &DataType::Float64)? {
            let values = array
                .as_any()
                .downcast_ref::<Float64Array>()
                .with_context(|| format!("column {name} did not decode as float"))?;
            out.extend(values.iter());
        }
        Ok(out)
    }

    pub fn booleans(&self, name: &str) -> Result<Vec<Option<bool>>> {
        let mut out = Vec::with_capacity(self.num_rows());
        for array in self.column(name, &DataType::Boolean)? {
            let values = array
                .as_any()
                .downcast_ref::<BooleanArray>()
                .with_context(|| format!("column {name} did not decode as boolean"))?;
            out.extend(values.iter());
        }
        Ok(out)
    }
}
