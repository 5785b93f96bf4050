//! Results table for a comparison run.
//!
//! One row per unordered image pair, keyed by `(img_a, img_b)` with
//! `img_a < img_b`, holding the four candidate logits. The table is persisted
//! as an Arrow IPC file so any Arrow reader (pandas `read_feather`, polars,
//! DuckDB) can load it; the schema metadata entry `index` names the key
//! columns.

use crate::core::constants::{INDEX_COLUMNS, SCORE_COLUMNS};
use crate::core::PreferenceError;
use crate::predictor::PreferenceScores;
use arrow::array::{Array, ArrayRef, Float32Array, RecordBatch, UInt32Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::ipc::reader::FileReader;
use arrow::ipc::writer::FileWriter;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

/// Schema metadata key listing the row key columns.
pub const INDEX_METADATA_KEY: &str = "index";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ComparisonRow {
    pub img_a: u32,
    pub img_b: u32,
    pub scores: PreferenceScores,
}

/// Rows in strictly ascending `(img_a, img_b)` order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComparisonTable {
    rows: Vec<ComparisonRow>,
}

impl ComparisonTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            rows: Vec::with_capacity(capacity),
        }
    }

    /// Appends the row for pair `(img_a, img_b)`.
    ///
    /// # Errors
    ///
    /// Returns [`PreferenceError::InvalidInput`] if `img_a >= img_b` or if the
    /// key does not come strictly after the last row, which also rules out
    /// duplicate pairs.
    pub fn push(
        &mut self,
        img_a: u32,
        img_b: u32,
        scores: PreferenceScores,
    ) -> Result<(), PreferenceError> {
        if img_a >= img_b {
            return Err(PreferenceError::invalid_input(format!(
                "pair ({img_a}, {img_b}) is not an unordered pair with img_a < img_b"
            )));
        }
        if let Some(last) = self.rows.last()
            && (last.img_a, last.img_b) >= (img_a, img_b)
        {
            return Err(PreferenceError::invalid_input(format!(
                "pair ({img_a}, {img_b}) does not follow ({}, {})",
                last.img_a, last.img_b
            )));
        }
        self.rows.push(ComparisonRow {
            img_a,
            img_b,
            scores,
        });
        Ok(())
    }

    pub fn rows(&self) -> &[ComparisonRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Looks up the scores of one pair.
    pub fn get(&self, img_a: u32, img_b: u32) -> Option<&PreferenceScores> {
        self.rows
            .binary_search_by(|row| (row.img_a, row.img_b).cmp(&(img_a, img_b)))
            .ok()
            .map(|idx| &self.rows[idx].scores)
    }

    /// Arrow schema: two `UInt32` key columns then four `Float32` score columns.
    pub fn schema() -> Schema {
        let mut fields: Vec<Field> = INDEX_COLUMNS
            .iter()
            .map(|name| Field::new(*name, DataType::UInt32, false))
            .collect();
        fields.extend(
            SCORE_COLUMNS
                .iter()
                .map(|name| Field::new(*name, DataType::Float32, false)),
        );
        let metadata = HashMap::from([(INDEX_METADATA_KEY.to_string(), INDEX_COLUMNS.join(","))]);
        Schema::new_with_metadata(fields, metadata)
    }

    pub fn to_record_batch(&self) -> Result<RecordBatch, PreferenceError> {
        let img_a: Vec<u32> = self.rows.iter().map(|r| r.img_a).collect();
        let img_b: Vec<u32> = self.rows.iter().map(|r| r.img_b).collect();

        let mut columns: Vec<ArrayRef> = vec![
            Arc::new(UInt32Array::from(img_a)),
            Arc::new(UInt32Array::from(img_b)),
        ];
        for col in 0..SCORE_COLUMNS.len() {
            let values: Vec<f32> = self.rows.iter().map(|r| r.scores.0[col]).collect();
            columns.push(Arc::new(Float32Array::from(values)));
        }

        Ok(RecordBatch::try_new(Arc::new(Self::schema()), columns)?)
    }

    /// Rebuilds a table from record batches written by [`Self::to_record_batch`].
    pub fn from_record_batches<'a>(
        batches: impl IntoIterator<Item = &'a RecordBatch>,
    ) -> Result<Self, PreferenceError> {
        let mut table = Self::new();
        for batch in batches {
            let img_a = u32_column(batch, INDEX_COLUMNS[0])?;
            let img_b = u32_column(batch, INDEX_COLUMNS[1])?;
            let scores = SCORE_COLUMNS
                .iter()
                .map(|name| f32_column(batch, name))
                .collect::<Result<Vec<_>, _>>()?;

            for row in 0..batch.num_rows() {
                let values = [
                    scores[0].value(row),
                    scores[1].value(row),
                    scores[2].value(row),
                    scores[3].value(row),
                ];
                table.push(
                    img_a.value(row),
                    img_b.value(row),
                    PreferenceScores(values),
                )?;
            }
        }
        Ok(table)
    }

    /// Writes the table as a single-batch Arrow IPC file.
    pub fn write_ipc(&self, path: impl AsRef<Path>) -> Result<(), PreferenceError> {
        let path = path.as_ref();
        let batch = self.to_record_batch()?;

        let file = File::create(path)?;
        let mut writer = FileWriter::try_new(BufWriter::new(file), &batch.schema())?;
        writer.write(&batch)?;
        writer.finish()?;
        writer.into_inner()?.flush()?;

        tracing::info!(rows = self.len(), path = %path.display(), "wrote comparison table");
        Ok(())
    }

    /// Reads a table written by [`Self::write_ipc`].
    pub fn read_ipc(path: impl AsRef<Path>) -> Result<Self, PreferenceError> {
        let file = File::open(path.as_ref())?;
        let reader = FileReader::try_new(BufReader::new(file), None)?;
        let batches = reader.collect::<Result<Vec<_>, _>>()?;
        Self::from_record_batches(&batches)
    }
}

fn column<'a, T: 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a T, PreferenceError> {
    let array = batch.column_by_name(name).ok_or_else(|| {
        PreferenceError::invalid_input(format!("results table is missing column '{name}'"))
    })?;
    if array.null_count() > 0 {
        return Err(PreferenceError::invalid_input(format!(
            "results table column '{name}' contains nulls"
        )));
    }
    array.as_any().downcast_ref::<T>().ok_or_else(|| {
        PreferenceError::invalid_input(format!(
            "results table column '{name}' has unexpected type {}",
            array.data_type()
        ))
    })
}

fn u32_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a UInt32Array, PreferenceError> {
    column::<UInt32Array>(batch, name)
}

fn f32_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a Float32Array, PreferenceError> {
    column::<Float32Array>(batch, name)
}
