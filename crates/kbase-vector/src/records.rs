//! Conversions between chunks and Arrow record batches.

use std::sync::Arc;

use arrow_array::types::Float32Type;
use arrow_array::{Array, FixedSizeListArray, Float32Array, RecordBatch, StringArray};

use kbase_core::{Chunk, ChunkId, ChunkMetadata, Error, Result, SearchHit};

use crate::schema::{chunk_schema, DISTANCE, ID, METADATA, SOURCE_FILE, TEXT};

/// Builds one batch from chunks whose ids have already been assigned.
pub fn chunks_to_batch(ids: &[ChunkId], chunks: &[Chunk], dim: usize) -> Result<RecordBatch> {
    let width = i32::try_from(dim).map_err(|_| Error::InvalidInput(format!("vector dimension {dim} is too large")))?;
    let mut texts = Vec::with_capacity(chunks.len());
    let mut sources = Vec::with_capacity(chunks.len());
    let mut metadata = Vec::with_capacity(chunks.len());
    let mut vectors: Vec<Option<Vec<Option<f32>>>> = Vec::with_capacity(chunks.len());
    for chunk in chunks {
        texts.push(chunk.text.clone());
        sources.push(chunk.metadata.source_file.clone());
        metadata.push(
            serde_json::to_string(&chunk.metadata.extra)
                .map_err(|e| Error::InvalidInput(format!("metadata is not serializable: {e}")))?,
        );
        vectors.push(Some(chunk.vector.iter().map(|&x| Some(x)).collect()));
    }
    RecordBatch::try_new(
        chunk_schema(dim)?,
        vec![
            Arc::new(StringArray::from(ids.to_vec())),
            Arc::new(StringArray::from(texts)),
            Arc::new(StringArray::from(sources)),
            Arc::new(StringArray::from(metadata)),
            Arc::new(FixedSizeListArray::from_iter_primitive::<Float32Type, _, _>(vectors.into_iter(), width)),
        ],
    )
    .map_err(|e| Error::storage(format!("building record batch: {e}")))
}

/// Checks a write batch and returns its vector dimension.
pub fn check_chunks(chunks: &[Chunk]) -> Result<usize> {
    let dim = chunks.first().map_or(0, |c| c.vector.len());
    if dim == 0 {
        return Err(Error::InvalidInput("chunk vectors must not be empty".to_string()));
    }
    for chunk in chunks {
        if chunk.text.trim().is_empty() {
            return Err(Error::InvalidInput("chunk text must not be empty".to_string()));
        }
        chunk.metadata.validate()?;
        if chunk.vector.len() != dim {
            return Err(Error::DimensionMismatch { expected: dim, actual: chunk.vector.len() });
        }
    }
    Ok(dim)
}

/// Id and metadata of one stored row, as read back by scans.
#[derive(Debug, Clone)]
pub struct StoredRow {
    pub id: ChunkId,
    pub metadata: ChunkMetadata,
}

pub fn rows_from_batch(batch: &RecordBatch) -> Result<Vec<StoredRow>> {
    let ids = string_column(batch, ID)?;
    let sources = string_column(batch, SOURCE_FILE)?;
    let metadata = string_column(batch, METADATA)?;
    (0..batch.num_rows())
        .map(|i| {
            Ok(StoredRow {
                id: ids.value(i).to_string(),
                metadata: decode_metadata(sources.value(i), metadata.value(i))?,
            })
        })
        .collect()
}

/// Reads vector search output; rows without a distance are skipped.
pub fn hits_from_batch(batch: &RecordBatch) -> Result<Vec<SearchHit>> {
    let ids = string_column(batch, ID)?;
    let texts = string_column(batch, TEXT)?;
    let sources = string_column(batch, SOURCE_FILE)?;
    let metadata = string_column(batch, METADATA)?;
    let distances = batch
        .column_by_name(DISTANCE)
        .and_then(|c| c.as_any().downcast_ref::<Float32Array>())
        .ok_or_else(|| Error::storage(format!("column '{DISTANCE}' missing from search results")))?;
    let mut hits = Vec::with_capacity(batch.num_rows());
    for i in 0..batch.num_rows() {
        if distances.is_null(i) {
            continue;
        }
        hits.push(SearchHit {
            id: ids.value(i).to_string(),
            text: texts.value(i).to_string(),
            metadata: decode_metadata(sources.value(i), metadata.value(i))?,
            distance: distances.value(i),
        });
    }
    Ok(hits)
}

pub fn source_files(batch: &RecordBatch) -> Result<Vec<String>> {
    let sources = string_column(batch, SOURCE_FILE)?;
    Ok((0..batch.num_rows()).map(|i| sources.value(i).to_string()).collect())
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
        .ok_or_else(|| Error::storage(format!("column '{name}' missing or not utf8")))
}

fn decode_metadata(source_file: &str, json: &str) -> Result<ChunkMetadata> {
    let extra = if json.is_empty() {
        Default::default()
    } else {
        serde_json::from_str(json).map_err(|e| Error::storage(format!("corrupt metadata column: {e}")))?
    };
    Ok(ChunkMetadata { source_file: source_file.to_string(), extra })
}

#[cfg(test)]
mod tests {
    use arrow_array::cast::AsArray;

    use super::*;
    use crate::schema::VECTOR;

    fn vectors_from_batch(batch: &RecordBatch) -> Result<Vec<Vec<f32>>> {
        let vectors = batch
            .column_by_name(VECTOR)
            .and_then(|c| c.as_any().downcast_ref::<FixedSizeListArray>())
            .ok_or_else(|| Error::storage(format!("column '{VECTOR}' missing or not a fixed size list")))?;
        Ok((0..batch.num_rows())
            .map(|i| vectors.value(i).as_primitive::<Float32Type>().values().iter().copied().collect())
            .collect())
    }

    #[test]
    fn batch_round_trips_metadata_and_vectors() {
        let chunks = vec![
            Chunk::new("alpha", vec![1.0, 0.0], ChunkMetadata::new("a.txt").with("page", 2u32)),
            Chunk::new("beta", vec![0.0, 1.0], ChunkMetadata::new("b.txt")),
        ];
        let ids = vec!["1".to_string(), "2".to_string()];
        let batch = chunks_to_batch(&ids, &chunks, 2).unwrap();
        assert_eq!(batch.num_rows(), 2);

        let rows = rows_from_batch(&batch).unwrap();
        assert_eq!(rows[0].id, "1");
        assert_eq!(rows[0].metadata, chunks[0].metadata);
        assert_eq!(rows[1].metadata.source_file, "b.txt");
        assert_eq!(vectors_from_batch(&batch).unwrap(), vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }
}
