use std::sync::Arc;

use arrow_schema::{DataType, Field, Schema};

use kbase_core::{Error, Result};

pub const ID: &str = "id";
pub const TEXT: &str = "text";
pub const SOURCE_FILE: &str = "source_file";
/// Optional metadata fields, JSON encoded.
pub const METADATA: &str = "metadata";
pub const VECTOR: &str = "vector";
/// Added by LanceDB to vector search results.
pub const DISTANCE: &str = "_distance";

/// One table per collection; the vector width is fixed at creation.
pub fn chunk_schema(dim: usize) -> Result<Arc<Schema>> {
    let width = i32::try_from(dim).map_err(|_| Error::InvalidInput(format!("vector dimension {dim} is too large")))?;
    Ok(Arc::new(Schema::new(vec![
        Field::new(ID, DataType::Utf8, false),
        Field::new(TEXT, DataType::Utf8, false),
        Field::new(SOURCE_FILE, DataType::Utf8, false),
        Field::new(METADATA, DataType::Utf8, false),
        Field::new(VECTOR, DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Float32, true)), width), true),
    ])))
}

/// Width of the vector column, if the schema has one.
pub fn vector_dim(schema: &Schema) -> Option<usize> {
    match schema.field_with_name(VECTOR).ok()?.data_type() {
        DataType::FixedSizeList(_, width) => usize::try_from(*width).ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vector_width_round_trips() {
        let schema = chunk_schema(384).unwrap();
        assert_eq!(vector_dim(&schema), Some(384));
        assert_eq!(schema.fields().len(), 5);
    }
}
