//! SQL predicates for Lance deletes and scans.

use kbase_core::types::SOURCE_FILE;
use kbase_core::{MetaValue, MetadataFilter};

use crate::schema::ID;

/// Ids per `id IN (...)` delete statement.
pub const ID_BATCH: usize = 500;

pub fn quote(value: &str) -> String { format!("'{}'", value.replace('\'', "''")) }

pub fn id_predicate(ids: &[String]) -> String {
    let list = ids.iter().map(|id| quote(id)).collect::<Vec<_>>().join(",");
    format!("{ID} IN ({list})")
}

/// A pushdown predicate when the filter only constrains `source_file`.
pub fn source_predicate(filter: &MetadataFilter) -> Option<String> {
    let mut conditions = filter.conditions();
    match (conditions.next(), conditions.next()) {
        (Some((key, MetaValue::Str(value))), None) if key == SOURCE_FILE => {
            Some(format!("{SOURCE_FILE} = {}", quote(value)))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quotes_are_escaped() {
        assert_eq!(quote("o'brien.txt"), "'o''brien.txt'");
        assert_eq!(id_predicate(&["a".to_string(), "b'c".to_string()]), "id IN ('a','b''c')");
    }

    #[test]
    fn only_source_filters_push_down() {
        assert_eq!(
            source_predicate(&MetadataFilter::source_file("notes.md")).as_deref(),
            Some("source_file = 'notes.md'")
        );
        assert_eq!(source_predicate(&MetadataFilter::source_file("notes.md").and("page", 1u32)), None);
        assert_eq!(source_predicate(&MetadataFilter::new().and("page", 1u32)), None);
    }
}
