use std::collections::HashMap;

use serde_json::Value;

use crate::backend::RawItem;

/// Characteristic columns every record is normalized onto, in output order.
pub const CHARACTERISTICS: [&str; 4] = ["carat", "cut", "color", "clarity"];

/// One normalized catalog row.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogRecord {
    pub id: String,
    /// Price in dollars.
    pub price: f64,
    /// Values aligned with [`CHARACTERISTICS`]; a missing attribute is kept
    /// as an empty string so downstream columns never shift.
    pub characteristics: Vec<String>,
}

impl CatalogRecord {
    pub fn from_raw(item: RawItem) -> Self {
        let characteristics = CHARACTERISTICS
            .iter()
            .map(|name| {
                item.attributes
                    .get(*name)
                    .map(plain_value)
                    .unwrap_or_default()
            })
            .collect();
        Self {
            id: item.id,
            price: item.price,
            characteristics,
        }
    }
}

/// Renders a JSON value the way it should appear in a table cell.
fn plain_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// The deduplicated catalog, keyed by item id.
///
/// Owned by the collector task for the whole crawl; worker tasks never touch
/// it directly. Duplicate ids are expected where leaf ranges share a boundary
/// price, and the later observation wins.
// TODO: if duplicate observations ever turn out to disagree on attributes,
// make the overwrite order deterministic (leaf low bound ascending).
#[derive(Debug, Default)]
pub struct Catalog {
    records: HashMap<String, CatalogRecord>,
}

impl Catalog {
    /// Inserts one raw observation, overwriting any earlier one with the
    /// same id.
    pub fn insert(&mut self, item: RawItem) {
        let record = CatalogRecord::from_raw(item);
        self.records.insert(record.id.clone(), record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.records.contains_key(id)
    }

    /// Finalizes the catalog into rows sorted by id, consuming it. The sort
    /// keeps repeat runs byte-identical.
    pub fn into_records(self) -> Vec<CatalogRecord> {
        let mut records: Vec<_> = self.records.into_values().collect();
        records.sort_unstable_by(|a, b| a.id.cmp(&b.id));
        records
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(id: &str, price: f64, attrs: Value) -> RawItem {
        let Value::Object(attributes) = attrs else {
            panic!("attrs must be a map")
        };
        RawItem {
            id: id.into(),
            price,
            attributes,
        }
    }

    #[test]
    fn duplicate_ids_keep_the_later_observation() {
        let mut catalog = Catalog::default();
        catalog.insert(raw("d-1", 500.0, serde_json::json!({"cut": "Good"})));
        catalog.insert(raw("d-1", 500.0, serde_json::json!({"cut": "Ideal"})));

        assert_eq!(catalog.len(), 1);
        let records = catalog.into_records();
        assert_eq!(records[0].characteristics[1], "Ideal");
    }

    #[test]
    fn missing_attributes_become_empty_cells() {
        let mut catalog = Catalog::default();
        catalog.insert(raw("d-2", 999.99, serde_json::json!({"carat": 1.2})));

        let records = catalog.into_records();
        assert_eq!(records[0].characteristics, vec!["1.2", "", "", ""]);
    }

    #[test]
    fn finalized_records_are_sorted_by_id() {
        let mut catalog = Catalog::default();
        for id in ["d-30", "d-1", "d-20"] {
            catalog.insert(raw(id, 100.0, serde_json::json!({})));
        }

        let ids: Vec<_> = catalog.into_records().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["d-1", "d-20", "d-30"]);
    }
}
