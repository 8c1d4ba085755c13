//! Per-field statistics aggregated by a consumer

use std::collections::BTreeMap;

use crate::record::Record;

/// Counts for one field across all observed records
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldStat {
    pub non_null: usize,
    /// Occurrences per value type name (`int`, `text`, ...), nulls included
    pub types: BTreeMap<&'static str, usize>,
}

/// Aggregate of field presence and value types over a record stream
#[derive(Debug, Clone, Default)]
pub struct FieldStats {
    records: usize,
    fields: BTreeMap<String, FieldStat>,
}

impl FieldStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, record: &Record) {
        self.records += 1;
        for (name, value) in record.fields() {
            let stat = self.fields.entry(name.to_string()).or_default();
            if !value.is_null() {
                stat.non_null += 1;
            }
            *stat.types.entry(value.type_name()).or_default() += 1;
        }
    }

    pub fn records(&self) -> usize {
        self.records
    }

    pub fn field(&self, name: &str) -> Option<&FieldStat> {
        self.fields.get(name)
    }

    /// Fields in name order
    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldStat)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Share of records carrying a non-null value for `name` (0.0 when empty)
    pub fn fill_rate(&self, name: &str) -> f64 {
        if self.records == 0 {
            return 0.0;
        }
        let non_null = self.fields.get(name).map_or(0, |s| s.non_null);
        non_null as f64 / self.records as f64
    }
}
