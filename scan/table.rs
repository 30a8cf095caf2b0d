use ahash::AHashMap;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::types::ScanError;

/// One categorical feature, dictionary encoded.
///
/// Category labels are stored in lexicographic order, so comparing codes is
/// the same as comparing labels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureColumn {
    name: String,
    categories: Vec<String>,
    codes: Vec<u32>,
}

impl FeatureColumn {
    pub fn new(name: impl Into<String>, values: &[String]) -> Self {
        let categories: Vec<String> = values
            .iter()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .cloned()
            .collect();
        let lookup: AHashMap<&str, u32> = categories
            .iter()
            .enumerate()
            .map(|(code, label)| (label.as_str(), code as u32))
            .collect();
        let codes = values.iter().map(|value| lookup[value.as_str()]).collect();
        Self {
            name: name.into(),
            categories,
            codes,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn categories(&self) -> &[String] {
        &self.categories
    }

    pub fn codes(&self) -> &[u32] {
        &self.codes
    }

    #[inline]
    pub fn num_categories(&self) -> usize {
        self.categories.len()
    }

    pub fn code_of(&self, label: &str) -> Option<u32> {
        self.categories
            .binary_search_by(|candidate| candidate.as_str().cmp(label))
            .ok()
            .map(|idx| idx as u32)
    }

    pub fn label(&self, code: u32) -> &str {
        &self.categories[code as usize]
    }
}

/// Column-major table of categorical features, one row per observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureTable {
    columns: Vec<FeatureColumn>,
    num_rows: usize,
}

impl FeatureTable {
    /// Builds a table from `(feature name, values)` pairs. Columns are sorted
    /// by name and must all have the same length.
    pub fn from_columns<I, S>(columns: I) -> Result<Self, ScanError>
    where
        I: IntoIterator<Item = (S, Vec<String>)>,
        S: Into<String>,
    {
        let ordered: BTreeMap<String, Vec<String>> = columns
            .into_iter()
            .map(|(name, values)| (name.into(), values))
            .collect();

        let num_rows = ordered.values().next().map_or(0, Vec::len);
        if ordered.is_empty() || num_rows == 0 {
            return Err(ScanError::EmptyTable);
        }
        for (name, values) in &ordered {
            if values.len() != num_rows {
                return Err(ScanError::LengthMismatch {
                    what: format!("feature column '{name}'"),
                    expected: num_rows,
                    found: values.len(),
                });
            }
        }

        let columns = ordered
            .iter()
            .map(|(name, values)| FeatureColumn::new(name.clone(), values))
            .collect();
        Ok(Self { columns, num_rows })
    }

    /// Builds a table from per-observation `feature -> value` records. The
    /// first record fixes the feature set; every later record must name the
    /// same features.
    pub fn from_records(records: &[HashMap<String, String>]) -> Result<Self, ScanError> {
        let Some(first) = records.first() else {
            return Err(ScanError::EmptyTable);
        };
        let names: BTreeSet<&String> = first.keys().collect();
        let mut columns: BTreeMap<String, Vec<String>> = names
            .iter()
            .map(|name| ((*name).clone(), Vec::with_capacity(records.len())))
            .collect();

        for (row, record) in records.iter().enumerate() {
            if record.len() != names.len() {
                if let Some(extra) = record.keys().find(|key| !names.contains(key)) {
                    return Err(ScanError::UnknownFeature(extra.clone()));
                }
            }
            for (name, values) in columns.iter_mut() {
                let value = record
                    .get(name)
                    .ok_or_else(|| ScanError::MissingFeature {
                        row,
                        feature: name.clone(),
                    })?;
                values.push(value.clone());
            }
        }

        Self::from_columns(columns)
    }

    pub fn columns(&self) -> &[FeatureColumn] {
        &self.columns
    }

    #[inline]
    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    #[inline]
    pub fn num_features(&self) -> usize {
        self.columns.len()
    }

    pub fn feature_index(&self, name: &str) -> Option<usize> {
        self.columns
            .binary_search_by(|column| column.name.as_str().cmp(name))
            .ok()
    }

    pub fn feature_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|column| column.name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn categories_are_sorted_and_codes_follow_labels() {
        let column = FeatureColumn::new("colour", &strings(&["red", "blue", "red", "green"]));
        assert_eq!(column.categories(), &strings(&["blue", "green", "red"])[..]);
        assert_eq!(column.codes(), &[2, 0, 2, 1]);
        assert_eq!(column.code_of("green"), Some(1));
        assert_eq!(column.code_of("purple"), None);
        assert_eq!(column.label(0), "blue");
    }

    #[test]
    fn columns_are_ordered_by_name() {
        let table = FeatureTable::from_columns([
            ("zeta", strings(&["a", "b"])),
            ("alpha", strings(&["c", "d"])),
        ])
        .unwrap();
        let names: Vec<&str> = table.feature_names().collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
        assert_eq!(table.feature_index("zeta"), Some(1));
        assert_eq!(table.feature_index("beta"), None);
        assert_eq!(table.num_rows(), 2);
    }

    #[test]
    fn ragged_or_empty_columns_are_rejected() {
        let ragged =
            FeatureTable::from_columns([("a", strings(&["x", "y"])), ("b", strings(&["z"]))]);
        assert!(matches!(ragged, Err(ScanError::LengthMismatch { .. })));

        let empty = FeatureTable::from_columns(Vec::<(String, Vec<String>)>::new());
        assert!(matches!(empty, Err(ScanError::EmptyTable)));

        let no_rows = FeatureTable::from_columns([("a", Vec::new())]);
        assert!(matches!(no_rows, Err(ScanError::EmptyTable)));
    }

    #[test]
    fn records_must_share_features() {
        let mut first = HashMap::new();
        first.insert("sex".to_string(), "f".to_string());
        first.insert("age".to_string(), "young".to_string());
        let mut second = HashMap::new();
        second.insert("sex".to_string(), "m".to_string());

        let err = FeatureTable::from_records(&[first.clone(), second]).unwrap_err();
        assert!(matches!(err, ScanError::MissingFeature { row: 1, .. }));

        let mut third = first.clone();
        third.insert("age".to_string(), "old".to_string());
        let table = FeatureTable::from_records(&[first, third]).unwrap();
        assert_eq!(table.num_features(), 2);
        assert_eq!(table.columns()[0].categories(), &strings(&["old", "young"])[..]);
    }
}
