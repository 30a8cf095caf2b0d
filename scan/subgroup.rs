use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::search::Selection;
use crate::table::FeatureTable;
use crate::types::ScanError;

/// A Cartesian-product constraint over feature values.
///
/// Features that are not named are unconstrained. The unconstrained
/// definition covers the whole dataset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Subgroup {
    constraints: BTreeMap<String, BTreeSet<String>>,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SubgroupParseError {
    #[error("Constraint '{0}' is not of the form feature=value|value.")]
    MalformedConstraint(String),
    #[error("Feature '{0}' is constrained more than once.")]
    DuplicateFeature(String),
}

impl Subgroup {
    /// The unconstrained subgroup.
    pub fn whole() -> Self {
        Self::default()
    }

    /// Adds (or replaces) the constraint on one feature.
    pub fn with<I, S>(mut self, feature: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.constrain(feature, values);
        self
    }

    pub fn constrain<I, S>(&mut self, feature: impl Into<String>, values: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.constraints
            .insert(feature.into(), values.into_iter().map(Into::into).collect());
    }

    pub fn values(&self, feature: &str) -> Option<&BTreeSet<String>> {
        self.constraints.get(feature)
    }

    pub fn constraints(&self) -> impl Iterator<Item = (&str, &BTreeSet<String>)> {
        self.constraints
            .iter()
            .map(|(feature, values)| (feature.as_str(), values))
    }

    pub fn is_whole(&self) -> bool {
        self.constraints.is_empty()
    }

    pub fn num_features(&self) -> usize {
        self.constraints.len()
    }

    /// Number of values named across all constraints; the complexity
    /// penalty is charged per value.
    pub fn num_values(&self) -> usize {
        self.constraints.values().map(BTreeSet::len).sum()
    }

    /// Translates the definition into per-feature category masks. Values
    /// that never occur in the table are accepted and simply match nothing.
    pub(crate) fn resolve(&self, table: &FeatureTable) -> Result<Selection, ScanError> {
        let mut selection: Selection = vec![None; table.num_features()];
        for (feature, values) in &self.constraints {
            let index = table
                .feature_index(feature)
                .ok_or_else(|| ScanError::UnknownFeature(feature.clone()))?;
            if values.is_empty() {
                return Err(ScanError::EmptyConstraint(feature.clone()));
            }
            let column = &table.columns()[index];
            let mut mask = vec![false; column.num_categories()];
            for code in values.iter().filter_map(|value| column.code_of(value)) {
                mask[code as usize] = true;
            }
            selection[index] = Some(mask);
        }
        Ok(selection)
    }

    pub(crate) fn from_selection(table: &FeatureTable, selection: &Selection) -> Self {
        let constraints = table
            .columns()
            .iter()
            .zip(selection)
            .filter_map(|(column, mask)| {
                let mask = mask.as_ref()?;
                let values = mask
                    .iter()
                    .enumerate()
                    .filter(|(_, included)| **included)
                    .map(|(code, _)| column.label(code as u32).to_string())
                    .collect();
                Some((column.name().to_string(), values))
            })
            .collect();
        Self { constraints }
    }
}

impl fmt::Display for Subgroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.constraints.is_empty() {
            return f.write_str("{} (whole dataset)");
        }
        f.write_str("{")?;
        for (idx, (feature, values)) in self.constraints.iter().enumerate() {
            if idx > 0 {
                f.write_str(", ")?;
            }
            let joined: Vec<&str> = values.iter().map(String::as_str).collect();
            write!(f, "{feature}: [{}]", joined.join(", "))?;
        }
        f.write_str("}")
    }
}

/// Parses `feature=value|value;feature=value`. An empty string is the whole
/// dataset.
impl FromStr for Subgroup {
    type Err = SubgroupParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut subgroup = Subgroup::whole();
        for clause in s.split(';').map(str::trim).filter(|c| !c.is_empty()) {
            let (feature, values) = clause
                .split_once('=')
                .ok_or_else(|| SubgroupParseError::MalformedConstraint(clause.to_string()))?;
            let feature = feature.trim();
            let values: BTreeSet<String> = values
                .split('|')
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .collect();
            if feature.is_empty() || values.is_empty() {
                return Err(SubgroupParseError::MalformedConstraint(clause.to_string()));
            }
            if subgroup.constraints.contains_key(feature) {
                return Err(SubgroupParseError::DuplicateFeature(feature.to_string()));
            }
            subgroup.constraints.insert(feature.to_string(), values);
        }
        Ok(subgroup)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> FeatureTable {
        let race = ["a", "b", "c", "a"].map(String::from).to_vec();
        let sex = ["f", "m", "m", "f"].map(String::from).to_vec();
        FeatureTable::from_columns([("race", race), ("sex", sex)]).unwrap()
    }

    #[test]
    fn parse_and_display() {
        let subgroup: Subgroup = "race = b | a ; sex=f".parse().unwrap();
        assert_eq!(subgroup.num_features(), 2);
        assert_eq!(subgroup.num_values(), 3);
        assert_eq!(subgroup.to_string(), "{race: [a, b], sex: [f]}");
        assert_eq!(
            subgroup,
            Subgroup::whole()
                .with("race", ["a", "b"])
                .with("sex", ["f"])
        );

        assert!("".parse::<Subgroup>().unwrap().is_whole());
        assert_eq!(
            "race".parse::<Subgroup>(),
            Err(SubgroupParseError::MalformedConstraint("race".to_string()))
        );
        assert_eq!(
            "race=a;race=b".parse::<Subgroup>(),
            Err(SubgroupParseError::DuplicateFeature("race".to_string()))
        );
    }

    #[test]
    fn resolve_masks_known_values_and_ignores_absent_ones() {
        let table = table();
        let subgroup = Subgroup::whole().with("race", ["c", "zzz"]);
        let selection = subgroup.resolve(&table).unwrap();
        assert_eq!(selection[0], Some(vec![false, false, true]));
        assert_eq!(selection[1], None);

        let back = Subgroup::from_selection(&table, &selection);
        assert_eq!(back, Subgroup::whole().with("race", ["c"]));
    }

    #[test]
    fn resolve_rejects_unknown_features_and_empty_sets() {
        let table = table();
        let unknown = Subgroup::whole().with("age", ["old"]);
        assert!(matches!(
            unknown.resolve(&table),
            Err(ScanError::UnknownFeature(name)) if name == "age"
        ));
        let empty = Subgroup::whole().with("sex", Vec::<String>::new());
        assert!(matches!(
            empty.resolve(&table),
            Err(ScanError::EmptyConstraint(name)) if name == "sex"
        ));
    }
}
