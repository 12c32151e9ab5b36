use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::MappingError;
use crate::types::{AnalysisResult, TargetSchema};

/// Source column → target field (or unset), in source column order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ColumnMapping(IndexMap<String, Option<String>>);

impl ColumnMapping {
    pub fn get(&self, column: &str) -> Option<&str> {
        self.0.get(column).and_then(|t| t.as_deref())
    }

    pub fn contains_column(&self, column: &str) -> bool {
        self.0.contains_key(column)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.0.iter().map(|(c, t)| (c.as_str(), t.as_deref()))
    }

    /// Only the columns that have a target.
    pub fn mapped(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0
            .iter()
            .filter_map(|(c, t)| t.as_deref().map(|t| (c.as_str(), t)))
    }

    pub fn mapped_count(&self) -> usize {
        self.0.values().filter(|t| t.is_some()).count()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, Option<String>)> for ColumnMapping {
    fn from_iter<I: IntoIterator<Item = (String, Option<String>)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Whether two source columns may feed the same target field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateTargetPolicy {
    #[default]
    Allow,
    Reject,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MappingEditor {
    policy: DuplicateTargetPolicy,
}

impl MappingEditor {
    pub fn new(policy: DuplicateTargetPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> DuplicateTargetPolicy {
        self.policy
    }

    /// One entry per source column, pre-filled with the proposed target when
    /// the proposal names a field of the target schema.
    pub fn seed(&self, analysis: &AnalysisResult) -> ColumnMapping {
        let entries = analysis
            .source_columns
            .iter()
            .map(|column| {
                let proposed = analysis
                    .suggested_mapping
                    .get(column)
                    .filter(|target| {
                        let known = analysis.target_schema.contains_key(*target);
                        if !known {
                            tracing::debug!(
                                "Ignoring proposed target '{}' for column '{}': not in schema",
                                target,
                                column
                            );
                        }
                        known
                    })
                    .cloned();
                (column.clone(), proposed)
            })
            .collect();
        let mapping = ColumnMapping(entries);
        tracing::debug!(
            "Seeded mapping for {} column(s), {} proposed",
            mapping.len(),
            mapping.mapped_count()
        );
        mapping
    }

    /// Return `current` with `column` reassigned to `target` (or unset).
    pub fn set_mapping(
        &self,
        current: &ColumnMapping,
        schema: &TargetSchema,
        column: &str,
        target: Option<&str>,
    ) -> Result<ColumnMapping, MappingError> {
        if !current.contains_column(column) {
            return Err(MappingError::UnknownColumn(column.to_string()));
        }
        if let Some(target) = target {
            if !schema.contains_key(target) {
                return Err(MappingError::UnknownTarget(target.to_string()));
            }
            if self.policy == DuplicateTargetPolicy::Reject {
                if let Some((other, _)) = current
                    .mapped()
                    .find(|(other, t)| *t == target && *other != column)
                {
                    return Err(MappingError::DuplicateTarget {
                        target: target.to_string(),
                        column: other.to_string(),
                    });
                }
            }
        }

        let mut next = current.clone();
        if let Some(slot) = next.0.get_mut(column) {
            *slot = target.map(str::to_string);
        }
        Ok(next)
    }

    pub fn mapped_count(mapping: &ColumnMapping) -> usize {
        mapping.mapped_count()
    }

    /// Targets claimed by more than one source column, with those columns.
    pub fn duplicate_targets(mapping: &ColumnMapping) -> Vec<(String, Vec<String>)> {
        let mut by_target: IndexMap<&str, Vec<String>> = IndexMap::new();
        for (column, target) in mapping.mapped() {
            by_target.entry(target).or_default().push(column.to_string());
        }
        by_target
            .into_iter()
            .filter(|(_, columns)| columns.len() > 1)
            .map(|(target, columns)| (target.to_string(), columns))
            .collect()
    }

    pub fn unmapped_columns(mapping: &ColumnMapping) -> Vec<String> {
        mapping
            .iter()
            .filter(|(_, target)| target.is_none())
            .map(|(column, _)| column.to_string())
            .collect()
    }
}
