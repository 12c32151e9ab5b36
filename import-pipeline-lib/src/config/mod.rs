mod template;

pub use template::{Template, BASIC_CONFIG, FULL_CONFIG};

use std::collections::HashSet;
use std::io::Read;
use std::path::PathBuf;

use json_comments::StripComments;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::intake::IntakeConfig;
use crate::mapping::DuplicateTargetPolicy;
use crate::steps::{default_steps, StepDescriptor, ANALYZE, COMMIT, MAP, PREVIEW, UPLOAD};
use crate::types::TargetSchema;

pub const DEFAULT_SAMPLE_ROWS: usize = 5;
pub const DEFAULT_PREVIEW_ROWS: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldDefinition {
    pub id: String,
    #[serde(default)]
    pub description: String,
    /// Alternative column headers that should map to this field
    #[serde(default)]
    pub aliases: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EntityDefinition {
    pub entity_type: String,
    pub fields: Vec<FieldDefinition>,
}

impl EntityDefinition {
    pub fn target_schema(&self) -> TargetSchema {
        self.fields
            .iter()
            .map(|f| (f.id.clone(), f.description.clone()))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct PipelineConfig {
    pub intake: IntakeConfig,
    pub steps: Vec<StepDescriptor>,
    pub duplicate_targets: DuplicateTargetPolicy,
    pub entities: Vec<EntityDefinition>,
    /// Force every analysis to this entity instead of picking the best match
    pub entity_type: Option<String>,
    pub sample_rows: usize,
    pub preview_rows: usize,
    pub output_dir: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            intake: IntakeConfig::default(),
            steps: default_steps(),
            duplicate_targets: DuplicateTargetPolicy::default(),
            entities: Vec::new(),
            entity_type: None,
            sample_rows: DEFAULT_SAMPLE_ROWS,
            preview_rows: DEFAULT_PREVIEW_ROWS,
            output_dir: None,
        }
    }
}

impl PipelineConfig {
    pub fn from_file<P: Into<PathBuf>>(path: P) -> Result<Self, PipelineError> {
        let path = path.into();
        tracing::info!("Loading pipeline config from {:?}", path);
        let file = std::fs::File::open(&path)?;
        let config = Self::from_reader(file)?;
        tracing::info!("Successfully loaded pipeline config: {}", path.display());
        Ok(config)
    }

    /// Parse JSON, allowing `//` and `/* */` comments.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, PipelineError> {
        Ok(serde_json::from_reader(StripComments::new(reader))?)
    }

    pub fn from_jsonc(contents: &str) -> Result<Self, PipelineError> {
        Self::from_reader(contents.as_bytes())
    }

    pub fn entity(&self, entity_type: &str) -> Option<&EntityDefinition> {
        self.entities.iter().find(|e| e.entity_type == entity_type)
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        tracing::info!("Validating pipeline config...");

        self.intake.validate()?;
        self.validate_steps()?;

        let mut entity_types = HashSet::new();
        for entity in &self.entities {
            if !entity_types.insert(entity.entity_type.as_str()) {
                tracing::error!("Duplicate entity type: {}", entity.entity_type);
                return Err(PipelineError::InvalidConfig(format!(
                    "Entity type '{}' is defined more than once",
                    entity.entity_type
                )));
            }
            if entity.fields.is_empty() {
                return Err(PipelineError::InvalidConfig(format!(
                    "Entity '{}' must define at least one field",
                    entity.entity_type
                )));
            }
            let mut field_ids = HashSet::new();
            for field in &entity.fields {
                if !field_ids.insert(field.id.as_str()) {
                    return Err(PipelineError::InvalidConfig(format!(
                        "Field '{}' is defined more than once in entity '{}'",
                        field.id, entity.entity_type
                    )));
                }
            }
        }

        if let Some(entity_type) = &self.entity_type {
            if self.entity(entity_type).is_none() {
                return Err(PipelineError::InvalidConfig(format!(
                    "entity_type '{}' does not match any configured entity",
                    entity_type
                )));
            }
        }

        if self.preview_rows == 0 {
            return Err(PipelineError::InvalidConfig(
                "preview_rows must be greater than zero".into(),
            ));
        }

        tracing::info!("Pipeline config validation successful");
        Ok(())
    }

    fn validate_steps(&self) -> Result<(), PipelineError> {
        let mut keys = HashSet::new();
        for step in &self.steps {
            if step.key.is_empty() {
                return Err(PipelineError::InvalidConfig("Step keys must not be empty".into()));
            }
            if !keys.insert(step.key.as_str()) {
                tracing::error!("Duplicate step key: {}", step.key);
                return Err(PipelineError::InvalidConfig(format!(
                    "Step '{}' appears more than once",
                    step.key
                )));
            }
        }

        let position = |key: &str| self.steps.iter().position(|s| s.key == key);
        let mut previous: Option<(usize, &str)> = None;
        for key in [UPLOAD, MAP, PREVIEW, COMMIT] {
            let index = position(key).ok_or_else(|| {
                PipelineError::InvalidConfig(format!("The step list must include '{}'", key))
            })?;
            if let Some((prev_index, prev_key)) = previous {
                if index < prev_index {
                    return Err(PipelineError::InvalidConfig(format!(
                        "Step '{}' must come after '{}'",
                        key, prev_key
                    )));
                }
            }
            previous = Some((index, key));
        }

        // Analysis runs on the way from upload to map, so its step must sit between them
        if let (Some(analyze), Some(upload), Some(map)) =
            (position(ANALYZE), position(UPLOAD), position(MAP))
        {
            if analyze < upload || analyze > map {
                return Err(PipelineError::InvalidConfig(format!(
                    "Step '{}' must come after '{}' and before '{}'",
                    ANALYZE, UPLOAD, MAP
                )));
            }
        }

        if self.steps.last().map(|s| s.key.as_str()) != Some(COMMIT) {
            return Err(PipelineError::InvalidConfig(format!(
                "'{}' must be the last step",
                COMMIT
            )));
        }
        Ok(())
    }
}
