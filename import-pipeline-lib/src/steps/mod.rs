//! Linear step model for the import wizard.

mod view;

pub use view::{StepIndicator, StepStatus, StepperView};

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::utils::to_title_case;

pub const UPLOAD: &str = "upload";
pub const ANALYZE: &str = "analyze";
pub const MAP: &str = "map";
pub const PREVIEW: &str = "preview";
pub const COMMIT: &str = "commit";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StepDescriptor {
    pub key: String,
    #[serde(default)]
    pub label: String,
}

impl StepDescriptor {
    pub fn new(key: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            label: label.into(),
        }
    }

    /// Label to show; falls back to the key in title case.
    pub fn display_label(&self) -> String {
        if self.label.is_empty() {
            to_title_case(&self.key)
        } else {
            self.label.clone()
        }
    }
}

pub fn default_steps() -> Vec<StepDescriptor> {
    vec![
        StepDescriptor::new(UPLOAD, "Upload"),
        StepDescriptor::new(ANALYZE, "Analyze"),
        StepDescriptor::new(MAP, "Map Columns"),
        StepDescriptor::new(PREVIEW, "Preview"),
        StepDescriptor::new(COMMIT, "Import"),
    ]
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepState {
    steps: Vec<StepDescriptor>,
    current: usize,
}

impl StepState {
    pub fn new(steps: Vec<StepDescriptor>) -> Result<Self, PipelineError> {
        if steps.is_empty() {
            return Err(PipelineError::InvalidConfig(
                "The step list must contain at least one step".into(),
            ));
        }
        Ok(Self { steps, current: 0 })
    }

    pub fn steps(&self) -> &[StepDescriptor] {
        &self.steps
    }

    pub fn index(&self) -> usize {
        self.current
    }

    pub fn current(&self) -> &StepDescriptor {
        &self.steps[self.current]
    }

    pub fn current_key(&self) -> &str {
        &self.current().key
    }

    pub fn position_of(&self, key: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.key == key)
    }

    pub fn is_initial(&self) -> bool {
        self.current == 0
    }

    pub fn is_terminal(&self) -> bool {
        self.current + 1 == self.steps.len()
    }

    /// Move exactly one step forward. `exit_criteria_met` is the caller's
    /// verdict on whether the current step may be left.
    pub fn advance(&mut self, exit_criteria_met: bool) -> Result<&StepDescriptor, PipelineError> {
        if self.is_terminal() {
            return Err(PipelineError::Terminal);
        }
        if !exit_criteria_met {
            return Err(PipelineError::NotAllowed(format!(
                "Step '{}' is not complete",
                self.current_key()
            )));
        }
        self.current += 1;
        tracing::debug!("Advanced to step '{}'", self.current_key());
        Ok(self.current())
    }

    pub fn retreat(&mut self) -> Result<&StepDescriptor, PipelineError> {
        if self.is_initial() {
            return Err(PipelineError::NotAllowed(format!(
                "Cannot go back from the first step '{}'",
                self.current_key()
            )));
        }
        self.current -= 1;
        tracing::debug!("Retreated to step '{}'", self.current_key());
        Ok(self.current())
    }

    pub fn reset(&mut self) {
        self.current = 0;
    }
}
