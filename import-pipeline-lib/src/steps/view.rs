use std::fmt;

use serde::Serialize;

use super::StepState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Completed,
    Active,
    Pending,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepIndicator {
    pub key: String,
    pub label: String,
    pub status: StepStatus,
}

/// Read-only rendering of a [`StepState`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepperView {
    pub indicators: Vec<StepIndicator>,
}

impl StepperView {
    pub fn render(state: &StepState) -> Self {
        let indicators = state
            .steps()
            .iter()
            .enumerate()
            .map(|(i, step)| {
                let status = if i < state.index() {
                    StepStatus::Completed
                } else if i == state.index() {
                    StepStatus::Active
                } else {
                    StepStatus::Pending
                };
                StepIndicator {
                    key: step.key.clone(),
                    label: step.display_label(),
                    status,
                }
            })
            .collect();
        Self { indicators }
    }
}

impl fmt::Display for StepperView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, indicator) in self.indicators.iter().enumerate() {
            if i > 0 {
                write!(f, " › ")?;
            }
            let marker = match indicator.status {
                StepStatus::Completed => '✓',
                StepStatus::Active => '●',
                StepStatus::Pending => '○',
            };
            write!(f, "{} {}", marker, indicator.label)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steps::default_steps;

    #[test]
    fn test_render_marks_progress() {
        let mut state = StepState::new(default_steps()).unwrap();
        state.advance(true).unwrap();
        state.advance(true).unwrap();

        let view = StepperView::render(&state);
        let statuses: Vec<_> = view.indicators.iter().map(|i| i.status).collect();
        assert_eq!(
            statuses,
            vec![
                StepStatus::Completed,
                StepStatus::Completed,
                StepStatus::Active,
                StepStatus::Pending,
                StepStatus::Pending,
            ]
        );
        assert_eq!(
            view.to_string(),
            "✓ Upload › ✓ Analyze › ● Map Columns › ○ Preview › ○ Import"
        );
    }
}
