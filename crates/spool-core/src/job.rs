//! Job definitions

use std::collections::HashSet;
use std::sync::Arc;

use crate::error::{BatchError, BatchResult};
use crate::model::JobParameters;
use crate::step::Step;

/// Named, ordered sequence of steps
#[derive(Clone)]
pub struct JobDefinition {
    name: String,
    steps: Vec<Arc<dyn Step>>,
    required_parameters: Vec<String>,
}

impl JobDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
            required_parameters: Vec::new(),
        }
    }

    /// Append a step; steps run in insertion order
    pub fn step(mut self, step: impl Step + 'static) -> Self {
        self.steps.push(Arc::new(step));
        self
    }

    /// Parameters every launch must supply
    pub fn with_required_parameters<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_parameters
            .extend(names.into_iter().map(Into::into));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn steps(&self) -> &[Arc<dyn Step>] {
        &self.steps
    }

    /// Structural checks: a name, at least one step, unique step names
    pub fn validate(&self) -> BatchResult<()> {
        if self.name.trim().is_empty() {
            return Err(BatchError::InvalidDefinition("job name is empty".to_string()));
        }
        if self.steps.is_empty() {
            return Err(BatchError::InvalidDefinition(format!(
                "job '{}' has no steps",
                self.name
            )));
        }

        let mut seen = HashSet::new();
        for step in &self.steps {
            if !seen.insert(step.name()) {
                return Err(BatchError::InvalidDefinition(format!(
                    "job '{}' has more than one step named '{}'",
                    self.name,
                    step.name()
                )));
            }
        }
        Ok(())
    }

    /// Every required parameter is present
    pub fn check_parameters(&self, parameters: &JobParameters) -> BatchResult<()> {
        let missing: Vec<&str> = self
            .required_parameters
            .iter()
            .filter(|name| !parameters.contains(name))
            .map(String::as_str)
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(BatchError::InvalidParameters(format!(
                "job '{}' requires parameters: {}",
                self.name,
                missing.join(", ")
            )))
        }
    }
}
