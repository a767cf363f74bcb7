//! Parameter stamping transform
//!
//! Copies a string record into a JSON object and adds constant fields taken
//! from the job parameters, e.g. tagging every staged row with the run date.

use anyhow::Result;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::error::{BatchError, BatchResult};
use crate::item::{ItemTransform, Transformed};
use crate::model::JobParameters;

/// Input record: field name → raw text
pub type TextRecord = BTreeMap<String, String>;

/// Output record handed to the sink
pub type JsonRecord = Map<String, Value>;

#[derive(Debug, Clone)]
pub struct StampTransform {
    stamps: Vec<(String, Value)>,
    skip_blank: Option<String>,
}

impl StampTransform {
    /// Resolve `(field, parameter)` pairs against `parameters`
    ///
    /// Every referenced parameter must be present.
    pub fn resolve<S: AsRef<str>>(
        parameters: &JobParameters,
        stamps: &[(S, S)],
    ) -> BatchResult<Self> {
        let mut resolved = Vec::with_capacity(stamps.len());
        for (field, parameter) in stamps {
            let value = parameters.require(parameter.as_ref()).map_err(|_| {
                BatchError::InvalidParameters(format!(
                    "field '{}' is stamped from parameter '{}', which was not supplied",
                    field.as_ref(),
                    parameter.as_ref()
                ))
            })?;
            resolved.push((field.as_ref().to_string(), value.to_json()));
        }

        Ok(Self {
            stamps: resolved,
            skip_blank: None,
        })
    }

    /// Skip records whose `field` is missing or blank
    pub fn skip_blank(mut self, field: impl Into<String>) -> Self {
        self.skip_blank = Some(field.into());
        self
    }
}

impl ItemTransform<TextRecord, JsonRecord> for StampTransform {
    fn transform(&self, item: TextRecord) -> Result<Transformed<JsonRecord>> {
        if let Some(field) = &self.skip_blank {
            if item.get(field).map_or(true, |v| v.trim().is_empty()) {
                return Ok(Transformed::Skip);
            }
        }

        let mut record: JsonRecord = item
            .into_iter()
            .map(|(k, v)| (k, Value::String(v)))
            .collect();
        for (field, value) in &self.stamps {
            record.insert(field.clone(), value.clone());
        }
        Ok(Transformed::Item(record))
    }
}
