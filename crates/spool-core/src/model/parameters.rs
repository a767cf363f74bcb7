//! Job parameters and the identity model
//!
//! A launch request carries named, typed parameters. Parameters flagged as
//! identifying decide whether two requests are the same logical execution:
//! the identifying subset is reduced to a stable `job_key` (SHA-256 over a
//! canonical rendering), which the repository indexes together with the job
//! name. Non-identifying parameters may change between otherwise identical
//! launches.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{BatchError, BatchResult};

/// Typed parameter value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum ParameterValue {
    String(String),
    Long(i64),
    Double(f64),
    Date(NaiveDate),
}

impl ParameterValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            ParameterValue::String(_) => "string",
            ParameterValue::Long(_) => "long",
            ParameterValue::Double(_) => "double",
            ParameterValue::Date(_) => "date",
        }
    }

    /// Parse a raw value of the named type (`string`, `long`, `double`, `date`)
    pub fn parse(type_name: &str, raw: &str) -> BatchResult<Self> {
        let invalid = |reason: String| {
            BatchError::InvalidParameters(format!(
                "cannot parse '{}' as {}: {}",
                raw, type_name, reason
            ))
        };

        match type_name.to_lowercase().as_str() {
            "string" | "str" => Ok(ParameterValue::String(raw.to_string())),
            "long" | "int" | "integer" => raw
                .trim()
                .parse()
                .map(ParameterValue::Long)
                .map_err(|e| invalid(e.to_string())),
            "double" | "float" | "number" => raw
                .trim()
                .parse()
                .map(ParameterValue::Double)
                .map_err(|e| invalid(e.to_string())),
            "date" => NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
                .map(ParameterValue::Date)
                .map_err(|e| invalid(e.to_string())),
            other => Err(BatchError::InvalidParameters(format!(
                "unknown parameter type '{}'",
                other
            ))),
        }
    }

    /// Text form used for storage and identity hashing; `parse` inverts it
    pub fn canonical(&self) -> String {
        match self {
            ParameterValue::String(s) => s.clone(),
            ParameterValue::Long(v) => v.to_string(),
            ParameterValue::Double(v) => v.to_string(),
            ParameterValue::Date(d) => d.format("%Y-%m-%d").to_string(),
        }
    }

    /// JSON rendering for records; dates become ISO strings
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            ParameterValue::String(s) => serde_json::Value::String(s.clone()),
            ParameterValue::Long(v) => serde_json::Value::from(*v),
            ParameterValue::Double(v) => serde_json::Value::from(*v),
            ParameterValue::Date(_) => serde_json::Value::String(self.canonical()),
        }
    }
}

impl fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

impl From<&str> for ParameterValue {
    fn from(value: &str) -> Self {
        ParameterValue::String(value.to_string())
    }
}

impl From<String> for ParameterValue {
    fn from(value: String) -> Self {
        ParameterValue::String(value)
    }
}

impl From<i64> for ParameterValue {
    fn from(value: i64) -> Self {
        ParameterValue::Long(value)
    }
}

impl From<f64> for ParameterValue {
    fn from(value: f64) -> Self {
        ParameterValue::Double(value)
    }
}

impl From<NaiveDate> for ParameterValue {
    fn from(value: NaiveDate) -> Self {
        ParameterValue::Date(value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobParameter {
    pub value: ParameterValue,
    pub identifying: bool,
}

/// Named launch parameters, ordered by name
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobParameters {
    params: BTreeMap<String, JobParameter>,
}

impl JobParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> JobParametersBuilder {
        JobParametersBuilder::default()
    }

    pub fn insert(
        &mut self,
        name: impl Into<String>,
        value: impl Into<ParameterValue>,
        identifying: bool,
    ) {
        self.params.insert(
            name.into(),
            JobParameter {
                value: value.into(),
                identifying,
            },
        );
    }

    pub fn get(&self, name: &str) -> Option<&JobParameter> {
        self.params.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.params.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &JobParameter)> {
        self.params.iter()
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// String parameter; a present value of another type is an error
    pub fn get_string(&self, name: &str) -> BatchResult<Option<&str>> {
        match self.get(name).map(|p| &p.value) {
            None => Ok(None),
            Some(ParameterValue::String(s)) => Ok(Some(s.as_str())),
            Some(other) => Err(type_mismatch(name, "string", other)),
        }
    }

    pub fn get_long(&self, name: &str) -> BatchResult<Option<i64>> {
        match self.get(name).map(|p| &p.value) {
            None => Ok(None),
            Some(ParameterValue::Long(v)) => Ok(Some(*v)),
            Some(other) => Err(type_mismatch(name, "long", other)),
        }
    }

    pub fn get_double(&self, name: &str) -> BatchResult<Option<f64>> {
        match self.get(name).map(|p| &p.value) {
            None => Ok(None),
            Some(ParameterValue::Double(v)) => Ok(Some(*v)),
            Some(ParameterValue::Long(v)) => Ok(Some(*v as f64)),
            Some(other) => Err(type_mismatch(name, "double", other)),
        }
    }

    /// Date parameter; ISO `yyyy-MM-dd` strings are accepted as well
    pub fn get_date(&self, name: &str) -> BatchResult<Option<NaiveDate>> {
        match self.get(name).map(|p| &p.value) {
            None => Ok(None),
            Some(ParameterValue::Date(d)) => Ok(Some(*d)),
            Some(ParameterValue::String(s)) => match ParameterValue::parse("date", s)? {
                ParameterValue::Date(d) => Ok(Some(d)),
                other => Err(type_mismatch(name, "date", &other)),
            },
            Some(other) => Err(type_mismatch(name, "date", other)),
        }
    }

    /// Look up a parameter that must be present
    pub fn require(&self, name: &str) -> BatchResult<&ParameterValue> {
        self.get(name)
            .map(|p| &p.value)
            .ok_or_else(|| BatchError::InvalidParameters(format!("missing parameter '{}'", name)))
    }

    /// The identifying subset
    pub fn identifying(&self) -> JobParameters {
        JobParameters {
            params: self
                .params
                .iter()
                .filter(|(_, p)| p.identifying)
                .map(|(k, p)| (k.clone(), p.clone()))
                .collect(),
        }
    }

    /// Human-readable rendering of the identifying subset, e.g.
    /// `inputFile=customers.csv,runDate=2025-02-05`
    pub fn identity_string(&self) -> String {
        self.params
            .iter()
            .filter(|(_, p)| p.identifying)
            .map(|(name, p)| format!("{}={}", name, p.value))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Stable hex digest of the identifying subset
    ///
    /// Type names take part in the digest, so `long 5` and `string "5"` are
    /// different identities.
    pub fn job_key(&self) -> String {
        let mut hasher = Sha256::new();
        for (name, param) in self.params.iter().filter(|(_, p)| p.identifying) {
            hasher.update(name.as_bytes());
            hasher.update([0u8]);
            hasher.update(param.value.type_name().as_bytes());
            hasher.update([0u8]);
            hasher.update(param.value.canonical().as_bytes());
            hasher.update([0xffu8]);
        }
        hex::encode(hasher.finalize())
    }

    /// Same logical execution request as `other`
    pub fn same_identity(&self, other: &JobParameters) -> bool {
        self.identifying() == other.identifying()
    }
}

fn type_mismatch(name: &str, expected: &str, actual: &ParameterValue) -> BatchError {
    BatchError::InvalidParameters(format!(
        "parameter '{}' should be {} but is {} ('{}')",
        name,
        expected,
        actual.type_name(),
        actual
    ))
}

/// Fluent construction of [`JobParameters`]
#[derive(Debug, Default)]
pub struct JobParametersBuilder {
    params: JobParameters,
}

impl JobParametersBuilder {
    pub fn add(
        mut self,
        name: impl Into<String>,
        value: impl Into<ParameterValue>,
        identifying: bool,
    ) -> Self {
        self.params.insert(name, value, identifying);
        self
    }

    pub fn add_string(self, name: impl Into<String>, value: impl Into<String>, identifying: bool) -> Self {
        self.add(name, ParameterValue::String(value.into()), identifying)
    }

    pub fn add_long(self, name: impl Into<String>, value: i64, identifying: bool) -> Self {
        self.add(name, ParameterValue::Long(value), identifying)
    }

    pub fn add_double(self, name: impl Into<String>, value: f64, identifying: bool) -> Self {
        self.add(name, ParameterValue::Double(value), identifying)
    }

    pub fn add_date(self, name: impl Into<String>, value: NaiveDate, identifying: bool) -> Self {
        self.add(name, ParameterValue::Date(value), identifying)
    }

    pub fn build(self) -> JobParameters {
        self.params
    }
}
