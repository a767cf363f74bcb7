//! Parsing of the `name=value` style flags taken by `spool import`

use spool_core::io::{ColumnMapping, Encoding};
use spool_core::{JobParameters, ParameterValue};
use std::collections::HashMap;

use crate::error::{CliError, Result};

/// Split `key=value`, trimming both sides
fn split_pair<'a>(flag: &'static str, raw: &'a str) -> Result<(&'a str, &'a str)> {
    let (key, value) = raw.split_once('=').ok_or_else(|| {
        CliError::invalid_argument(flag, format!("expected key=value, got '{}'", raw))
    })?;
    let key = key.trim();
    if key.is_empty() {
        return Err(CliError::invalid_argument(flag, format!("missing key in '{}'", raw)));
    }
    Ok((key, value.trim()))
}

/// Parse `name=value` or `name(type)=value` into a typed parameter
pub fn parse_parameter(flag: &'static str, raw: &str) -> Result<(String, ParameterValue)> {
    let (key, value) = split_pair(flag, raw)?;

    let (name, type_name) = match key.split_once('(') {
        Some((name, rest)) => {
            let type_name = rest.strip_suffix(')').ok_or_else(|| {
                CliError::invalid_argument(flag, format!("unclosed type in '{}'", key))
            })?;
            (name.trim(), type_name.trim())
        },
        None => (key, "string"),
    };
    if name.is_empty() {
        return Err(CliError::invalid_argument(flag, format!("missing name in '{}'", raw)));
    }

    let value = ParameterValue::parse(type_name, value)
        .map_err(|e| CliError::invalid_argument(flag, e.to_string()))?;
    Ok((name.to_string(), value))
}

/// Build the launch parameters; `inputFile` is always identifying
pub fn job_parameters(
    input_file: &str,
    params: &[String],
    meta_params: &[String],
) -> Result<JobParameters> {
    let mut parameters = JobParameters::new();
    for raw in meta_params {
        let (name, value) = parse_parameter("--meta-param", raw)?;
        parameters.insert(name, value, false);
    }
    for raw in params {
        let (name, value) = parse_parameter("--param", raw)?;
        parameters.insert(name, value, true);
    }
    parameters.insert("inputFile", input_file, true);
    Ok(parameters)
}

/// Column mappings for `fields`, applying `--columns` renames and `--cast`
/// types (keyed by column name)
pub fn column_mappings(
    fields: &[String],
    renames: &[String],
    casts: &[String],
    stamps: &[(String, String)],
) -> Result<Vec<ColumnMapping>> {
    let renames: HashMap<&str, &str> = renames
        .iter()
        .map(|raw| split_pair("--columns", raw))
        .collect::<Result<_>>()?;
    let casts: HashMap<&str, &str> = casts
        .iter()
        .map(|raw| split_pair("--cast", raw))
        .collect::<Result<_>>()?;

    let mut mappings = Vec::new();
    let stamped = stamps.iter().map(|(field, _)| field);
    for field in fields.iter().chain(stamped) {
        let field = field.trim();
        if field.is_empty() {
            return Err(CliError::invalid_argument("--fields", "empty field name"));
        }
        let column = renames.get(field).copied().unwrap_or(field);
        let mut mapping = ColumnMapping::new(field, column);
        if let Some(cast) = casts.get(column) {
            mapping = mapping.cast(*cast);
        }
        mappings.push(mapping);
    }

    for field in renames.keys() {
        if !mappings.iter().any(|m| m.field == *field) {
            return Err(CliError::invalid_argument(
                "--columns",
                format!("'{}' is not one of the imported fields", field),
            ));
        }
    }
    for column in casts.keys() {
        if !mappings.iter().any(|m| m.column == *column) {
            return Err(CliError::invalid_argument(
                "--cast",
                format!("'{}' is not one of the target columns", column),
            ));
        }
    }

    Ok(mappings)
}

/// `field=parameter` pairs for the stamp transform
pub fn stamps(raw: &[String]) -> Result<Vec<(String, String)>> {
    raw.iter()
        .map(|s| split_pair("--stamp", s).map(|(f, p)| (f.to_string(), p.to_string())))
        .collect()
}

pub fn delimiter(raw: &str) -> Result<u8> {
    let unescaped = match raw {
        "\\t" | "tab" => "\t",
        other => other,
    };
    match unescaped.as_bytes() {
        [byte] => Ok(*byte),
        _ => Err(CliError::invalid_argument(
            "--delimiter",
            format!("must be a single byte, got '{}'", raw),
        )),
    }
}

pub fn encoding(raw: &str) -> Result<Encoding> {
    raw.parse::<Encoding>()
        .map_err(|e| CliError::invalid_argument("--encoding", e.to_string()))
}
