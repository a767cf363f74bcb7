//! Delimited file source
//!
//! Reads records with the `csv` crate, names the columns from the configured
//! field list (the header line, if any, is skipped rather than trusted) and
//! deserializes each row into `T`.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use csv::{ByteRecord, StringRecord};
use serde::de::DeserializeOwned;
use std::fs::File;
use std::io::BufReader;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;

use crate::item::ItemSource;
use spool_common::SpoolError;

/// Character encoding of the input file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Encoding {
    #[default]
    Utf8,
    /// ISO-8859-1
    Latin1,
}

impl Encoding {
    fn decode(&self, bytes: &[u8]) -> Result<String> {
        match self {
            Encoding::Utf8 => String::from_utf8(bytes.to_vec()).context("invalid UTF-8"),
            Encoding::Latin1 => Ok(bytes.iter().map(|&b| b as char).collect()),
        }
    }
}

impl FromStr for Encoding {
    type Err = SpoolError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "utf-8" | "utf8" => Ok(Encoding::Utf8),
            "latin-1" | "latin1" | "iso-8859-1" => Ok(Encoding::Latin1),
            other => Err(SpoolError::parse(format!("unsupported encoding '{}'", other))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CsvSourceConfig {
    pub path: PathBuf,
    /// Column names in file order
    pub field_names: Vec<String>,
    /// Leading records to ignore (typically 1 for a header line)
    pub skip_lines: usize,
    pub delimiter: u8,
    pub encoding: Encoding,
}

impl CsvSourceConfig {
    pub fn new(path: impl Into<PathBuf>, field_names: Vec<String>) -> Self {
        Self {
            path: path.into(),
            field_names,
            skip_lines: 1,
            delimiter: b',',
            encoding: Encoding::Utf8,
        }
    }

    pub fn skip_lines(mut self, skip_lines: usize) -> Self {
        self.skip_lines = skip_lines;
        self
    }

    pub fn delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }
}

/// Streams rows of a delimited file as `T`
pub struct CsvItemSource<T> {
    config: CsvSourceConfig,
    headers: StringRecord,
    reader: Option<csv::Reader<BufReader<File>>>,
    record: ByteRecord,
    _record: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> CsvItemSource<T> {
    pub fn new(config: CsvSourceConfig) -> Self {
        let headers = StringRecord::from(config.field_names.clone());
        Self {
            config,
            headers,
            reader: None,
            record: ByteRecord::new(),
            _record: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Next raw record; `false` at end of file
    fn advance(&mut self) -> Result<bool> {
        let reader = self
            .reader
            .as_mut()
            .ok_or_else(|| anyhow!("source {} is not open", self.config.path.display()))?;
        reader
            .read_byte_record(&mut self.record)
            .with_context(|| format!("Failed to read {}", self.config.path.display()))
    }

    fn line(&self) -> u64 {
        self.record.position().map(|p| p.line()).unwrap_or(0)
    }

    fn decode(&self) -> Result<T> {
        let line = self.line();
        if self.record.len() != self.headers.len() {
            bail!(
                "{} line {}: expected {} fields but found {}",
                self.config.path.display(),
                line,
                self.headers.len(),
                self.record.len()
            );
        }

        let mut fields = StringRecord::with_capacity(self.record.as_slice().len(), self.record.len());
        for field in self.record.iter() {
            let text = self
                .config
                .encoding
                .decode(field)
                .with_context(|| format!("{} line {}", self.config.path.display(), line))?;
            fields.push_field(&text);
        }

        fields
            .deserialize(Some(&self.headers))
            .with_context(|| format!("{} line {}: malformed record", self.config.path.display(), line))
    }
}

#[async_trait]
impl<T: DeserializeOwned + Send> ItemSource<T> for CsvItemSource<T> {
    async fn open(&mut self, start_at: u64) -> Result<()> {
        let file = File::open(&self.config.path)
            .with_context(|| format!("Failed to open {}", self.config.path.display()))?;

        self.reader = Some(
            csv::ReaderBuilder::new()
                .has_headers(false)
                .flexible(true)
                .delimiter(self.config.delimiter)
                .from_reader(BufReader::new(file)),
        );

        let skip = self.config.skip_lines as u64 + start_at;
        for skipped in 0..skip {
            if !self.advance()? {
                debug!(path = %self.config.path.display(), skipped, "Source exhausted while skipping");
                break;
            }
        }

        debug!(
            path = %self.config.path.display(),
            skip_lines = self.config.skip_lines,
            start_at,
            "Opened CSV source"
        );
        Ok(())
    }

    async fn read(&mut self) -> Result<Option<T>> {
        if !self.advance()? {
            return Ok(None);
        }
        self.decode().map(Some)
    }

    async fn close(&mut self) -> Result<()> {
        self.reader = None;
        Ok(())
    }
}
