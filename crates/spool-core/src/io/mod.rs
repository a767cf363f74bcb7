//! Ready-made sources, transforms and sinks

pub mod csv_source;
pub mod memory;
pub mod stamp;
pub mod table_sink;

pub use csv_source::{CsvItemSource, CsvSourceConfig, Encoding};
pub use memory::{IterSource, VecSink};
pub use stamp::{JsonRecord, StampTransform, TextRecord};
pub use table_sink::{ColumnMapping, PgTableSink};
