//! Execution data model

pub mod execution;
pub mod parameters;
pub mod status;
pub mod summary;

pub use execution::{JobExecution, StepExecution};
pub use parameters::{JobParameter, JobParameters, JobParametersBuilder, ParameterValue};
pub use status::BatchStatus;
pub use summary::{ExecutionSummary, StepSummary};
