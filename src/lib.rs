//! Billing Filter Processor
//!
//! A record processor that reads delimited call detail records, keeps only
//! off-network billed records (`chargingCharacteristics = "400"` and
//! `billing = "Y"`), rewrites their `recordStartTime` from
//! `yy-MM-dd HH:mm:ss` to `yyyyMMddHHmmss`, and writes them back out through
//! a configurable record writer.
//!
//! # Features
//!
//! - **Pluggable Codecs**: Readers and writers are named services resolved at start-up
//! - **Schema Access**: Inline schema text, named schemas, or inherit the input schema
//! - **All-or-Nothing Cycles**: A flow unit either succeeds as a whole or is routed to failure untouched
//! - **Directory Runtime**: Polls an input directory with bounded concurrent cycles
//!
//! # Example Configuration
//!
//! ```toml
//! processor_name = "billing-filter"
//! record_reader = "cdr-reader"
//! record_writer = "cdr-writer"
//!
//! [runtime]
//! input_dir = "data/in"
//! success_dir = "data/success"
//! failure_dir = "data/failure"
//! max_concurrent_cycles = 4
//!
//! [[services]]
//! type = "csv-reader"
//! name = "cdr-reader"
//! schema_file = "config/schemas/cdr_in.avsc"
//! value_separator = "|"
//!
//! [[services]]
//! type = "csv-writer"
//! name = "cdr-writer"
//! schema_file = "config/schemas/cdr_out.avsc"
//! schema_write_strategy = "full-schema-attribute"
//! ```

pub mod config;
pub mod delimited;
pub mod error;
pub mod flow;
pub mod processor;
pub mod record;
pub mod registry;
pub mod rule;
pub mod runtime;
pub mod serialization;

pub use config::ProcessorConfig;
pub use error::{ProcessError, ProcessResult};
pub use flow::{FlowUnit, ProcessSession, Relationship};
pub use processor::{CycleReport, CycleState, RecordTransformProcessor};
pub use registry::ServiceRegistry;
pub use runtime::FlowRuntime;
