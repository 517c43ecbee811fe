//! Record source and sink contracts
//!
//! The processor never touches a codec directly. It asks a
//! [`RecordReaderFactory`] for a [`RecordReader`] over the flow unit payload,
//! and a [`RecordSetWriterFactory`] for the output schema and a
//! [`RecordSetWriter`] over the output buffer. Factories are resolved once at
//! start-up and shared across concurrent cycles, so they must be `Send + Sync`.

use crate::error::{ProcessError, ProcessResult};
use crate::flow::Attributes;
use crate::record::{Record, Schema};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::Arc;

/// Attribute carrying the number of records written
pub const RECORD_COUNT_ATTRIBUTE: &str = "record.count";

/// Attribute carrying the MIME type of the written content
pub const MIME_TYPE_ATTRIBUTE: &str = "mime.type";

/// Attribute naming the schema of the content
pub const SCHEMA_NAME_ATTRIBUTE: &str = "schema.name";

/// Attribute carrying the full schema text of the content
pub const AVRO_SCHEMA_ATTRIBUTE: &str = "avro.schema";

/// Pull-based record source over one byte stream
///
/// A reader owns its input stream; `close` releases it. Readers must also
/// release the stream when dropped without `close`.
#[cfg_attr(test, mockall::automock)]
pub trait RecordReader: Send {
    /// Schema every record from this reader conforms to
    fn schema(&self) -> Arc<Schema>;

    /// Next record, or `None` at end of stream
    fn next_record(&mut self) -> ProcessResult<Option<Record>>;

    fn close(&mut self) -> ProcessResult<()>;
}

/// Builds record readers for flow unit payloads
#[cfg_attr(test, mockall::automock)]
pub trait RecordReaderFactory: Send + Sync {
    fn create_reader(
        &self,
        attributes: &Attributes,
        input: Box<dyn Read + Send>,
    ) -> ProcessResult<Box<dyn RecordReader>>;
}

/// Serializes a set of records to an output stream
pub trait RecordSetWriter {
    fn begin_record_set(&mut self) -> ProcessResult<()>;

    fn write(&mut self, record: &Record) -> ProcessResult<()>;

    /// Flush the record set and report what was written
    fn finish_record_set(&mut self) -> ProcessResult<WriteResult>;

    fn close(&mut self) -> ProcessResult<()>;
}

/// Negotiates output schemas and builds record set writers
pub trait RecordSetWriterFactory: Send + Sync {
    /// Output schema for content read with `input_schema`
    fn get_schema(
        &self,
        attributes: &Attributes,
        input_schema: &Arc<Schema>,
    ) -> ProcessResult<Arc<Schema>>;

    fn create_writer<'a>(
        &self,
        schema: Arc<Schema>,
        out: &'a mut dyn Write,
    ) -> ProcessResult<Box<dyn RecordSetWriter + 'a>>;
}

/// Outcome of a finished record set
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteResult {
    pub record_count: u64,
    /// Sink-contributed attributes (encoding metadata and the like)
    pub attributes: Attributes,
}

impl WriteResult {
    pub fn new(record_count: u64, attributes: Attributes) -> Self {
        Self {
            record_count,
            attributes,
        }
    }
}

/// Where a reader or writer gets its schema from
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum SchemaAccessStrategy {
    /// Schema text configured on the service
    SchemaTextProperty,
    /// Schema looked up by the flow unit's `schema.name` attribute
    SchemaNameProperty,
    /// Reuse the schema the records were read with (writers only)
    InheritRecordSchema,
}

impl Default for SchemaAccessStrategy {
    fn default() -> Self {
        SchemaAccessStrategy::SchemaTextProperty
    }
}

/// Named schemas available to the `schema-name-property` strategy
pub type SchemaRegistry = HashMap<String, Arc<Schema>>;

/// Resolves a schema according to a [`SchemaAccessStrategy`]
#[derive(Debug, Clone)]
pub struct SchemaResolver {
    strategy: SchemaAccessStrategy,
    schema_text: Option<Arc<Schema>>,
    registry: Arc<SchemaRegistry>,
}

impl SchemaResolver {
    pub fn new(
        strategy: SchemaAccessStrategy,
        schema_text: Option<Arc<Schema>>,
        registry: Arc<SchemaRegistry>,
    ) -> Self {
        Self {
            strategy,
            schema_text,
            registry,
        }
    }

    /// Resolve the schema for a flow unit
    ///
    /// `inherited` is the schema the records were read with, if any.
    pub fn resolve(
        &self,
        attributes: &Attributes,
        inherited: Option<&Arc<Schema>>,
    ) -> ProcessResult<Arc<Schema>> {
        match self.strategy {
            SchemaAccessStrategy::SchemaTextProperty => self
                .schema_text
                .clone()
                .ok_or_else(|| ProcessError::schema("No schema text configured")),
            SchemaAccessStrategy::SchemaNameProperty => {
                let name = attributes.get(SCHEMA_NAME_ATTRIBUTE).ok_or_else(|| {
                    ProcessError::schema(format!(
                        "Flow unit has no '{}' attribute",
                        SCHEMA_NAME_ATTRIBUTE
                    ))
                })?;
                self.registry.get(name).cloned().ok_or_else(|| {
                    ProcessError::schema(format!("No schema registered under name '{}'", name))
                })
            }
            SchemaAccessStrategy::InheritRecordSchema => inherited
                .cloned()
                .ok_or_else(|| ProcessError::schema("No record schema available to inherit")),
        }
    }
}
