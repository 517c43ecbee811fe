//! Controller service registry
//!
//! Record readers and writers are configured once as named services and
//! looked up by the processor at start-up.

use crate::config::{ProcessorConfig, ServiceConfig};
use crate::delimited::{CsvReaderFactory, CsvWriterFactory};
use crate::error::{ProcessError, ProcessResult};
use crate::record::Schema;
use crate::serialization::{
    RecordReaderFactory, RecordSetWriterFactory, SchemaAccessStrategy, SchemaRegistry,
    SchemaResolver,
};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Named record reader and writer factories
#[derive(Default)]
pub struct ServiceRegistry {
    readers: HashMap<String, Arc<dyn RecordReaderFactory>>,
    writers: HashMap<String, Arc<dyn RecordSetWriterFactory>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build every service declared in the configuration
    pub fn from_config(config: &ProcessorConfig) -> ProcessResult<Self> {
        let mut schemas = SchemaRegistry::new();
        for (name, text) in &config.schemas {
            let schema = Schema::from_avro_text(text)?.with_name(name.clone());
            schemas.insert(name.clone(), Arc::new(schema));
        }
        let schemas = Arc::new(schemas);

        let mut registry = Self::new();
        for service in &config.services {
            match service {
                ServiceConfig::CsvReader(reader) => {
                    let resolver = build_resolver(
                        reader.schema_access,
                        reader.schema_text.as_deref(),
                        reader.schema_file.as_deref(),
                        &schemas,
                    )?;
                    let factory = CsvReaderFactory::with_config(reader, resolver)?;
                    registry.register_reader(&reader.name, Arc::new(factory));
                    info!(
                        "Registered CSV reader '{}' (schema access: {:?}, separator: {:?})",
                        reader.name, reader.schema_access, reader.value_separator
                    );
                }
                ServiceConfig::CsvWriter(writer) => {
                    let resolver = build_resolver(
                        writer.schema_access,
                        writer.schema_text.as_deref(),
                        writer.schema_file.as_deref(),
                        &schemas,
                    )?;
                    let factory = CsvWriterFactory::with_config(writer, resolver)?;
                    registry.register_writer(&writer.name, Arc::new(factory));
                    info!(
                        "Registered CSV writer '{}' (schema access: {:?}, schema write: {:?})",
                        writer.name, writer.schema_access, writer.schema_write_strategy
                    );
                }
            }
        }

        Ok(registry)
    }

    pub fn register_reader(&mut self, name: &str, factory: Arc<dyn RecordReaderFactory>) {
        self.readers.insert(name.to_string(), factory);
    }

    pub fn register_writer(&mut self, name: &str, factory: Arc<dyn RecordSetWriterFactory>) {
        self.writers.insert(name.to_string(), factory);
    }

    pub fn reader(&self, name: &str) -> ProcessResult<Arc<dyn RecordReaderFactory>> {
        self.readers.get(name).cloned().ok_or_else(|| {
            ProcessError::config(format!("No record reader service named '{}'", name))
        })
    }

    pub fn writer(&self, name: &str) -> ProcessResult<Arc<dyn RecordSetWriterFactory>> {
        self.writers.get(name).cloned().ok_or_else(|| {
            ProcessError::config(format!("No record writer service named '{}'", name))
        })
    }
}

fn build_resolver(
    access: SchemaAccessStrategy,
    text: Option<&str>,
    file: Option<&Path>,
    schemas: &Arc<SchemaRegistry>,
) -> ProcessResult<SchemaResolver> {
    let schema_text = match (text, file) {
        (Some(text), _) => Some(text.to_string()),
        (None, Some(path)) => Some(fs::read_to_string(path).map_err(|e| {
            ProcessError::config(format!(
                "Failed to read schema file '{}': {}",
                path.display(),
                e
            ))
        })?),
        (None, None) => None,
    };

    let schema = schema_text
        .map(|text| Schema::from_avro_text(&text).map(Arc::new))
        .transpose()?;

    Ok(SchemaResolver::new(access, schema, Arc::clone(schemas)))
}
