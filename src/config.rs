//! Configuration module for the billing filter processor
//!
//! This module handles all configuration aspects including:
//! - The record reader and record writer the processor references by name
//! - Controller services (CSV readers and writers) and their schema access
//! - Named schemas for the `schema-name-property` strategy
//! - The directory runtime (input, success and failure directories)
//! - Environment variable overrides

use crate::delimited::{parse_separator, QuoteMode, SchemaWriteStrategy};
use crate::error::{ProcessError, ProcessResult};
use crate::record::Schema;
use crate::serialization::SchemaAccessStrategy;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Default location of the config file when `PROCESSOR_CONFIG_PATH` is unset
pub const DEFAULT_CONFIG_PATH: &str = "config/processor.toml";

/// Complete configuration for the processor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorConfig {
    /// Name used in logs
    pub processor_name: String,

    /// Name of the service used to read incoming records
    pub record_reader: String,

    /// Name of the service used to write outgoing records
    pub record_writer: String,

    /// Directory runtime settings
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Named schema texts (schema name -> Avro-style record schema)
    #[serde(default)]
    pub schemas: HashMap<String, String>,

    /// Controller services available to the processor
    #[serde(default)]
    pub services: Vec<ServiceConfig>,
}

/// Directory runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Directory polled for incoming flow units
    #[serde(default = "default_input_dir")]
    pub input_dir: PathBuf,

    /// Directory receiving transformed output
    #[serde(default = "default_success_dir")]
    pub success_dir: PathBuf,

    /// Directory receiving untouched inputs that failed
    #[serde(default = "default_failure_dir")]
    pub failure_dir: PathBuf,

    /// Maximum number of cycles running at once
    #[serde(default = "default_max_concurrent_cycles")]
    pub max_concurrent_cycles: usize,

    /// Delay between directory polls in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            input_dir: default_input_dir(),
            success_dir: default_success_dir(),
            failure_dir: default_failure_dir(),
            max_concurrent_cycles: default_max_concurrent_cycles(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

/// A controller service definition
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServiceConfig {
    CsvReader(CsvReaderConfig),
    CsvWriter(CsvWriterConfig),
}

impl ServiceConfig {
    pub fn name(&self) -> &str {
        match self {
            ServiceConfig::CsvReader(c) => &c.name,
            ServiceConfig::CsvWriter(c) => &c.name,
        }
    }

    pub fn is_reader(&self) -> bool {
        matches!(self, ServiceConfig::CsvReader(_))
    }

    pub fn is_writer(&self) -> bool {
        matches!(self, ServiceConfig::CsvWriter(_))
    }
}

/// CSV record reader service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CsvReaderConfig {
    pub name: String,

    #[serde(default)]
    pub schema_access: SchemaAccessStrategy,

    /// Inline schema text (for `schema-text-property`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_text: Option<String>,

    /// File holding the schema text (alternative to `schema_text`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_file: Option<PathBuf>,

    #[serde(default = "default_separator")]
    pub value_separator: String,

    #[serde(default = "default_quote")]
    pub quote_char: String,

    /// Skip the first line of every flow unit
    #[serde(default)]
    pub first_line_is_header: bool,

    /// Lines end with a separator that does not start a field
    #[serde(default)]
    pub trailing_delimiter: bool,

    #[serde(default)]
    pub trim_fields: bool,
}

/// CSV record set writer service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CsvWriterConfig {
    pub name: String,

    #[serde(default)]
    pub schema_access: SchemaAccessStrategy,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_text: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_file: Option<PathBuf>,

    #[serde(default)]
    pub schema_write_strategy: SchemaWriteStrategy,

    #[serde(default = "default_separator")]
    pub value_separator: String,

    #[serde(default = "default_quote")]
    pub quote_char: String,

    #[serde(default)]
    pub quote_mode: QuoteMode,

    #[serde(default)]
    pub include_header_line: bool,

    #[serde(default)]
    pub trailing_delimiter: bool,

    #[serde(default = "default_record_separator")]
    pub record_separator: String,
}

// Default values
fn default_input_dir() -> PathBuf {
    PathBuf::from("data/in")
}

fn default_success_dir() -> PathBuf {
    PathBuf::from("data/success")
}

fn default_failure_dir() -> PathBuf {
    PathBuf::from("data/failure")
}

fn default_max_concurrent_cycles() -> usize {
    4
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_separator() -> String {
    ",".to_string()
}

fn default_quote() -> String {
    "\"".to_string()
}

fn default_record_separator() -> String {
    "\n".to_string()
}

impl ProcessorConfig {
    /// Load configuration from the file named by `PROCESSOR_CONFIG_PATH`
    ///
    /// Falls back to [`DEFAULT_CONFIG_PATH`] and applies environment overrides.
    pub fn load() -> ProcessResult<Self> {
        let config_path =
            env::var("PROCESSOR_CONFIG_PATH").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());

        tracing::info!("Loading configuration from: {}", config_path);

        let mut config = Self::from_file(&config_path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> ProcessResult<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| {
            ProcessError::config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;

        toml::from_str(&contents).map_err(|e| {
            ProcessError::config(format!(
                "Failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })
    }

    pub fn from_toml_str(contents: &str) -> ProcessResult<Self> {
        toml::from_str(contents).map_err(|e| ProcessError::config(e.to_string()))
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(name) = env::var("PROCESSOR_NAME") {
            tracing::info!("Overriding processor_name from environment");
            self.processor_name = name;
        }

        if let Ok(dir) = env::var("PROCESSOR_INPUT_DIR") {
            self.runtime.input_dir = PathBuf::from(dir);
        }

        if let Ok(dir) = env::var("PROCESSOR_SUCCESS_DIR") {
            self.runtime.success_dir = PathBuf::from(dir);
        }

        if let Ok(dir) = env::var("PROCESSOR_FAILURE_DIR") {
            self.runtime.failure_dir = PathBuf::from(dir);
        }

        if let Ok(max) = env::var("PROCESSOR_MAX_CONCURRENT_CYCLES") {
            match max.parse() {
                Ok(n) => self.runtime.max_concurrent_cycles = n,
                Err(_) => tracing::warn!(
                    "Ignoring invalid PROCESSOR_MAX_CONCURRENT_CYCLES value: {}",
                    max
                ),
            }
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> ProcessResult<()> {
        if self.processor_name.is_empty() {
            return Err(ProcessError::config("processor_name cannot be empty"));
        }

        if self.runtime.max_concurrent_cycles == 0 {
            return Err(ProcessError::config(
                "runtime.max_concurrent_cycles must be at least 1",
            ));
        }

        for (name, text) in &self.schemas {
            Schema::from_avro_text(text).map_err(|e| {
                ProcessError::config(format!("Invalid schema '{}': {}", name, e))
            })?;
        }

        let mut seen = HashSet::new();
        for service in &self.services {
            if service.name().is_empty() {
                return Err(ProcessError::config("Service name cannot be empty"));
            }
            if !seen.insert(service.name()) {
                return Err(ProcessError::config(format!(
                    "Duplicate service name: {}",
                    service.name()
                )));
            }

            match service {
                ServiceConfig::CsvReader(reader) => reader.validate()?,
                ServiceConfig::CsvWriter(writer) => writer.validate()?,
            }
        }

        let reader = self.service(&self.record_reader).ok_or_else(|| {
            ProcessError::config(format!(
                "record_reader references unknown service '{}'",
                self.record_reader
            ))
        })?;
        if !reader.is_reader() {
            return Err(ProcessError::config(format!(
                "record_reader '{}' is not a record reader service",
                self.record_reader
            )));
        }

        let writer = self.service(&self.record_writer).ok_or_else(|| {
            ProcessError::config(format!(
                "record_writer references unknown service '{}'",
                self.record_writer
            ))
        })?;
        if !writer.is_writer() {
            return Err(ProcessError::config(format!(
                "record_writer '{}' is not a record writer service",
                self.record_writer
            )));
        }

        Ok(())
    }

    /// Find a service by name
    pub fn service(&self, name: &str) -> Option<&ServiceConfig> {
        self.services.iter().find(|s| s.name() == name)
    }
}

impl CsvReaderConfig {
    fn validate(&self) -> ProcessResult<()> {
        parse_separator(&self.value_separator)?;
        parse_separator(&self.quote_char)?;

        if self.schema_access == SchemaAccessStrategy::InheritRecordSchema {
            return Err(ProcessError::config(format!(
                "Reader '{}' cannot use inherit-record-schema",
                self.name
            )));
        }

        validate_schema_source(
            &self.name,
            self.schema_access,
            self.schema_text.as_deref(),
            self.schema_file.as_deref(),
        )
    }
}

impl CsvWriterConfig {
    fn validate(&self) -> ProcessResult<()> {
        parse_separator(&self.value_separator)?;
        parse_separator(&self.quote_char)?;

        validate_schema_source(
            &self.name,
            self.schema_access,
            self.schema_text.as_deref(),
            self.schema_file.as_deref(),
        )
    }
}

fn validate_schema_source(
    service: &str,
    access: SchemaAccessStrategy,
    text: Option<&str>,
    file: Option<&Path>,
) -> ProcessResult<()> {
    if access != SchemaAccessStrategy::SchemaTextProperty {
        return Ok(());
    }

    match (text, file) {
        (Some(_), Some(_)) => Err(ProcessError::config(format!(
            "Service '{}' sets both schema_text and schema_file",
            service
        ))),
        (None, None) => Err(ProcessError::config(format!(
            "Service '{}' uses schema-text-property but sets neither schema_text nor schema_file",
            service
        ))),
        (Some(text), None) => Schema::from_avro_text(text)
            .map(|_| ())
            .map_err(|e| ProcessError::config(format!("Service '{}': {}", service, e))),
        (None, Some(_)) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
processor_name = "billing-filter"
record_reader = "reader"
record_writer = "writer"

[runtime]
input_dir = "/tmp/in"
max_concurrent_cycles = 2

[schemas]
cdr = '{"type":"record","name":"cdr","fields":[{"name":"billing","type":"string"}]}'

[[services]]
type = "csv-reader"
name = "reader"
schema_text = '{"type":"record","name":"cdr","fields":[{"name":"billing","type":"string"}]}'
value_separator = "|"

[[services]]
type = "csv-writer"
name = "writer"
schema_access = "inherit-record-schema"
schema_write_strategy = "full-schema-attribute"
"#;

    #[test]
    fn test_parse_config() {
        let config = ProcessorConfig::from_toml_str(CONFIG).unwrap();
        config.validate().unwrap();

        assert_eq!(config.processor_name, "billing-filter");
        assert_eq!(config.runtime.input_dir, PathBuf::from("/tmp/in"));
        assert_eq!(config.runtime.max_concurrent_cycles, 2);
        assert_eq!(config.runtime.poll_interval_ms, 1000);
        assert_eq!(config.services.len(), 2);

        match config.service("reader").unwrap() {
            ServiceConfig::CsvReader(reader) => {
                assert_eq!(reader.value_separator, "|");
                assert_eq!(reader.schema_access, SchemaAccessStrategy::SchemaTextProperty);
                assert!(!reader.first_line_is_header);
            }
            other => panic!("unexpected service: {:?}", other),
        }

        match config.service("writer").unwrap() {
            ServiceConfig::CsvWriter(writer) => {
                assert_eq!(writer.value_separator, ",");
                assert_eq!(writer.record_separator, "\n");
                assert_eq!(
                    writer.schema_write_strategy,
                    SchemaWriteStrategy::FullSchemaAttribute
                );
                assert_eq!(writer.quote_mode, QuoteMode::Minimal);
            }
            other => panic!("unexpected service: {:?}", other),
        }
    }

    #[test]
    fn test_validate_references() {
        let mut config = ProcessorConfig::from_toml_str(CONFIG).unwrap();
        config.record_reader = "missing".to_string();
        assert!(config.validate().is_err());

        let mut config = ProcessorConfig::from_toml_str(CONFIG).unwrap();
        config.record_reader = "writer".to_string();
        assert!(config.validate().is_err());

        let mut config = ProcessorConfig::from_toml_str(CONFIG).unwrap();
        config.record_writer = "reader".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_services() {
        let mut config = ProcessorConfig::from_toml_str(CONFIG).unwrap();
        let duplicate = config.services[0].clone();
        config.services.push(duplicate);
        assert!(config.validate().is_err());

        let mut config = ProcessorConfig::from_toml_str(CONFIG).unwrap();
        if let ServiceConfig::CsvReader(reader) = &mut config.services[0] {
            reader.value_separator = "||".to_string();
        }
        assert!(config.validate().is_err());

        let mut config = ProcessorConfig::from_toml_str(CONFIG).unwrap();
        if let ServiceConfig::CsvReader(reader) = &mut config.services[0] {
            reader.schema_access = SchemaAccessStrategy::InheritRecordSchema;
        }
        assert!(config.validate().is_err());

        let mut config = ProcessorConfig::from_toml_str(CONFIG).unwrap();
        if let ServiceConfig::CsvReader(reader) = &mut config.services[0] {
            reader.schema_text = None;
        }
        assert!(config.validate().is_err());

        let mut config = ProcessorConfig::from_toml_str(CONFIG).unwrap();
        config
            .schemas
            .insert("broken".to_string(), "{".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("processor.toml");
        fs::write(&path, CONFIG).unwrap();

        let config = ProcessorConfig::from_file(&path).unwrap();
        assert_eq!(config.record_writer, "writer");

        assert!(ProcessorConfig::from_file(dir.path().join("missing.toml")).is_err());
    }
}
