//! Delimited text (CSV) record reader and writer
//!
//! Both sides are built on the `csv` crate. The reader decodes each line
//! against a resolved schema; the writer coerces records to the negotiated
//! output schema and reports encoding metadata through the [`WriteResult`].

use crate::config::{CsvReaderConfig, CsvWriterConfig};
use crate::error::{ProcessError, ProcessResult};
use crate::flow::Attributes;
use crate::record::{FieldType, FieldValue, Record, Schema};
use crate::serialization::{
    RecordReader, RecordReaderFactory, RecordSetWriter, RecordSetWriterFactory, SchemaResolver,
    WriteResult, AVRO_SCHEMA_ATTRIBUTE, MIME_TYPE_ATTRIBUTE, SCHEMA_NAME_ATTRIBUTE,
};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::sync::Arc;
use tracing::debug;

const CSV_MIME_TYPE: &str = "text/csv";

/// How the writer advertises the schema of its output
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum SchemaWriteStrategy {
    /// Do not advertise the schema
    NoSchema,
    /// Set the `schema.name` attribute
    SchemaName,
    /// Set the `avro.schema` attribute to the full schema text
    FullSchemaAttribute,
}

impl Default for SchemaWriteStrategy {
    fn default() -> Self {
        SchemaWriteStrategy::NoSchema
    }
}

/// When the writer quotes values
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum QuoteMode {
    /// Only when a value contains the separator, quote or a line break
    Minimal,
    All,
    NonNumeric,
    None,
}

impl Default for QuoteMode {
    fn default() -> Self {
        QuoteMode::Minimal
    }
}

impl From<QuoteMode> for csv::QuoteStyle {
    fn from(mode: QuoteMode) -> Self {
        match mode {
            QuoteMode::Minimal => csv::QuoteStyle::Necessary,
            QuoteMode::All => csv::QuoteStyle::Always,
            QuoteMode::NonNumeric => csv::QuoteStyle::NonNumeric,
            QuoteMode::None => csv::QuoteStyle::Never,
        }
    }
}

/// Parse a single-byte separator; accepts `\t` as an escape for tab
pub fn parse_separator(value: &str) -> ProcessResult<u8> {
    let resolved = match value {
        "\\t" => "\t",
        other => other,
    };

    match resolved.as_bytes() {
        [byte] => Ok(*byte),
        _ => Err(ProcessError::config(format!(
            "Separator must be a single ASCII character, got '{}'",
            value
        ))),
    }
}

/// Builds CSV readers
pub struct CsvReaderFactory {
    resolver: SchemaResolver,
    separator: u8,
    quote: u8,
    first_line_is_header: bool,
    trailing_delimiter: bool,
    trim_fields: bool,
}

impl CsvReaderFactory {
    pub fn with_config(config: &CsvReaderConfig, resolver: SchemaResolver) -> ProcessResult<Self> {
        Ok(Self {
            resolver,
            separator: parse_separator(&config.value_separator)?,
            quote: parse_separator(&config.quote_char)?,
            first_line_is_header: config.first_line_is_header,
            trailing_delimiter: config.trailing_delimiter,
            trim_fields: config.trim_fields,
        })
    }
}

impl RecordReaderFactory for CsvReaderFactory {
    fn create_reader(
        &self,
        attributes: &Attributes,
        input: Box<dyn Read + Send>,
    ) -> ProcessResult<Box<dyn RecordReader>> {
        let schema = self.resolver.resolve(attributes, None)?;

        let reader = csv::ReaderBuilder::new()
            .delimiter(self.separator)
            .quote(self.quote)
            .has_headers(self.first_line_is_header)
            .flexible(true)
            .trim(if self.trim_fields {
                csv::Trim::All
            } else {
                csv::Trim::None
            })
            .from_reader(input);

        debug!(
            "Opened CSV reader with {} schema fields (separator: {:?})",
            schema.len(),
            self.separator as char
        );

        Ok(Box::new(CsvRecordReader {
            schema,
            reader: Some(reader),
            row: csv::StringRecord::new(),
            position: 0,
            trailing_delimiter: self.trailing_delimiter,
        }))
    }
}

/// Reads one record per CSV line
pub struct CsvRecordReader {
    schema: Arc<Schema>,
    /// `None` once closed; dropping the csv reader releases the input stream
    reader: Option<csv::Reader<Box<dyn Read + Send>>>,
    row: csv::StringRecord,
    position: u64,
    trailing_delimiter: bool,
}

impl CsvRecordReader {
    fn decode_row(&self) -> ProcessResult<Record> {
        let mut cells: Vec<&str> = self.row.iter().collect();
        if self.trailing_delimiter && cells.last() == Some(&"") {
            cells.pop();
        }

        if cells.len() != self.schema.len() {
            return Err(ProcessError::malformed(
                self.position,
                format!(
                    "expected {} fields, found {}",
                    self.schema.len(),
                    cells.len()
                ),
            ));
        }

        let mut values = Vec::with_capacity(cells.len());
        for (cell, field) in cells.iter().zip(self.schema.fields()) {
            let value = if cell.is_empty() {
                if field.nullable {
                    FieldValue::Null
                } else if field.field_type == FieldType::String {
                    FieldValue::String(String::new())
                } else {
                    return Err(ProcessError::malformed(
                        self.position,
                        format!("field '{}' is empty but not nullable", field.name),
                    ));
                }
            } else {
                field.field_type.parse_text(cell).map_err(|reason| {
                    ProcessError::malformed(
                        self.position,
                        format!("field '{}': {}", field.name, reason),
                    )
                })?
            };
            values.push(value);
        }

        Record::new(Arc::clone(&self.schema), values)
    }
}

impl RecordReader for CsvRecordReader {
    fn schema(&self) -> Arc<Schema> {
        Arc::clone(&self.schema)
    }

    fn next_record(&mut self) -> ProcessResult<Option<Record>> {
        let reader = self
            .reader
            .as_mut()
            .ok_or_else(|| ProcessError::release("CSV reader already closed"))?;

        let has_row = reader
            .read_record(&mut self.row)
            .map_err(|e| ProcessError::malformed(self.position + 1, e.to_string()))?;
        if !has_row {
            return Ok(None);
        }

        self.position += 1;
        self.decode_row().map(Some)
    }

    fn close(&mut self) -> ProcessResult<()> {
        self.reader.take();
        Ok(())
    }
}

/// Builds CSV writers
pub struct CsvWriterFactory {
    resolver: SchemaResolver,
    separator: u8,
    quote: u8,
    quote_mode: QuoteMode,
    include_header_line: bool,
    trailing_delimiter: bool,
    crlf: bool,
    schema_write_strategy: SchemaWriteStrategy,
}

impl CsvWriterFactory {
    pub fn with_config(config: &CsvWriterConfig, resolver: SchemaResolver) -> ProcessResult<Self> {
        let crlf = match config.record_separator.as_str() {
            "\n" | "\\n" => false,
            "\r\n" | "\\r\\n" => true,
            other => {
                return Err(ProcessError::config(format!(
                    "record_separator must be \\n or \\r\\n, got {:?}",
                    other
                )))
            }
        };

        Ok(Self {
            resolver,
            separator: parse_separator(&config.value_separator)?,
            quote: parse_separator(&config.quote_char)?,
            quote_mode: config.quote_mode,
            include_header_line: config.include_header_line,
            trailing_delimiter: config.trailing_delimiter,
            crlf,
            schema_write_strategy: config.schema_write_strategy,
        })
    }

    fn schema_attributes(&self, schema: &Schema) -> Attributes {
        let mut attributes = Attributes::new();
        attributes.insert(MIME_TYPE_ATTRIBUTE.to_string(), CSV_MIME_TYPE.to_string());

        match self.schema_write_strategy {
            SchemaWriteStrategy::NoSchema => {}
            SchemaWriteStrategy::SchemaName => {
                if let Some(name) = schema.name() {
                    attributes.insert(SCHEMA_NAME_ATTRIBUTE.to_string(), name.to_string());
                }
            }
            SchemaWriteStrategy::FullSchemaAttribute => {
                attributes.insert(AVRO_SCHEMA_ATTRIBUTE.to_string(), schema.to_avro_text());
            }
        }

        attributes
    }
}

impl RecordSetWriterFactory for CsvWriterFactory {
    fn get_schema(
        &self,
        attributes: &Attributes,
        input_schema: &Arc<Schema>,
    ) -> ProcessResult<Arc<Schema>> {
        self.resolver.resolve(attributes, Some(input_schema))
    }

    fn create_writer<'a>(
        &self,
        schema: Arc<Schema>,
        out: &'a mut dyn Write,
    ) -> ProcessResult<Box<dyn RecordSetWriter + 'a>> {
        let terminator = if self.crlf {
            csv::Terminator::CRLF
        } else {
            csv::Terminator::Any(b'\n')
        };

        let writer = csv::WriterBuilder::new()
            .delimiter(self.separator)
            .quote(self.quote)
            .quote_style(self.quote_mode.into())
            .terminator(terminator)
            .flexible(true)
            .from_writer(out);

        Ok(Box::new(CsvRecordSetWriter {
            attributes: self.schema_attributes(&schema),
            schema,
            writer: Some(writer),
            include_header_line: self.include_header_line,
            trailing_delimiter: self.trailing_delimiter,
            record_count: 0,
        }))
    }
}

/// Writes records as CSV lines in output schema order
pub struct CsvRecordSetWriter<'a> {
    schema: Arc<Schema>,
    writer: Option<csv::Writer<&'a mut dyn Write>>,
    attributes: Attributes,
    include_header_line: bool,
    trailing_delimiter: bool,
    record_count: u64,
}

impl<'a> CsvRecordSetWriter<'a> {
    fn writer(&mut self) -> ProcessResult<&mut csv::Writer<&'a mut dyn Write>> {
        self.writer
            .as_mut()
            .ok_or_else(|| ProcessError::release("CSV writer already closed"))
    }

    fn write_row(&mut self, mut cells: Vec<String>) -> ProcessResult<()> {
        if self.trailing_delimiter {
            cells.push(String::new());
        }
        self.writer()?
            .write_record(&cells)
            .map_err(|e| ProcessError::Io(e.into()))
    }
}

impl<'a> RecordSetWriter for CsvRecordSetWriter<'a> {
    fn begin_record_set(&mut self) -> ProcessResult<()> {
        if self.include_header_line {
            let header = self
                .schema
                .fields()
                .iter()
                .map(|f| f.name.clone())
                .collect();
            self.write_row(header)?;
        }
        Ok(())
    }

    fn write(&mut self, record: &Record) -> ProcessResult<()> {
        let mut cells = Vec::with_capacity(self.schema.len());

        for field in self.schema.fields() {
            let coerced = match record.get_value(&field.name) {
                Some(value) => value
                    .coerce(field.field_type)
                    .map_err(|reason| ProcessError::incompatible(&field.name, reason))?,
                None => FieldValue::Null,
            };

            if coerced.is_null() && !field.nullable {
                return Err(ProcessError::incompatible(
                    &field.name,
                    "null value for a non-nullable field",
                ));
            }
            cells.push(coerced.to_string());
        }

        self.write_row(cells)?;
        self.record_count += 1;
        Ok(())
    }

    fn finish_record_set(&mut self) -> ProcessResult<WriteResult> {
        self.writer()?.flush()?;
        Ok(WriteResult::new(self.record_count, self.attributes.clone()))
    }

    fn close(&mut self) -> ProcessResult<()> {
        if let Some(mut writer) = self.writer.take() {
            writer
                .flush()
                .map_err(|e| ProcessError::release(format!("Failed to flush CSV writer: {}", e)))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serialization::{SchemaAccessStrategy, SchemaRegistry};
    use std::io::Cursor;

    const IN_SCHEMA: &str = r#"{
        "type": "record",
        "name": "cdr_in",
        "fields": [
            { "name": "chargingCharacteristics", "type": "string" },
            { "name": "billing", "type": "string" },
            { "name": "recordStartTime", "type": "string" },
            { "name": "duration", "type": ["null", "long"] }
        ]
    }"#;

    fn resolver(text: &str) -> SchemaResolver {
        SchemaResolver::new(
            SchemaAccessStrategy::SchemaTextProperty,
            Some(Arc::new(Schema::from_avro_text(text).unwrap())),
            Arc::new(SchemaRegistry::new()),
        )
    }

    fn reader_config(separator: &str) -> CsvReaderConfig {
        CsvReaderConfig {
            name: "reader".to_string(),
            schema_access: SchemaAccessStrategy::SchemaTextProperty,
            schema_text: Some(IN_SCHEMA.to_string()),
            schema_file: None,
            value_separator: separator.to_string(),
            quote_char: "\"".to_string(),
            first_line_is_header: false,
            trailing_delimiter: false,
            trim_fields: false,
        }
    }

    fn writer_config() -> CsvWriterConfig {
        CsvWriterConfig {
            name: "writer".to_string(),
            schema_access: SchemaAccessStrategy::InheritRecordSchema,
            schema_text: None,
            schema_file: None,
            schema_write_strategy: SchemaWriteStrategy::FullSchemaAttribute,
            value_separator: ",".to_string(),
            quote_char: "\"".to_string(),
            quote_mode: QuoteMode::Minimal,
            include_header_line: false,
            trailing_delimiter: false,
            record_separator: "\n".to_string(),
        }
    }

    fn read_all(factory: &CsvReaderFactory, input: &str) -> ProcessResult<Vec<Record>> {
        let mut reader = factory.create_reader(
            &Attributes::new(),
            Box::new(Cursor::new(input.as_bytes().to_vec())),
        )?;
        let mut records = Vec::new();
        while let Some(record) = reader.next_record()? {
            records.push(record);
        }
        reader.close()?;
        Ok(records)
    }

    #[test]
    fn test_parse_separator() {
        assert_eq!(parse_separator("|").unwrap(), b'|');
        assert_eq!(parse_separator("\\t").unwrap(), b'\t');
        assert!(parse_separator("||").is_err());
        assert!(parse_separator("").is_err());
    }

    #[test]
    fn test_read_pipe_delimited() {
        let factory = CsvReaderFactory::with_config(&reader_config("|"), resolver(IN_SCHEMA)).unwrap();
        let records = read_all(
            &factory,
            "400|Y|23-01-05 10:30:00|120\n100|N|23-01-05 11:00:00|\n",
        )
        .unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].get_value("duration"), Some(&FieldValue::Long(120)));
        assert_eq!(records[1].get_value("duration"), Some(&FieldValue::Null));
        assert_eq!(
            records[1].get_value("billing").and_then(|v| v.as_str()),
            Some("N")
        );
    }

    #[test]
    fn test_read_malformed_rows() {
        let factory = CsvReaderFactory::with_config(&reader_config("|"), resolver(IN_SCHEMA)).unwrap();

        let err = read_all(&factory, "400|Y|23-01-05 10:30:00|1\n400|Y\n").unwrap_err();
        assert!(matches!(err, ProcessError::MalformedRecord { position: 2, .. }));

        let err = read_all(&factory, "400|Y|23-01-05 10:30:00|abc\n").unwrap_err();
        assert!(matches!(err, ProcessError::MalformedRecord { position: 1, .. }));
    }

    #[test]
    fn test_read_trailing_delimiter_and_header() {
        let mut config = reader_config("|");
        config.trailing_delimiter = true;
        config.first_line_is_header = true;
        let factory = CsvReaderFactory::with_config(&config, resolver(IN_SCHEMA)).unwrap();

        let records = read_all(
            &factory,
            "chargingCharacteristics|billing|recordStartTime|duration|\n400|Y|23-01-05 10:30:00|5|\n",
        )
        .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].get_value("duration"), Some(&FieldValue::Long(5)));
    }

    #[test]
    fn test_read_close_rejects_further_reads() {
        let factory = CsvReaderFactory::with_config(&reader_config("|"), resolver(IN_SCHEMA)).unwrap();
        let mut reader = factory
            .create_reader(
                &Attributes::new(),
                Box::new(Cursor::new(b"400|Y|23-01-05 10:30:00|1\n".to_vec())),
            )
            .unwrap();
        reader.close().unwrap();
        assert!(matches!(
            reader.next_record(),
            Err(ProcessError::ResourceRelease(_))
        ));
    }

    #[test]
    fn test_write_records_and_attributes() {
        let reader = CsvReaderFactory::with_config(&reader_config("|"), resolver(IN_SCHEMA)).unwrap();
        let records = read_all(&reader, "400|Y|20230105103000|7\n400|Y|20230105114510|\n").unwrap();

        let factory = CsvWriterFactory::with_config(&writer_config(), resolver(IN_SCHEMA)).unwrap();
        let schema = factory
            .get_schema(&Attributes::new(), records[0].schema())
            .unwrap();

        let mut out = Vec::new();
        let result = {
            let mut writer = factory.create_writer(Arc::clone(&schema), &mut out).unwrap();
            writer.begin_record_set().unwrap();
            for record in &records {
                writer.write(record).unwrap();
            }
            let result = writer.finish_record_set().unwrap();
            writer.close().unwrap();
            result
        };

        assert_eq!(
            String::from_utf8(out).unwrap(),
            "400,Y,20230105103000,7\n400,Y,20230105114510,\n"
        );
        assert_eq!(result.record_count, 2);
        assert_eq!(
            result.attributes.get(MIME_TYPE_ATTRIBUTE).map(String::as_str),
            Some("text/csv")
        );
        let advertised = result.attributes.get(AVRO_SCHEMA_ATTRIBUTE).unwrap();
        assert_eq!(Schema::from_avro_text(advertised).unwrap(), *schema);
    }

    #[test]
    fn test_write_header_and_projection() {
        let out_schema = r#"{
            "type": "record",
            "name": "cdr_out",
            "fields": [
                { "name": "recordStartTime", "type": "string" },
                { "name": "duration", "type": "long" }
            ]
        }"#;
        let mut config = writer_config();
        config.include_header_line = true;
        config.schema_write_strategy = SchemaWriteStrategy::SchemaName;
        let factory = CsvWriterFactory::with_config(&config, resolver(out_schema)).unwrap();
        let schema = Arc::new(Schema::from_avro_text(out_schema).unwrap());

        let reader = CsvReaderFactory::with_config(&reader_config("|"), resolver(IN_SCHEMA)).unwrap();
        let records = read_all(&reader, "400|Y|20230105103000|7\n400|Y|20230105114510|\n").unwrap();

        let mut out = Vec::new();
        let mut writer = factory.create_writer(schema, &mut out).unwrap();
        writer.begin_record_set().unwrap();
        writer.write(&records[0]).unwrap();

        let err = writer.write(&records[1]).unwrap_err();
        assert!(matches!(err, ProcessError::IncompatibleRecord { ref field, .. } if field == "duration"));

        let result = writer.finish_record_set().unwrap();
        writer.close().unwrap();
        drop(writer);

        assert_eq!(result.record_count, 1);
        assert_eq!(
            result.attributes.get(SCHEMA_NAME_ATTRIBUTE).map(String::as_str),
            Some("cdr_out")
        );
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "recordStartTime,duration\n20230105103000,7\n"
        );
    }
}
