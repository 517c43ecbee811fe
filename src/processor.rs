//! Record transform processor
//!
//! One call to [`RecordTransformProcessor::on_trigger`] runs one cycle: the
//! next flow unit is decoded record by record, each record goes through the
//! [`RecordRule`], kept records are encoded into a derived flow unit, and
//! the outcome is routed to `success` or `failure` as a whole.

use crate::config::ProcessorConfig;
use crate::error::{ProcessError, ProcessResult};
use crate::flow::{Attributes, FlowUnit, ProcessSession, Relationship};
use crate::registry::ServiceRegistry;
use crate::rule::{OffNetBillingRule, RecordRule, RuleDecision};
use crate::serialization::{
    RecordReader, RecordReaderFactory, RecordSetWriter, RecordSetWriterFactory, WriteResult,
    RECORD_COUNT_ATTRIBUTE,
};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Property naming the record reader service
pub const RECORD_READER_PROPERTY: &str = "record-reader";

/// Property naming the record writer service
pub const RECORD_WRITER_PROPERTY: &str = "record-writer";

/// Where a cycle is, or where it stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    Idle,
    /// Record stream open, no derived unit yet
    Opened,
    /// Derived unit exists and the writer is open
    Writing,
    Finished,
    Failed,
}

impl fmt::Display for CycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CycleState::Idle => "idle",
            CycleState::Opened => "opened",
            CycleState::Writing => "writing",
            CycleState::Finished => "finished",
            CycleState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Summary of one finished cycle
#[derive(Debug)]
pub struct CycleReport {
    /// Id of the consumed (or failed) original flow unit
    pub flow_id: Uuid,
    /// `Finished` or `Failed`
    pub state: CycleState,
    /// State the cycle was in when it failed
    pub failed_in: Option<CycleState>,
    pub outcome: Relationship,
    pub records_read: u64,
    pub records_written: u64,
    pub error: Option<ProcessError>,
}

impl CycleReport {
    pub fn is_success(&self) -> bool {
        self.outcome == Relationship::Success
    }
}

#[derive(Debug)]
struct Progress {
    state: CycleState,
    records_read: u64,
    records_written: u64,
}

impl Progress {
    fn new() -> Self {
        Self {
            state: CycleState::Idle,
            records_read: 0,
            records_written: 0,
        }
    }
}

/// Filters and rewrites the records of each flow unit
///
/// The processor holds only shared, read-only state and can run any number
/// of cycles concurrently on independent sessions.
pub struct RecordTransformProcessor {
    name: String,
    reader_factory: Arc<dyn RecordReaderFactory>,
    writer_factory: Arc<dyn RecordSetWriterFactory>,
    rule: Arc<dyn RecordRule>,
}

impl RecordTransformProcessor {
    pub fn new(
        name: impl Into<String>,
        reader_factory: Arc<dyn RecordReaderFactory>,
        writer_factory: Arc<dyn RecordSetWriterFactory>,
    ) -> Self {
        Self {
            name: name.into(),
            reader_factory,
            writer_factory,
            rule: Arc::new(OffNetBillingRule::new()),
        }
    }

    /// Resolve the configured reader and writer services
    pub fn from_config(config: &ProcessorConfig, registry: &ServiceRegistry) -> ProcessResult<Self> {
        let reader = registry.reader(&config.record_reader)?;
        let writer = registry.writer(&config.record_writer)?;

        info!(
            "Processor '{}' using {} '{}' and {} '{}'",
            config.processor_name,
            RECORD_READER_PROPERTY,
            config.record_reader,
            RECORD_WRITER_PROPERTY,
            config.record_writer
        );

        Ok(Self::new(&config.processor_name, reader, writer))
    }

    pub fn with_rule(mut self, rule: Arc<dyn RecordRule>) -> Self {
        self.rule = rule;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn relationships() -> [Relationship; 2] {
        [Relationship::Success, Relationship::Failure]
    }

    /// Run one cycle on the next queued flow unit
    ///
    /// Returns `Ok(None)` when the session has nothing queued. Processing
    /// failures are routed and reported, never returned; `Err` means the
    /// session bookkeeping itself was violated.
    pub fn on_trigger(&self, session: &mut ProcessSession) -> ProcessResult<Option<CycleReport>> {
        let Some(original) = session.get() else {
            return Ok(None);
        };

        let flow_id = original.id();
        let mut progress = Progress::new();

        let mut reader = match self
            .reader_factory
            .create_reader(original.attributes(), session.read(&original))
        {
            Ok(reader) => reader,
            Err(e) => return self.fail(session, original, None, progress, e).map(Some),
        };
        progress.state = CycleState::Opened;
        debug!("{}: opened record stream for flow unit {}", self.name, flow_id);

        let mut derived = session.create(&original);
        let written = self.write_records(original.attributes(), reader.as_mut(), &mut progress);
        let result = settle(written, reader.close());
        drop(reader);

        match result {
            Ok((content, write_result)) => {
                session.write(&mut derived, content);
                derived.put_attribute(RECORD_COUNT_ATTRIBUTE, write_result.record_count.to_string());
                derived.put_all_attributes(write_result.attributes);

                let output_id = derived.id();
                session.transfer(derived, Relationship::Success)?;
                session.remove(original)?;

                info!(
                    "{}: flow unit {} -> {} ({} of {} records kept)",
                    self.name,
                    flow_id,
                    output_id,
                    progress.records_written,
                    progress.records_read
                );

                Ok(Some(CycleReport {
                    flow_id,
                    state: CycleState::Finished,
                    failed_in: None,
                    outcome: Relationship::Success,
                    records_read: progress.records_read,
                    records_written: write_result.record_count,
                    error: None,
                }))
            }
            Err(e) => self
                .fail(session, original, Some(derived), progress, e)
                .map(Some),
        }
    }

    /// Negotiate the output schema and copy kept records into a fresh buffer
    fn write_records(
        &self,
        attributes: &Attributes,
        reader: &mut dyn RecordReader,
        progress: &mut Progress,
    ) -> ProcessResult<(Vec<u8>, WriteResult)> {
        let schema = self.writer_factory.get_schema(attributes, &reader.schema())?;

        let mut content = Vec::new();
        let write_result = {
            let mut writer = self.writer_factory.create_writer(schema, &mut content)?;
            progress.state = CycleState::Writing;
            debug!("{}: writer open, copying records", self.name);

            let copied = self.copy_records(reader, writer.as_mut(), progress);
            let closed = writer.close();
            settle(copied, closed)?
        };

        Ok((content, write_result))
    }

    fn copy_records(
        &self,
        reader: &mut dyn RecordReader,
        writer: &mut dyn RecordSetWriter,
        progress: &mut Progress,
    ) -> ProcessResult<WriteResult> {
        writer.begin_record_set()?;

        while let Some(mut record) = reader.next_record()? {
            progress.records_read += 1;
            let position = progress.records_read;

            match self.rule.apply(&mut record, position)? {
                RuleDecision::Keep => {
                    writer.write(&record)?;
                    progress.records_written += 1;
                }
                RuleDecision::Discard => {
                    debug!("{}: record {} discarded by {}", self.name, position, self.rule.name());
                }
            }
        }

        writer.finish_record_set()
    }

    fn fail(
        &self,
        session: &mut ProcessSession,
        original: FlowUnit,
        derived: Option<FlowUnit>,
        progress: Progress,
        err: ProcessError,
    ) -> ProcessResult<CycleReport> {
        let flow_id = original.id();

        error!(
            flow_id = %flow_id,
            state = %progress.state,
            kind = err.kind(),
            "{}: failed to process flow unit: {}",
            self.name,
            err
        );

        if let Some(derived) = derived {
            session.discard(derived);
        }
        session.transfer(original, Relationship::Failure)?;

        Ok(CycleReport {
            flow_id,
            state: CycleState::Failed,
            failed_in: Some(progress.state),
            outcome: Relationship::Failure,
            records_read: progress.records_read,
            records_written: 0,
            error: Some(err),
        })
    }
}

/// Combine an operation's result with the release of its resource
///
/// A release failure turns a success into a failure; after an earlier
/// failure it is only logged.
fn settle<T>(result: ProcessResult<T>, release: ProcessResult<()>) -> ProcessResult<T> {
    let release = release.map_err(|e| match e {
        ProcessError::ResourceRelease(_) => e,
        other => ProcessError::release(other.to_string()),
    });

    match (result, release) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(e)) => Err(e),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(release)) => {
            warn!("Ignoring release failure after earlier error: {}", release);
            Err(e)
        }
    }
}
