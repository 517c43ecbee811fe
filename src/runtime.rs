//! Directory-driven host runtime
//!
//! Polls an input directory, runs one processor cycle per file on the
//! blocking pool, and materializes the session outcome on disk:
//! - `success`: content to `success_dir/<filename>`, attributes to
//!   `success_dir/<filename>.attributes.json`
//! - `failure`: the untouched input moved to `failure_dir/<filename>`
//! - consumed inputs are deleted

use crate::config::RuntimeConfig;
use crate::error::{ProcessError, ProcessResult};
use crate::flow::{Attributes, FlowUnit, ProcessSession, Relationship, FILENAME_ATTRIBUTE};
use crate::processor::{CycleReport, RecordTransformProcessor};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

pub const PATH_ATTRIBUTE: &str = "path";
pub const ABSOLUTE_PATH_ATTRIBUTE: &str = "absolute.path";
pub const FILE_SIZE_ATTRIBUTE: &str = "file.size";

const ATTRIBUTES_SUFFIX: &str = ".attributes.json";

/// Counts for one pass over the input directory
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub succeeded: usize,
    pub failed: usize,
    /// Files that could not be picked up or materialized
    pub errors: usize,
}

impl RunSummary {
    pub fn processed(&self) -> usize {
        self.succeeded + self.failed
    }
}

/// Runs the processor over files in a directory
pub struct FlowRuntime {
    processor: Arc<RecordTransformProcessor>,
    config: Arc<RuntimeConfig>,
    permits: Arc<Semaphore>,
}

impl FlowRuntime {
    pub fn new(processor: RecordTransformProcessor, config: RuntimeConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent_cycles.max(1)));
        Self {
            processor: Arc::new(processor),
            config: Arc::new(config),
            permits,
        }
    }

    /// Create the input, success and failure directories
    pub async fn prepare(&self) -> ProcessResult<()> {
        for dir in [
            &self.config.input_dir,
            &self.config.success_dir,
            &self.config.failure_dir,
        ] {
            fs::create_dir_all(dir).await?;
        }
        Ok(())
    }

    /// Process every file currently in the input directory
    pub async fn run_once(&self) -> ProcessResult<RunSummary> {
        let inputs = self.list_inputs().await?;
        let mut summary = RunSummary::default();
        if inputs.is_empty() {
            return Ok(summary);
        }

        debug!("Found {} input file(s) in {}", inputs.len(), self.config.input_dir.display());

        let mut tasks = JoinSet::new();
        for path in inputs {
            let permit = Arc::clone(&self.permits)
                .acquire_owned()
                .await
                .map_err(|e| ProcessError::session(format!("Cycle permits closed: {}", e)))?;
            let processor = Arc::clone(&self.processor);
            let config = Arc::clone(&self.config);

            tasks.spawn(async move {
                let result = process_file(processor, config, &path).await;
                drop(permit);
                (path, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(report))) if report.is_success() => summary.succeeded += 1,
                Ok((_, Ok(_))) => summary.failed += 1,
                Ok((path, Err(e))) => {
                    error!("Failed to handle input file {}: {}", path.display(), e);
                    summary.errors += 1;
                }
                Err(e) => {
                    error!("Cycle task aborted: {}", e);
                    summary.errors += 1;
                }
            }
        }

        info!(
            "Processed {} file(s): {} succeeded, {} failed, {} errors",
            summary.processed(),
            summary.succeeded,
            summary.failed,
            summary.errors
        );
        Ok(summary)
    }

    /// Poll the input directory until Ctrl-C
    pub async fn run(&self) -> ProcessResult<()> {
        self.prepare().await?;

        info!(
            "Watching {} (success: {}, failure: {}, max concurrent cycles: {})",
            self.config.input_dir.display(),
            self.config.success_dir.display(),
            self.config.failure_dir.display(),
            self.config.max_concurrent_cycles
        );

        let mut ticker = tokio::time::interval(Duration::from_millis(self.config.poll_interval_ms));
        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown signal received");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.run_once().await {
                        error!("Polling {} failed: {}", self.config.input_dir.display(), e);
                    }
                }
            }
        }

        Ok(())
    }

    async fn list_inputs(&self) -> ProcessResult<Vec<PathBuf>> {
        let mut entries = fs::read_dir(&self.config.input_dir).await?;
        let mut inputs = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let hidden = entry.file_name().to_string_lossy().starts_with('.');
            if hidden || !entry.file_type().await?.is_file() {
                continue;
            }
            inputs.push(entry.path());
        }

        inputs.sort();
        Ok(inputs)
    }
}

/// Run one cycle for `path` and apply its outcome to the filesystem
async fn process_file(
    processor: Arc<RecordTransformProcessor>,
    config: Arc<RuntimeConfig>,
    path: &Path,
) -> ProcessResult<CycleReport> {
    let content = fs::read(path).await?;
    let flow = FlowUnit::new(content, file_attributes(path).await?);
    let filename = flow
        .attribute(FILENAME_ATTRIBUTE)
        .map(str::to_string)
        .unwrap_or_default();

    let (report, outcome) = tokio::task::spawn_blocking(move || {
        let mut session = ProcessSession::new();
        session.enqueue(flow);
        let report = processor
            .on_trigger(&mut session)?
            .ok_or_else(|| ProcessError::session("Queued flow unit was not processed"))?;
        let outcome = session.commit()?;
        Ok::<_, ProcessError>((report, outcome))
    })
    .await
    .map_err(|e| ProcessError::session(format!("Cycle task failed: {}", e)))??;

    for (relationship, flow) in &outcome.transferred {
        match relationship {
            Relationship::Success => {
                let target = config.success_dir.join(&filename);
                fs::write(&target, flow.content()).await?;
                write_attributes(&target, flow.attributes()).await?;
                debug!("Wrote {} ({} bytes)", target.display(), flow.size());
            }
            Relationship::Failure => {
                let target = config.failure_dir.join(&filename);
                move_file(path, &target).await?;
                warn!("Moved {} to {}", path.display(), target.display());
            }
        }
    }

    if !outcome.removed.is_empty() {
        fs::remove_file(path).await?;
    }

    Ok(report)
}

async fn file_attributes(path: &Path) -> ProcessResult<Attributes> {
    let metadata = fs::metadata(path).await?;
    let absolute = fs::canonicalize(path).await?;
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| ProcessError::session(format!("{} has no file name", path.display())))?;

    let mut attributes = Attributes::new();
    attributes.insert(FILENAME_ATTRIBUTE.to_string(), filename);
    attributes.insert(PATH_ATTRIBUTE.to_string(), "./".to_string());
    attributes.insert(
        ABSOLUTE_PATH_ATTRIBUTE.to_string(),
        absolute
            .parent()
            .map(|p| format!("{}/", p.display()))
            .unwrap_or_default(),
    );
    attributes.insert(FILE_SIZE_ATTRIBUTE.to_string(), metadata.len().to_string());
    Ok(attributes)
}

async fn write_attributes(target: &Path, attributes: &Attributes) -> ProcessResult<()> {
    let sorted: BTreeMap<_, _> = attributes.iter().collect();
    let json = serde_json::to_vec_pretty(&sorted)
        .map_err(|e| ProcessError::session(format!("Failed to encode attributes: {}", e)))?;

    let mut sidecar = target.as_os_str().to_owned();
    sidecar.push(ATTRIBUTES_SUFFIX);
    fs::write(PathBuf::from(sidecar), json).await?;
    Ok(())
}

/// Rename, falling back to copy and delete across filesystems
async fn move_file(from: &Path, to: &Path) -> ProcessResult<()> {
    if fs::rename(from, to).await.is_ok() {
        return Ok(());
    }
    fs::copy(from, to).await?;
    fs::remove_file(from).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CsvReaderConfig, CsvWriterConfig};
    use crate::delimited::{CsvReaderFactory, CsvWriterFactory, QuoteMode, SchemaWriteStrategy};
    use crate::record::Schema;
    use crate::serialization::{SchemaAccessStrategy, SchemaRegistry, SchemaResolver};
    use std::collections::HashMap;

    const SCHEMA: &str = r#"{"type":"record","name":"cdr","fields":[
        {"name":"chargingCharacteristics","type":"string"},
        {"name":"billing","type":"string"},
        {"name":"recordStartTime","type":"string"}
    ]}"#;

    fn processor() -> RecordTransformProcessor {
        let schema = Arc::new(Schema::from_avro_text(SCHEMA).unwrap());
        let registry = Arc::new(SchemaRegistry::new());

        let reader = CsvReaderFactory::with_config(
            &CsvReaderConfig {
                name: "reader".to_string(),
                schema_access: SchemaAccessStrategy::SchemaTextProperty,
                schema_text: Some(SCHEMA.to_string()),
                schema_file: None,
                value_separator: "|".to_string(),
                quote_char: "\"".to_string(),
                first_line_is_header: false,
                trailing_delimiter: false,
                trim_fields: false,
            },
            SchemaResolver::new(
                SchemaAccessStrategy::SchemaTextProperty,
                Some(schema),
                Arc::clone(&registry),
            ),
        )
        .unwrap();

        let writer = CsvWriterFactory::with_config(
            &CsvWriterConfig {
                name: "writer".to_string(),
                schema_access: SchemaAccessStrategy::InheritRecordSchema,
                schema_text: None,
                schema_file: None,
                schema_write_strategy: SchemaWriteStrategy::NoSchema,
                value_separator: ",".to_string(),
                quote_char: "\"".to_string(),
                quote_mode: QuoteMode::Minimal,
                include_header_line: false,
                trailing_delimiter: false,
                record_separator: "\n".to_string(),
            },
            SchemaResolver::new(SchemaAccessStrategy::InheritRecordSchema, None, registry),
        )
        .unwrap();

        RecordTransformProcessor::new("test", Arc::new(reader), Arc::new(writer))
    }

    fn runtime_in(root: &Path) -> FlowRuntime {
        let config = RuntimeConfig {
            input_dir: root.join("in"),
            success_dir: root.join("success"),
            failure_dir: root.join("failure"),
            max_concurrent_cycles: 2,
            poll_interval_ms: 10,
        };
        FlowRuntime::new(processor(), config)
    }

    #[tokio::test]
    async fn test_run_once_routes_files() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = runtime_in(dir.path());
        runtime.prepare().await.unwrap();

        let input = dir.path().join("in");
        std::fs::write(
            input.join("good.csv"),
            "400|Y|23-01-05 10:30:00\n100|N|23-01-05 10:31:00\n",
        )
        .unwrap();
        std::fs::write(input.join("bad.csv"), "400|Y|yesterday\n").unwrap();
        std::fs::write(input.join(".hidden"), "ignored").unwrap();

        let summary = runtime.run_once().await.unwrap();
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.errors, 0);

        let output = std::fs::read_to_string(dir.path().join("success/good.csv")).unwrap();
        assert_eq!(output, "400,Y,20230105103000\n");

        let sidecar = std::fs::read_to_string(dir.path().join("success/good.csv.attributes.json"))
            .unwrap();
        let attributes: HashMap<String, String> = serde_json::from_str(&sidecar).unwrap();
        assert_eq!(attributes.get("record.count").map(String::as_str), Some("1"));
        assert_eq!(attributes.get("filename").map(String::as_str), Some("good.csv"));
        assert_eq!(attributes.get("file.size").map(String::as_str), Some("48"));

        assert_eq!(
            std::fs::read_to_string(dir.path().join("failure/bad.csv")).unwrap(),
            "400|Y|yesterday\n"
        );
        assert!(!input.join("good.csv").exists());
        assert!(!input.join("bad.csv").exists());
        assert!(input.join(".hidden").exists());
    }

    #[tokio::test]
    async fn test_run_once_on_empty_directory() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = runtime_in(dir.path());
        runtime.prepare().await.unwrap();

        let summary = runtime.run_once().await.unwrap();
        assert_eq!(summary, RunSummary::default());
    }

    #[tokio::test]
    async fn test_run_once_without_input_directory() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = runtime_in(dir.path());
        assert!(matches!(runtime.run_once().await, Err(ProcessError::Io(_))));
    }
}
