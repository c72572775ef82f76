//! Message-driven ingestion
//!
//! [`StreamProcessor`] consumes the message sequence strictly in order. SCHEMA
//! messages feed the [`SchemaRegistry`], RECORD messages are validated,
//! flattened and appended to the stream's buffer file, and STATE messages set
//! the pending checkpoint. A RECORD always clears the pending checkpoint, so
//! the checkpoint returned at the end is only set if a STATE followed the last
//! RECORD.
//!
//! The processor only stages files. Shipping them is the upload stage's job,
//! and the checkpoint must not be emitted before that succeeds.

use crate::buffer::{self, CsvFormat};
use crate::config::TargetConfig;
use crate::error::{Result, TargetError};
use crate::flatten::{flatten_record, FlattenOptions};
use crate::message::{Message, RecordMessage, SchemaMessage};
use crate::metadata;
use crate::schema::SchemaRegistry;
use crate::target_key;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::io::BufRead;
use std::path::PathBuf;
use tracing::{debug, error, info, instrument, warn};

/// Run timestamp format used in buffer file names and keys
pub const RUN_TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%S";

/// Time source for run timestamps and lineage values
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock frozen at one instant
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// A staged file and the key it will be uploaded to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BufferFile {
    pub path: PathBuf,
    pub key: String,
}

/// Settings the processor needs from the target configuration
#[derive(Debug, Clone)]
pub struct ProcessorOptions {
    pub temp_dir: PathBuf,
    pub format: CsvFormat,
    pub add_metadata_columns: bool,
    pub naming_convention: Option<String>,
    pub s3_key_prefix: String,
    pub flatten: FlattenOptions,
}

impl From<&TargetConfig> for ProcessorOptions {
    fn from(config: &TargetConfig) -> Self {
        Self {
            temp_dir: config.temp_dir(),
            format: CsvFormat {
                delimiter: config.delimiter(),
                quote: config.quotechar(),
            },
            add_metadata_columns: config.add_metadata_columns,
            naming_convention: config.naming_convention.clone(),
            s3_key_prefix: config.s3_key_prefix().to_string(),
            flatten: config.flatten_options(),
        }
    }
}

/// What a completed pass over the input produced
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessOutcome {
    /// Last checkpoint not invalidated by a later record
    pub state: Option<Value>,
    /// Staged files in first-seen order, each listed once
    pub files: Vec<BufferFile>,
}

pub struct StreamProcessor {
    options: ProcessorOptions,
    clock: Box<dyn Clock>,
    registry: SchemaRegistry,
    headers: HashMap<String, Vec<String>>,
    files: Vec<BufferFile>,
    registered: HashSet<BufferFile>,
    state: Option<Value>,
    run_timestamp: String,
    run_date: String,
}

impl StreamProcessor {
    /// Create a processor; the scratch directory is created if missing
    pub fn new(options: ProcessorOptions, clock: Box<dyn Clock>) -> Result<Self> {
        std::fs::create_dir_all(&options.temp_dir)?;

        let started = clock.now();
        let run_timestamp = started.format(RUN_TIMESTAMP_FORMAT).to_string();
        let run_date = started.format("%Y-%m-%d").to_string();
        debug!(temp_dir = %options.temp_dir.display(), %run_timestamp, "Stream processor ready");

        Ok(Self {
            registry: SchemaRegistry::new(options.add_metadata_columns),
            options,
            clock,
            headers: HashMap::new(),
            files: Vec::new(),
            registered: HashSet::new(),
            state: None,
            run_timestamp,
            run_date,
        })
    }

    pub fn run_timestamp(&self) -> &str {
        &self.run_timestamp
    }

    /// Consume every line of `input` and return the outcome
    ///
    /// Blank lines are skipped. Any fatal error aborts the pass; files staged
    /// so far are left on disk.
    #[instrument(skip_all, fields(run = %self.run_timestamp))]
    pub fn process<R: BufRead>(mut self, input: R) -> Result<ProcessOutcome> {
        let mut count = 0usize;
        for (index, line) in input.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            self.process_line(&line, index + 1)?;
            count += 1;
        }

        info!(messages = count, files = self.files.len(), "Finished reading input");
        Ok(self.finish())
    }

    /// Decode and handle one input line
    pub fn process_line(&mut self, line: &str, line_number: usize) -> Result<()> {
        let message = Message::parse(line, line_number).inspect_err(|e| {
            error!(line = line_number, content = %line, error = %e, "Unable to parse message");
        })?;
        self.handle(message)
    }

    /// Apply one decoded message
    pub fn handle(&mut self, message: Message) -> Result<()> {
        match message {
            Message::Schema(schema) => self.handle_schema(schema),
            Message::Record(record) => self.handle_record(record),
            Message::State(state) => {
                debug!(state = %state.value, "Setting state");
                self.state = (!state.value.is_null()).then_some(state.value);
                Ok(())
            },
            Message::ActivateVersion(activate) => {
                debug!(stream = %activate.stream, version = activate.version, "ACTIVATE_VERSION message");
                Ok(())
            },
            Message::Unknown { message_type, raw } => {
                warn!(%message_type, message = %raw, "Unknown message type");
                Ok(())
            },
        }
    }

    /// Checkpoint and staged files as of now
    pub fn finish(self) -> ProcessOutcome {
        ProcessOutcome {
            state: self.state,
            files: self.files,
        }
    }

    fn handle_schema(&mut self, message: SchemaMessage) -> Result<()> {
        self.registry.declare(
            &message.stream,
            message.schema,
            message.key_properties,
            message.bookmark_properties,
        );
        Ok(())
    }

    fn handle_record(&mut self, message: RecordMessage) -> Result<()> {
        let stream = message.stream.as_str();
        let key_properties = self.registry.lookup(stream)?.key_properties.clone();

        match self.registry.validate(stream, &message.record) {
            Ok(()) => {},
            Err(e) if e.is_recoverable() => {
                warn!(stream, error = %e, "Record failed validation, writing it anyway");
            },
            Err(e) => {
                error!(stream, record = ?message.record, error = %e, "Record cannot be validated");
                return Err(e);
            },
        }

        let record = if self.options.add_metadata_columns {
            metadata::add_metadata_values_to_record(&message, &key_properties, self.clock.now())
        } else {
            metadata::remove_metadata_values_from_record(&message)
        };
        let flattened = flatten_record(&record, &self.options.flatten);

        let file = self.buffer_file(stream);
        let file_is_empty = buffer::is_empty(&file.path);

        if !self.headers.contains_key(stream) {
            let recovered = if file_is_empty {
                None
            } else {
                buffer::read_header(&file.path, self.options.format)?
            };
            let header = recovered.unwrap_or_else(|| flattened.keys().cloned().collect());
            debug!(stream, columns = header.len(), "Header fixed for stream");
            self.headers.insert(stream.to_string(), header);
        }

        let header = self
            .headers
            .get(stream)
            .ok_or_else(|| TargetError::UnknownStream(stream.to_string()))?;
        buffer::append_row(&file.path, header, &flattened, file_is_empty, self.options.format)?;

        if !self.registered.contains(&file) {
            debug!(path = %file.path.display(), key = %file.key, "Registered buffer file");
            self.registered.insert(file.clone());
            self.files.push(file);
        }

        self.state = None;
        Ok(())
    }

    fn buffer_file(&self, stream: &str) -> BufferFile {
        let path = self
            .options
            .temp_dir
            .join(format!("{}-{}.csv", stream, self.run_timestamp));
        let key = target_key::resolve_with_date(
            stream,
            &self.run_timestamp,
            &self.run_date,
            &self.options.s3_key_prefix,
            self.options.naming_convention.as_deref(),
        );
        BufferFile { path, key }
    }
}
