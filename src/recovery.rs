//! # Recovery Log
//!
//! Durable append-only journal of every accepted input message: its header,
//! the sequence destinations it produced, and its raw payload. On restart a
//! worker replays the journal through its own processing path before
//! touching the broker, rebuilding accumulator state, duplicate-filter
//! watermarks, and outbound counters exactly as they were.
//!
//! One CSV line per record: sequence id, client session, origin, kind,
//! destination count, each destination, raw payload bytes.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use csv::{ByteRecord, ReaderBuilder, WriterBuilder};

use crate::error::{RecoveryError, RecoveryResult};
use crate::messaging::header::{Header, MessageKind, OriginStage};
use crate::sequence::{SequenceDestination, SequenceSource};

/// One journaled input message
#[derive(Debug, Clone, PartialEq)]
pub struct RecoveryRecord {
    pub header: Header,
    pub destinations: Vec<SequenceDestination>,
    pub payload: Vec<u8>,
}

impl RecoveryRecord {
    pub fn new(header: Header, destinations: Vec<SequenceDestination>, payload: Vec<u8>) -> Self {
        Self {
            header,
            destinations,
            payload,
        }
    }

    fn to_byte_record(&self) -> ByteRecord {
        let mut record = ByteRecord::new();
        record.push_field(self.header.sequence.to_string().as_bytes());
        record.push_field(self.header.client_id.as_bytes());
        record.push_field(self.header.origin.as_u8().to_string().as_bytes());
        record.push_field(self.header.kind.as_u8().to_string().as_bytes());
        record.push_field(self.destinations.len().to_string().as_bytes());
        for destination in &self.destinations {
            record.push_field(destination.to_string().as_bytes());
        }
        record.push_field(&self.payload);
        record
    }

    fn from_byte_record(record: &ByteRecord, line: u64) -> RecoveryResult<Self> {
        let text = |index: usize| -> RecoveryResult<&str> {
            let field = record
                .get(index)
                .ok_or_else(|| RecoveryError::malformed_record(line, "missing field"))?;
            std::str::from_utf8(field)
                .map_err(|_| RecoveryError::malformed_record(line, "non-utf8 field"))
        };

        let sequence = SequenceSource::parse(text(0)?)
            .map_err(|e| RecoveryError::malformed_record(line, e.to_string()))?;
        let client_id = text(1)?.to_string();
        let origin = parse_u8(text(2)?, line).and_then(|v| {
            OriginStage::from_u8(v).map_err(|e| RecoveryError::malformed_record(line, e.to_string()))
        })?;
        let kind = parse_u8(text(3)?, line).and_then(|v| {
            MessageKind::from_u8(v).map_err(|e| RecoveryError::malformed_record(line, e.to_string()))
        })?;
        let count: usize = text(4)?
            .parse()
            .map_err(|_| RecoveryError::malformed_record(line, "bad destination count"))?;

        if record.len() != 6 + count {
            return Err(RecoveryError::malformed_record(
                line,
                format!("expected {} fields, found {}", 6 + count, record.len()),
            ));
        }

        let mut destinations = Vec::with_capacity(count);
        for i in 0..count {
            let destination = SequenceDestination::parse(text(5 + i)?)
                .map_err(|e| RecoveryError::malformed_record(line, e.to_string()))?;
            destinations.push(destination);
        }

        let payload = record
            .get(5 + count)
            .ok_or_else(|| RecoveryError::malformed_record(line, "missing payload"))?
            .to_vec();

        let header = Header {
            kind,
            client_id,
            origin,
            sequence,
        };
        Ok(Self {
            header,
            destinations,
            payload,
        })
    }
}

fn parse_u8(value: &str, line: u64) -> RecoveryResult<u8> {
    value
        .parse::<u8>()
        .map_err(|_| RecoveryError::malformed_record(line, format!("bad number: {}", value)))
}

/// Append-only journal backing one worker
pub struct RecoveryLog {
    path: PathBuf,
    writer: csv::Writer<File>,
}

impl RecoveryLog {
    /// Open (creating if needed) the journal at `path`.
    pub fn open(path: impl AsRef<Path>) -> RecoveryResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| RecoveryError::open(path.display().to_string(), e.to_string()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| RecoveryError::open(path.display().to_string(), e.to_string()))?;
        let writer = WriterBuilder::new().flexible(true).from_writer(file);
        Ok(Self { path, writer })
    }

    /// Append one record and flush it to the file before returning.
    pub fn append(&mut self, record: &RecoveryRecord) -> RecoveryResult<()> {
        self.writer
            .write_byte_record(&record.to_byte_record())
            .map_err(|e| RecoveryError::append(e.to_string()))?;
        self.writer
            .flush()
            .map_err(|e| RecoveryError::append(e.to_string()))
    }

    /// Read every journaled record in append order.
    pub fn replay(&self) -> RecoveryResult<Vec<RecoveryRecord>> {
        let file = File::open(&self.path)
            .map_err(|e| RecoveryError::open(self.path.display().to_string(), e.to_string()))?;
        let mut reader = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(file);

        let mut records = Vec::new();
        let mut raw = ByteRecord::new();
        let mut line = 0u64;
        loop {
            line += 1;
            match reader.read_byte_record(&mut raw) {
                Ok(true) => records.push(RecoveryRecord::from_byte_record(&raw, line)?),
                Ok(false) => break,
                Err(e) => return Err(RecoveryError::malformed_record(line, e.to_string())),
            }
        }
        Ok(records)
    }
}
