//! # Received-Message Log
//!
//! Append-only record of every delivery a run observed, one JSON object per
//! line. The writer is shared by all consumer workers of a run behind a
//! single lock so concurrent appends never interleave mid-record. The
//! analyzer reads the same file back offline.

use crate::error::{Result, WorkloadError};
use broker_client::{current_timestamp_ns, WireMessage};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// One delivered message as persisted in the output log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceivedMessageRecord {
    /// Sender-assigned monotonic identifier
    pub sequence: u64,
    /// When this consumer saw the message (nanoseconds since epoch)
    pub received_at_ns: u64,
    /// Message body as delivered
    pub body: String,
}

impl ReceivedMessageRecord {
    /// Record a delivery, stamped with the current time
    pub fn new(message: &WireMessage) -> Self {
        Self {
            sequence: message.sequence,
            received_at_ns: current_timestamp_ns(),
            body: message.body.clone(),
        }
    }
}

/// Shared append-only writer over the log file
#[derive(Debug)]
pub struct OutputLog {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl OutputLog {
    /// Open the log for appending, creating the file when absent.
    ///
    /// With `truncate` set, existing contents are discarded first (a receive
    /// run that prints each message starts from an empty log).
    pub fn prepare(path: impl Into<PathBuf>, truncate: bool) -> Result<Self> {
        let path = path.into();
        let file = if truncate {
            OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&path)?
        } else {
            OpenOptions::new().append(true).create(true).open(&path)?
        };
        Ok(Self {
            path,
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    /// Append one record as a single line and flush.
    ///
    /// The lock spans serialize-write-flush, so lines from concurrent workers
    /// never interleave.
    pub fn append(&self, record: &ReceivedMessageRecord) -> Result<()> {
        let line = serde_json::to_string(record)
            .map_err(|e| WorkloadError::Io(std::io::Error::other(e)))?;
        let mut writer = self.writer.lock();
        writeln!(writer, "{line}")?;
        writer.flush()?;
        Ok(())
    }

    /// Path of the underlying file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Read every record in file order. Blank lines are skipped; a line that is
/// not a record fails with its 1-based line number.
pub fn read_records(path: &Path) -> Result<Vec<ReceivedMessageRecord>> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut records = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record: ReceivedMessageRecord =
            serde_json::from_str(&line).map_err(|e| WorkloadError::MalformedRecord {
                line: index + 1,
                reason: e.to_string(),
            })?;
        records.push(record);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn record(sequence: u64) -> ReceivedMessageRecord {
        ReceivedMessageRecord::new(&WireMessage::new(sequence, format!("m{sequence}")))
    }

    #[test]
    fn appends_and_reads_back_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("received.log");

        let log = OutputLog::prepare(&path, false).unwrap();
        for seq in [3, 1, 2] {
            log.append(&record(seq)).unwrap();
        }

        let records = read_records(&path).unwrap();
        let sequences: Vec<u64> = records.iter().map(|r| r.sequence).collect();
        assert_eq!(sequences, vec![3, 1, 2]);
        assert_eq!(records[0].body, "m3");
    }

    #[test]
    fn truncate_discards_previous_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("received.log");

        let log = OutputLog::prepare(&path, false).unwrap();
        log.append(&record(1)).unwrap();
        drop(log);

        let log = OutputLog::prepare(&path, true).unwrap();
        log.append(&record(2)).unwrap();
        drop(log);

        let records = read_records(&path).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].sequence, 2);
    }

    #[test]
    fn malformed_line_is_reported_with_its_number() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("received.log");
        std::fs::write(
            &path,
            "{\"sequence\":1,\"received_at_ns\":0,\"body\":\"ok\"}\nnot json\n",
        )
        .unwrap();

        let err = read_records(&path).unwrap_err();
        match err {
            WorkloadError::MalformedRecord { line, .. } => assert_eq!(line, 2),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_appends_never_interleave() {
        const WRITERS: u64 = 4;
        const PER_WRITER: u64 = 100;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("received.log");
        let log = Arc::new(OutputLog::prepare(&path, false).unwrap());

        let mut handles = Vec::new();
        for writer in 0..WRITERS {
            let log = Arc::clone(&log);
            handles.push(tokio::spawn(async move {
                for i in 0..PER_WRITER {
                    log.append(&record(writer * PER_WRITER + i + 1)).unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        // Every line parses cleanly and every sequence shows up exactly once.
        let records = read_records(&path).unwrap();
        assert_eq!(records.len(), (WRITERS * PER_WRITER) as usize);
        let mut sequences: Vec<u64> = records.iter().map(|r| r.sequence).collect();
        sequences.sort_unstable();
        assert_eq!(sequences, (1..=WRITERS * PER_WRITER).collect::<Vec<_>>());
    }
}
