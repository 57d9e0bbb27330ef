//! # Output Log Analysis
//!
//! Offline pass over the received-message log: duplicate sets, missing-id
//! sets against an expected total, an order-preservation verdict, and sorted
//! views. Operates on the file alone; no broker connection involved.

use crate::error::{ConfigError, Result};
use crate::output_log::{read_records, ReceivedMessageRecord};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Caller-visible analyse sub-operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisOp {
    /// Dump sequence → body for every record
    PrintMessages,
    /// Report ids delivered more than once
    PrintDuplicates,
    /// Report ids absent from `1..=expected`
    PrintMissing {
        /// Total number of messages the run was supposed to deliver
        expected: u64,
    },
    /// Report all ids in ascending order
    PrintSorted,
    /// Report whether file order is non-decreasing
    CheckOrder,
    /// Truncate the log to empty
    ClearFile,
}

impl AnalysisOp {
    /// Parse an operation name, attaching the expected total where one is
    /// required
    pub fn parse(name: &str, expected: Option<u64>) -> std::result::Result<Self, ConfigError> {
        match name {
            "printMessages" => Ok(AnalysisOp::PrintMessages),
            "printDuplicates" => Ok(AnalysisOp::PrintDuplicates),
            "printMissing" => {
                let expected = expected.ok_or_else(|| ConfigError::InvalidValue {
                    key: "expected".to_string(),
                    value: String::new(),
                })?;
                Ok(AnalysisOp::PrintMissing { expected })
            }
            "printSorted" => Ok(AnalysisOp::PrintSorted),
            "checkOrder" => Ok(AnalysisOp::CheckOrder),
            "clearFile" => Ok(AnalysisOp::ClearFile),
            other => Err(ConfigError::UnknownOperation(other.to_string())),
        }
    }
}

impl FromStr for AnalysisOp {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        // printMissing needs its expected total via `parse`.
        AnalysisOp::parse(s, None)
    }
}

/// Everything the analyzer can say about one log file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisReport {
    /// Ids seen more than once, with their occurrence counts
    pub duplicates: BTreeMap<u64, usize>,
    /// Ids in `1..=expected` that never showed up (empty when no expected
    /// total was given)
    pub missing: BTreeSet<u64>,
    /// True iff ids appear in non-decreasing file order
    pub order_preserved: bool,
    /// All observed ids, ascending, duplicates included
    pub sorted_view: Vec<u64>,
    /// Number of records in the log
    pub total_records: usize,
}

/// Offline reader over a run's output log
#[derive(Debug, Clone)]
pub struct OutputLogAnalyzer {
    path: PathBuf,
}

impl OutputLogAnalyzer {
    /// Analyzer over the given log file
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the log file under analysis
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All records in file order
    pub fn records(&self) -> Result<Vec<ReceivedMessageRecord>> {
        read_records(&self.path)
    }

    /// Ids delivered more than once, with occurrence counts
    pub fn duplicates(&self) -> Result<BTreeMap<u64, usize>> {
        let mut counts: HashMap<u64, usize> = HashMap::new();
        for record in self.records()? {
            *counts.entry(record.sequence).or_insert(0) += 1;
        }
        Ok(counts
            .into_iter()
            .filter(|(_, count)| *count > 1)
            .collect())
    }

    /// Ids in `1..=expected` absent from the log
    pub fn missing(&self, expected: u64) -> Result<BTreeSet<u64>> {
        let observed: BTreeSet<u64> = self.records()?.iter().map(|r| r.sequence).collect();
        Ok((1..=expected).filter(|id| !observed.contains(id)).collect())
    }

    /// True iff ids are non-decreasing in file order; a single inversion
    /// anywhere fails the check
    pub fn order_preserved(&self) -> Result<bool> {
        let mut previous = 0u64;
        for record in self.records()? {
            if record.sequence < previous {
                return Ok(false);
            }
            previous = record.sequence;
        }
        Ok(true)
    }

    /// All observed ids, ascending
    pub fn sorted_view(&self) -> Result<Vec<u64>> {
        let mut ids: Vec<u64> = self.records()?.iter().map(|r| r.sequence).collect();
        ids.sort_unstable();
        Ok(ids)
    }

    /// Truncate the log to empty, resetting state between runs
    pub fn clear_file(&self) -> Result<()> {
        File::create(&self.path)?;
        Ok(())
    }

    /// One pass producing the full report
    pub fn analyze(&self, expected_total: Option<u64>) -> Result<AnalysisReport> {
        let records = self.records()?;

        let mut counts: HashMap<u64, usize> = HashMap::new();
        let mut order_preserved = true;
        let mut previous = 0u64;
        for record in &records {
            *counts.entry(record.sequence).or_insert(0) += 1;
            if record.sequence < previous {
                order_preserved = false;
            }
            previous = record.sequence;
        }

        let observed: BTreeSet<u64> = counts.keys().copied().collect();
        let missing = expected_total
            .map(|expected| (1..=expected).filter(|id| !observed.contains(id)).collect())
            .unwrap_or_default();

        let mut sorted_view: Vec<u64> = records.iter().map(|r| r.sequence).collect();
        sorted_view.sort_unstable();

        Ok(AnalysisReport {
            duplicates: counts
                .into_iter()
                .filter(|(_, count)| *count > 1)
                .collect(),
            missing,
            order_preserved,
            sorted_view,
            total_records: records.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output_log::OutputLog;
    use broker_client::WireMessage;
    use tempfile::TempDir;

    fn log_with(sequences: &[u64]) -> (TempDir, OutputLogAnalyzer) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("received.log");
        let log = OutputLog::prepare(&path, false).unwrap();
        for &seq in sequences {
            log.append(&crate::output_log::ReceivedMessageRecord::new(
                &WireMessage::new(seq, format!("m{seq}")),
            ))
            .unwrap();
        }
        (dir, OutputLogAnalyzer::new(path))
    }

    #[test]
    fn reports_duplicates_with_occurrence_counts() {
        let (_dir, analyzer) = log_with(&[1, 2, 2, 3, 2]);
        let duplicates = analyzer.duplicates().unwrap();
        assert_eq!(duplicates.len(), 1);
        assert_eq!(duplicates.get(&2), Some(&3));
    }

    #[test]
    fn reports_missing_ids_against_expected_total() {
        let (_dir, analyzer) = log_with(&[1, 2, 4]);
        let missing = analyzer.missing(4).unwrap();
        assert_eq!(missing, BTreeSet::from([3]));
    }

    #[test]
    fn order_check_accepts_non_decreasing_and_flags_one_inversion() {
        let (_dir, analyzer) = log_with(&[1, 2, 3, 4]);
        assert!(analyzer.order_preserved().unwrap());

        let (_dir, analyzer) = log_with(&[1, 3, 2, 4]);
        assert!(!analyzer.order_preserved().unwrap());
    }

    #[test]
    fn repeated_ids_do_not_break_order() {
        let (_dir, analyzer) = log_with(&[1, 2, 2, 3]);
        assert!(analyzer.order_preserved().unwrap());
    }

    #[test]
    fn sorted_view_keeps_duplicates() {
        let (_dir, analyzer) = log_with(&[4, 1, 3, 1]);
        assert_eq!(analyzer.sorted_view().unwrap(), vec![1, 1, 3, 4]);
    }

    #[test]
    fn full_report_combines_all_checks() {
        let (_dir, analyzer) = log_with(&[1, 3, 3, 2]);
        let report = analyzer.analyze(Some(5)).unwrap();
        assert_eq!(report.total_records, 4);
        assert_eq!(report.duplicates.get(&3), Some(&2));
        assert_eq!(report.missing, BTreeSet::from([4, 5]));
        assert!(!report.order_preserved);
        assert_eq!(report.sorted_view, vec![1, 2, 3, 3]);
    }

    #[test]
    fn clear_file_truncates() {
        let (_dir, analyzer) = log_with(&[1, 2, 3]);
        analyzer.clear_file().unwrap();
        assert!(analyzer.records().unwrap().is_empty());
    }

    #[test]
    fn empty_log_is_ordered_and_complete_at_zero() {
        let (_dir, analyzer) = log_with(&[]);
        let report = analyzer.analyze(None).unwrap();
        assert!(report.order_preserved);
        assert!(report.duplicates.is_empty());
        assert!(report.missing.is_empty());
        assert_eq!(report.total_records, 0);
    }

    #[test]
    fn operation_names_parse() {
        assert_eq!(
            AnalysisOp::parse("printDuplicates", None).unwrap(),
            AnalysisOp::PrintDuplicates
        );
        assert_eq!(
            AnalysisOp::parse("printMissing", Some(10)).unwrap(),
            AnalysisOp::PrintMissing { expected: 10 }
        );
        assert!(AnalysisOp::parse("printMissing", None).is_err());
        assert!(matches!(
            AnalysisOp::parse("explode", None),
            Err(ConfigError::UnknownOperation(_))
        ));
    }
}
