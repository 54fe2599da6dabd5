//! Append-only sweep report.
//!
//! One line per sweep category: the category label followed by one `1`/`0`
//! token per repetition. Every token is flushed as soon as it is recorded,
//! so partial progress survives a crash and the file can be inspected
//! mid-sweep.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use thiserror::Error;

/// Errors from report writing.
#[derive(Debug, Error)]
pub enum ReportError {
    /// Underlying I/O error.
    #[error("report io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Incremental writer for the sweep report.
pub struct ReportWriter {
    file: File,
}

impl ReportWriter {
    /// Open the report for appending, creating it if absent.
    pub fn open(path: &Path) -> Result<Self, ReportError> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self { file })
    }

    /// Start a category line with its label.
    pub fn begin_category(&mut self, label: &str) -> Result<(), ReportError> {
        write!(self.file, "{}:", label)?;
        self.file.flush()?;
        Ok(())
    }

    /// Record one repetition's verdict (`1` = pass, `0` = fail) and flush.
    pub fn record(&mut self, pass: bool) -> Result<(), ReportError> {
        write!(self.file, " {}", if pass { 1 } else { 0 })?;
        self.file.flush()?;
        Ok(())
    }

    /// Terminate the current category line.
    pub fn end_category(&mut self) -> Result<(), ReportError> {
        writeln!(self.file)?;
        self.file.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_one_line_per_category() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.txt");
        let mut report = ReportWriter::open(&path).unwrap();

        for (label, verdicts) in [
            ("c2_s1_f0", vec![true, true, true]),
            ("c2_s3_f1", vec![true, false]),
            ("c2_s5_f2", vec![false]),
            ("c1_s1_f0", vec![true]),
            ("c1_s5_f0", vec![true, true]),
        ] {
            report.begin_category(label).unwrap();
            for v in verdicts {
                report.record(v).unwrap();
            }
            report.end_category().unwrap();
        }

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 5);
        assert_eq!(lines[0], "c2_s1_f0: 1 1 1");
        assert_eq!(lines[1], "c2_s3_f1: 1 0");
        assert_eq!(lines[2], "c2_s5_f2: 0");
    }

    #[test]
    fn report_readable_mid_category() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.txt");
        let mut report = ReportWriter::open(&path).unwrap();

        report.begin_category("c2_s5_f2").unwrap();
        report.record(true).unwrap();
        report.record(false).unwrap();

        // Not yet terminated; tokens must still be on disk.
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "c2_s5_f2: 1 0");

        report.record(true).unwrap();
        report.end_category().unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "c2_s5_f2: 1 0 1\n");
    }

    #[test]
    fn report_appends_across_writers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.txt");

        {
            let mut report = ReportWriter::open(&path).unwrap();
            report.begin_category("first").unwrap();
            report.record(true).unwrap();
            report.end_category().unwrap();
        }
        {
            let mut report = ReportWriter::open(&path).unwrap();
            report.begin_category("second").unwrap();
            report.record(false).unwrap();
            report.end_category().unwrap();
        }

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "first: 1\nsecond: 0\n");
    }
}
