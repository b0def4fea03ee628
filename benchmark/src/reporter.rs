// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! JSON report generation for benchmark results.

use crate::metrics::BenchmarkReport;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur during report generation.
#[derive(Debug, Error)]
pub enum ReporterError {
    #[error("Report I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize report: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// JSON reporter for benchmark results.
pub struct JsonReporter {
    output_dir: PathBuf,
}

impl JsonReporter {
    /// Create a reporter writing into `output_dir`, creating it if needed.
    pub fn new(output_dir: impl AsRef<Path>) -> Result<Self, ReporterError> {
        let output_dir = output_dir.as_ref().to_path_buf();
        fs::create_dir_all(&output_dir)?;
        Ok(Self { output_dir })
    }

    /// Save a report; returns the path of the created file.
    pub fn save(&self, report: &BenchmarkReport) -> Result<PathBuf, ReporterError> {
        let filepath = self.output_dir.join(format!(
            "shmpipe_{}.json",
            report.timestamp.format("%Y%m%dT%H%M%S")
        ));
        let writer = BufWriter::new(File::create(&filepath)?);
        serde_json::to_writer_pretty(writer, report)?;
        Ok(filepath)
    }

    /// Load an existing report from a file.
    pub fn load(path: impl AsRef<Path>) -> Result<BenchmarkReport, ReporterError> {
        let file = File::open(path)?;
        Ok(serde_json::from_reader(file)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{BenchmarkCategory, BenchmarkResult};
    use tempfile::TempDir;

    #[test]
    fn test_reporter_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let reporter = JsonReporter::new(temp_dir.path().join("data")).unwrap();

        let mut report = BenchmarkReport::new(4096);
        report.add_result(BenchmarkResult::latency(
            "ring_buffer_cycle_64",
            BenchmarkCategory::RingBuffer,
            64,
            vec![100, 200, 300],
        ));

        let path = reporter.save(&report).unwrap();
        assert!(path.exists());
        let expected = format!("shmpipe_{}.json", report.timestamp.format("%Y%m%dT%H%M%S"));
        assert_eq!(path.file_name().unwrap().to_str().unwrap(), expected);

        let loaded = JsonReporter::load(&path).unwrap();
        assert_eq!(loaded.ring_capacity, 4096);
        assert_eq!(loaded.timestamp, report.timestamp);
        assert_eq!(loaded.results.len(), 1);
        assert_eq!(loaded.results[0].name, "ring_buffer_cycle_64");
    }
}
