// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Metrics types for benchmark results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Categories of benchmarks supported by the framework.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BenchmarkCategory {
    /// Single-process ring write/read cycles
    RingBuffer,
    /// Round trips through a shared memory region
    SharedMemory,
    /// Round trips over a Unix domain socket
    UnixSocket,
}

impl std::fmt::Display for BenchmarkCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BenchmarkCategory::RingBuffer => write!(f, "ring_buffer"),
            BenchmarkCategory::SharedMemory => write!(f, "shared_memory"),
            BenchmarkCategory::UnixSocket => write!(f, "unix_socket"),
        }
    }
}

/// Latency distribution of one benchmark.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatencyMetrics {
    pub min_ns: u64,
    pub max_ns: u64,
    pub mean_ns: f64,
    pub median_ns: u64,
    pub p95_ns: u64,
    pub p99_ns: u64,
    pub std_dev_ns: f64,
}

impl LatencyMetrics {
    /// Calculate metrics from latency samples (in nanoseconds).
    pub fn from_samples(mut samples: Vec<u64>) -> Self {
        if samples.is_empty() {
            return Self {
                min_ns: 0,
                max_ns: 0,
                mean_ns: 0.0,
                median_ns: 0,
                p95_ns: 0,
                p99_ns: 0,
                std_dev_ns: 0.0,
            };
        }

        samples.sort_unstable();
        let len = samples.len();
        let percentile = |p: f64| samples[((len as f64 * p) as usize).min(len - 1)];

        let sum: u64 = samples.iter().sum();
        let mean_ns = sum as f64 / len as f64;
        let variance: f64 = samples
            .iter()
            .map(|&x| {
                let diff = x as f64 - mean_ns;
                diff * diff
            })
            .sum::<f64>()
            / len as f64;

        Self {
            min_ns: samples[0],
            max_ns: samples[len - 1],
            mean_ns,
            median_ns: samples[len / 2],
            p95_ns: percentile(0.95),
            p99_ns: percentile(0.99),
            std_dev_ns: variance.sqrt(),
        }
    }

    /// Format latency in human-readable form (auto-selects ns/μs/ms).
    pub fn format_latency(ns: u64) -> String {
        if ns < 1_000 {
            format!("{}ns", ns)
        } else if ns < 1_000_000 {
            format!("{:.2}μs", ns as f64 / 1_000.0)
        } else if ns < 1_000_000_000 {
            format!("{:.2}ms", ns as f64 / 1_000_000.0)
        } else {
            format!("{:.2}s", ns as f64 / 1_000_000_000.0)
        }
    }
}

/// A single benchmark result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkResult {
    pub name: String,
    pub category: BenchmarkCategory,
    pub payload_size_bytes: usize,
    pub iterations: u64,
    pub latency: LatencyMetrics,
}

impl BenchmarkResult {
    pub fn latency(
        name: impl Into<String>,
        category: BenchmarkCategory,
        payload_size_bytes: usize,
        samples: Vec<u64>,
    ) -> Self {
        let iterations = samples.len() as u64;
        Self {
            name: name.into(),
            category,
            payload_size_bytes,
            iterations,
            latency: LatencyMetrics::from_samples(samples),
        }
    }
}

/// Complete benchmark suite report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkReport {
    pub benchmark_suite: String,
    pub version: String,
    pub timestamp: DateTime<Utc>,
    pub ring_capacity: usize,
    pub results: Vec<BenchmarkResult>,
}

impl BenchmarkReport {
    pub fn new(ring_capacity: usize) -> Self {
        Self {
            benchmark_suite: "shmpipe-benchmarks".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: Utc::now(),
            ring_capacity,
            results: Vec::new(),
        }
    }

    pub fn add_result(&mut self, result: BenchmarkResult) {
        self.results.push(result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latency_metrics_from_samples() {
        let samples = vec![100, 200, 300, 400, 500, 600, 700, 800, 900, 1000];
        let metrics = LatencyMetrics::from_samples(samples);

        assert_eq!(metrics.min_ns, 100);
        assert_eq!(metrics.max_ns, 1000);
        assert_eq!(metrics.median_ns, 600);
        assert_eq!(metrics.p99_ns, 1000);
        assert!((metrics.mean_ns - 550.0).abs() < 0.01);
    }

    #[test]
    fn test_single_sample() {
        let metrics = LatencyMetrics::from_samples(vec![42]);
        assert_eq!(metrics.p95_ns, 42);
        assert_eq!(metrics.p99_ns, 42);
        assert_eq!(metrics.std_dev_ns, 0.0);
    }

    #[test]
    fn test_latency_format() {
        assert_eq!(LatencyMetrics::format_latency(500), "500ns");
        assert_eq!(LatencyMetrics::format_latency(1500), "1.50μs");
        assert_eq!(LatencyMetrics::format_latency(1_500_000), "1.50ms");
        assert_eq!(LatencyMetrics::format_latency(1_500_000_000), "1.50s");
    }

    #[test]
    fn test_benchmark_result_serialization() {
        let result = BenchmarkResult::latency(
            "shm_round_trip_64",
            BenchmarkCategory::SharedMemory,
            64,
            vec![100, 200, 300],
        );

        let json = serde_json::to_string_pretty(&result).unwrap();
        assert!(json.contains("shm_round_trip_64"));
        assert!(json.contains("shared_memory"));
        assert!(json.contains("payload_size_bytes"));
    }

    #[test]
    fn test_report_timestamp_round_trips() {
        let report = BenchmarkReport::new(4096);
        let json = serde_json::to_string(&report).unwrap();
        let parsed: BenchmarkReport = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.timestamp, report.timestamp);
        assert!(json.contains(&report.timestamp.format("%Y-%m-%d").to_string()));
    }
}
