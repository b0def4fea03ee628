// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! shmpipe Benchmarking Framework
//!
//! Measures the shared memory transport against the Unix socket it replaces.
//!
//! # Benchmark Categories
//!
//! - **Ring Buffer**: single-process write/read cycles at various payload sizes
//! - **Shared Memory Round Trip**: client to echo peer and back through a region
//! - **Unix Socket Round Trip**: the same echo over the primary transport
//!
//! # Data Output
//!
//! `run_benchmarks` writes a JSON report with latency percentiles per benchmark.

pub mod echo;
pub mod harness;
pub mod metrics;
pub mod reporter;

pub use echo::{ShmEchoPair, UnixEchoPair};
pub use harness::BenchmarkHarness;
pub use metrics::{BenchmarkCategory, BenchmarkReport, BenchmarkResult, LatencyMetrics};
pub use reporter::JsonReporter;
