// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! CLI tool to run the latency benchmarks and write a JSON report.

use clap::Parser;
use shmpipe_benchmark::{
    BenchmarkCategory, BenchmarkHarness, BenchmarkReport, BenchmarkResult, JsonReporter,
    LatencyMetrics, ShmEchoPair, UnixEchoPair,
};
use shmpipe_core::shm::LocalRing;
use shmpipe_core::{ConfigLoader, ShmConfig};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "run_benchmarks")]
#[command(about = "Run shmpipe latency benchmarks and generate a JSON report")]
struct Args {
    /// Output directory for benchmark data
    #[arg(short, long, default_value = "data")]
    output: PathBuf,

    /// Transport configuration (defaults apply when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of iterations for each benchmark
    #[arg(short, long, default_value_t = 10_000)]
    iterations: u64,

    /// Run in quick mode (fewer iterations)
    #[arg(long)]
    quick: bool,
}

const PAYLOAD_SIZES: &[usize] = &[64, 1024, 4096, 16384];

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let iterations = if args.quick { 100 } else { args.iterations };
    let config = match &args.config {
        Some(path) => ConfigLoader::load_file(path)?,
        None => ShmConfig::default(),
    };

    println!("shmpipe Benchmark Suite");
    println!("=======================");
    println!("Output directory: {:?}", args.output);
    println!("Iterations: {}", iterations);
    println!("Ring capacity: {}", config.ring_capacity);
    println!();

    let reporter = JsonReporter::new(&args.output)?;
    let mut report = BenchmarkReport::new(config.ring_capacity.bytes());
    let harness = BenchmarkHarness::new()
        .warmup(iterations / 10)
        .iterations(iterations);

    println!("Running ring buffer benchmarks...");
    let mut ring = LocalRing::new(config.ring_capacity.bytes())?;
    let usable = config.ring_capacity.usable();
    for &size in PAYLOAD_SIZES.iter().filter(|&&s| s <= usable) {
        let payload = vec![0xABu8; size];
        let mut out = vec![0u8; size];
        let (mut producer, mut consumer) = ring.split();
        let samples = harness.run(|| {
            if producer.write(&payload).is_ok() {
                consumer.read(&mut out);
            }
        });
        record(&mut report, "ring_buffer_cycle", BenchmarkCategory::RingBuffer, size, samples);
    }

    println!("Running shared memory round trips...");
    let mut shm = ShmEchoPair::new(config.clone())?;
    for &size in PAYLOAD_SIZES {
        let payload = vec![0xABu8; size];
        let mut out = vec![0u8; size];
        let samples = harness.run(|| {
            if let Err(e) = shm.round_trip(&payload, &mut out) {
                eprintln!("shared memory round trip failed: {}", e);
            }
        });
        record(&mut report, "shm_round_trip", BenchmarkCategory::SharedMemory, size, samples);
    }

    println!("Running Unix socket round trips...");
    let mut unix = UnixEchoPair::new()?;
    for &size in PAYLOAD_SIZES {
        let payload = vec![0xABu8; size];
        let mut out = vec![0u8; size];
        let samples = harness.run(|| {
            if let Err(e) = unix.round_trip(&payload, &mut out) {
                eprintln!("unix socket round trip failed: {}", e);
            }
        });
        record(&mut report, "unix_round_trip", BenchmarkCategory::UnixSocket, size, samples);
    }

    let path = reporter.save(&report)?;
    println!();
    println!("Benchmark report saved to: {:?}", path);
    println!();
    print_summary(&report);

    Ok(())
}

fn record(
    report: &mut BenchmarkReport,
    prefix: &str,
    category: BenchmarkCategory,
    size: usize,
    samples: Vec<u64>,
) {
    let name = format!("{}_{}", prefix, size);
    println!("  ✓ {}", name);
    report.add_result(BenchmarkResult::latency(name, category, size, samples));
}

fn print_summary(report: &BenchmarkReport) {
    println!("Summary");
    println!("-------");
    println!();

    for result in &report.results {
        println!(
            "{}: median={}, p99={}",
            result.name,
            LatencyMetrics::format_latency(result.latency.median_ns),
            LatencyMetrics::format_latency(result.latency.p99_ns)
        );
    }
}
