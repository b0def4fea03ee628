// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! shmpipe CLI
//!
//! Command-line interface for checking configurations and exercising the
//! shared memory transport.

use clap::{Parser, Subcommand};

mod commands;

/// shmpipe - Shared memory fast path for socket connections
#[derive(Parser)]
#[command(name = "shmpipe")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate a configuration file
    Validate {
        /// Path to the configuration file
        file: String,
    },

    /// Run a client and an echo peer over a socketpair, upgraded to shared memory
    Loopback {
        /// Configuration file path (defaults apply when omitted)
        #[arg(short, long)]
        config: Option<String>,

        /// Number of messages to send
        #[arg(short, long, default_value_t = 10_000)]
        messages: usize,

        /// Size of each message in bytes
        #[arg(short, long, default_value_t = 64)]
        size: usize,

        /// Use non-blocking shared memory I/O on the client
        #[arg(long)]
        non_blocking: bool,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt().with_env_filter(log_level).init();

    match cli.command {
        Commands::Validate { file } => commands::validate::execute(&file),
        Commands::Loopback {
            config,
            messages,
            size,
            non_blocking,
        } => commands::loopback::execute(config.as_deref(), messages, size, non_blocking),
    }
}
