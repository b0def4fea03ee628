// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `shmpipe validate` command - Validate configuration file.

use shmpipe_core::shm::region_size;
use shmpipe_core::ConfigLoader;

pub fn execute(file: &str) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!(file = %file, "Validating configuration");

    match ConfigLoader::load_file(file) {
        Ok(config) => {
            println!("✓ Configuration is valid");
            println!();
            println!("Shared Memory Settings:");
            println!(
                "  Ring Capacity:          {} ({} usable, region {} bytes)",
                config.ring_capacity,
                config.ring_capacity.usable(),
                region_size(config.ring_capacity.bytes())
            );
            println!("  Liveness Interval:      {}", config.liveness_interval);
            println!(
                "  Atomic Write Threshold: {} bytes",
                config.atomic_write_threshold
            );
            println!("  Protocol Version:       {}", config.protocol_version);
            println!("  Name Prefix:            {}", config.name_prefix);
            println!(
                "  I/O Mode:               {}",
                if config.blocking { "blocking" } else { "non-blocking" }
            );
            println!();
            println!("Effective YAML:");
            print!("{}", serde_yaml::to_string(&config)?);
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Configuration validation failed:");
            eprintln!("  {}", e);
            std::process::exit(1);
        }
    }
}
