//! Sandbox binary
//!
//! Main entry point for the typeless erased box sandbox.

use std::fs;

use anyhow::{Context, Result};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use typeless_core::CapabilityRegistry;
use typeless_sandbox::{demo, registry_init, Config};

fn main() -> Result<()> {
    // Parse configuration
    let config = Config::load()?;

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.log_level()))
        .init();

    // Validate configuration
    config.validate()?;

    // Register every type that may appear on the wire
    let registry = CapabilityRegistry::global();
    registry_init::initialize_registry(&registry);

    let bytes = match &config.input {
        Some(path) => fs::read(path)
            .with_context(|| format!("failed to read stream {}", path.display()))?,
        None => {
            let stream = demo::run_scenario(&registry, config.rounds());
            if let Some(path) = &config.output {
                fs::write(path, stream.data())
                    .with_context(|| format!("failed to write stream {}", path.display()))?;
                info!("Wrote {} bytes to {}", stream.len(), path.display());
                return Ok(());
            }
            stream.into_inner()
        }
    };

    match demo::decode_stream(&registry, &bytes) {
        Ok(records) => {
            for (index, record) in records.iter().enumerate() {
                info!("[{}] {}", index, record);
            }
            Ok(())
        }
        Err(e) => {
            error!("Decoding failed: {}", e);
            Err(e.into())
        }
    }
}
