// Licensed under the Apache-2.0 license

use anyhow::{Context, Result};
use coproc_host_config::{CoprocConfig, CONFIG_FILE_NAME};
use std::path::PathBuf;

pub fn run(path: Option<PathBuf>, init: bool) -> Result<()> {
    if init {
        let path = path.unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME));
        if path.exists() {
            anyhow::bail!("{} already exists", path.display());
        }
        CoprocConfig::default().save_to_file(&path)?;
        println!("✓ Wrote default configuration to {}", path.display());
        return Ok(());
    }

    println!("Validating coprocessor configuration");

    let config = match &path {
        Some(path) => CoprocConfig::from_file(path)?,
        None => CoprocConfig::load_default()?,
    };
    let map = config
        .address_map()
        .context("Configuration does not produce a usable address map")?;

    println!("Mailbox: {:?}", config.mailbox_config().mode);
    println!(
        "Queue: {} command / {} response slots",
        config.queue.cmd_slots, config.queue.rsp_slots
    );
    println!("Window: base 0x{:06x}, {} bytes", map.base(), map.len());
    println!("Sessions: up to {}", config.sessions.max_sessions);

    println!("✓ Configuration is valid");
    Ok(())
}
