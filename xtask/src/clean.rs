// Licensed under the Apache-2.0 license

use anyhow::Result;
use std::process::Command;

use crate::run_command;

pub fn run() -> Result<()> {
    println!("Cleaning Cargo target directory");

    let mut cmd = Command::new("cargo");
    cmd.arg("clean");

    run_command("cargo clean", &mut cmd)?;

    println!("✓ Cleaning completed successfully!");
    Ok(())
}
