// Licensed under the Apache-2.0 license

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::Command;

mod build;
mod clean;
mod config;
mod header;

#[derive(Parser)]
#[command(
    name = "xtask",
    version,
    about = "Command-line toolkit for the coprocessor host stack",
    long_about = "Builds, tests and checks the coprocessor host crates, and validates their configuration files."
)]
struct Xtask {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the workspace
    Build {
        /// Build in release mode
        #[arg(short, long)]
        release: bool,
        /// Build specific package(s)
        #[arg(short, long)]
        package: Vec<String>,
    },

    /// Run unit and emulator tests
    Test {
        /// Run tests in release mode
        #[arg(short, long)]
        release: bool,
        /// Run specific test package(s)
        #[arg(short, long)]
        package: Vec<String>,
        /// Only run tests whose name contains this filter
        #[arg(short, long)]
        filter: Option<String>,
    },

    /// Clean build artifacts
    Clean,

    /// Format code
    Fmt {
        /// Check formatting without applying changes
        #[arg(long)]
        check: bool,
    },

    /// Run clippy lints
    Clippy {
        /// Fix issues automatically where possible
        #[arg(long)]
        fix: bool,
        /// Fail on warnings
        #[arg(long)]
        deny_warnings: bool,
    },

    /// Check every source file carries the license header
    Header {
        /// Add the header where it is missing
        #[arg(long)]
        fix: bool,
    },

    /// Validate or generate a coprocessor configuration file
    Config {
        /// Configuration file; defaults to the nearest coproc-config.toml
        #[arg(short, long)]
        path: Option<PathBuf>,
        /// Write the default configuration to the path instead
        #[arg(long)]
        init: bool,
    },

    /// Run comprehensive checks (format, clippy, headers, build, test)
    Check {
        /// Skip time-consuming tests
        #[arg(long)]
        quick: bool,
    },

    /// Run pre-check-in checks (format, clippy, headers, build)
    Precheckin,
}

fn main() -> Result<()> {
    let args = Xtask::parse();

    println!("xtask coprocessor host toolkit");

    match args.command {
        Commands::Build { release, package } => build::run(release, package),
        Commands::Test {
            release,
            package,
            filter,
        } => test::run(release, package, filter),
        Commands::Clean => clean::run(),
        Commands::Fmt { check } => run_fmt(check),
        Commands::Clippy { fix, deny_warnings } => run_clippy(fix, deny_warnings),
        Commands::Header { fix } => header::run(fix),
        Commands::Config { path, init } => config::run(path, init),
        Commands::Check { quick } => run_check(quick),
        Commands::Precheckin => run_precheckin(),
    }
}

pub fn run_command(name: &str, cmd: &mut Command) -> Result<()> {
    println!("Running: {}", name);

    let status = cmd
        .status()
        .with_context(|| format!("Failed to execute command: {}", name))?;

    if status.success() {
        println!("✓ {}", name);
        Ok(())
    } else {
        anyhow::bail!("Command failed: {}", name);
    }
}

fn run_fmt(check: bool) -> Result<()> {
    let mut cmd = Command::new("cargo");
    cmd.args(["fmt", "--all"]);

    if check {
        cmd.arg("--check");
    }

    run_command("cargo fmt", &mut cmd)
}

fn run_clippy(fix: bool, deny_warnings: bool) -> Result<()> {
    let mut cmd = Command::new("cargo");
    cmd.args(["clippy", "--workspace", "--all-targets", "--all-features"]);

    if fix {
        cmd.args(["--fix", "--allow-dirty"]);
    }

    if deny_warnings {
        cmd.args(["--", "-D", "warnings"]);
    }

    run_command("cargo clippy", &mut cmd)
}

fn run_check(quick: bool) -> Result<()> {
    println!("Starting comprehensive check");

    run_precheckin()?;

    if quick {
        println!("ℹ Skipping tests (quick mode)");
    } else {
        test::run(false, vec![], None)?;
    }

    println!("✓ All checks passed!");
    Ok(())
}

fn run_precheckin() -> Result<()> {
    println!("Starting pre-check-in checks");

    run_fmt(true)?;
    run_clippy(false, true)?;
    header::run(false)?;
    config::run(None, false)?;
    build::run(false, vec![])?;

    println!("✓ Pre-check-in passed!");
    Ok(())
}
