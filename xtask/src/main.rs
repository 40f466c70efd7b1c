//! Dockhand xtask - Build automation tasks
//!
//! ## Usage
//!
//! ```bash
//! # Build the dockhand binary
//! cargo xtask build
//!
//! # Run all tests
//! cargo xtask test
//!
//! # Run lints
//! cargo xtask lint
//!
//! # Format code
//! cargo xtask fmt
//!
//! # Run a short session against the local Docker engine
//! cargo xtask smoke --secs 15
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use xshell::{cmd, Shell};

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "Build automation for Dockhand")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the dockhand binary
    Build {
        /// Build in release mode
        #[arg(long)]
        release: bool,
    },
    /// Run all tests
    Test {
        /// Run tests in release mode
        #[arg(long)]
        release: bool,
    },
    /// Run lints (clippy and rustfmt check)
    Lint,
    /// Format code
    Fmt {
        /// Check formatting without making changes
        #[arg(long)]
        check: bool,
    },
    /// Run a bounded session against the local Docker engine
    Smoke {
        /// Seconds to keep the container running
        #[arg(long, default_value = "15")]
        secs: u64,
        /// Also pull the model inside the container
        #[arg(long)]
        with_model: bool,
    },
    /// Clean build artifacts
    Clean,
    /// Install the binary locally
    Install,
    /// Run CI checks (lint, test, build)
    Ci,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let sh = Shell::new()?;

    // Change to project root
    let project_root = project_root()?;
    sh.change_dir(&project_root);

    match cli.command {
        Commands::Build { release } => build(&sh, release)?,
        Commands::Test { release } => test(&sh, release)?,
        Commands::Lint => lint(&sh)?,
        Commands::Fmt { check } => fmt(&sh, check)?,
        Commands::Smoke { secs, with_model } => smoke(&sh, secs, with_model)?,
        Commands::Clean => clean(&sh)?,
        Commands::Install => install(&sh)?,
        Commands::Ci => ci(&sh)?,
    }

    Ok(())
}

fn project_root() -> Result<PathBuf> {
    let output = std::process::Command::new("cargo")
        .args(["locate-project", "--workspace", "--message-format=plain"])
        .output()
        .context("Failed to run cargo locate-project")?;

    let path = String::from_utf8(output.stdout)?;
    let manifest = PathBuf::from(path.trim());
    manifest
        .parent()
        .map(|p| p.to_path_buf())
        .context("Failed to find project root")
}

fn build(sh: &Shell, release: bool) -> Result<()> {
    println!("🔨 Building dockhand...");
    if release {
        cmd!(sh, "cargo build --release --bin dockhand").run()?;
    } else {
        cmd!(sh, "cargo build --bin dockhand").run()?;
    }
    println!("✅ Build complete!");
    Ok(())
}

fn test(sh: &Shell, release: bool) -> Result<()> {
    println!("🧪 Running tests...");
    if release {
        cmd!(sh, "cargo test --workspace --release").run()?;
    } else {
        cmd!(sh, "cargo test --workspace").run()?;
    }
    println!("✅ All tests passed!");
    Ok(())
}

fn lint(sh: &Shell) -> Result<()> {
    println!("🔍 Running lints...");

    println!("  Checking formatting...");
    cmd!(sh, "cargo fmt --all -- --check").run()?;

    println!("  Running clippy...");
    cmd!(sh, "cargo clippy --workspace --all-targets -- -D warnings").run()?;

    println!("✅ All lints passed!");
    Ok(())
}

fn fmt(sh: &Shell, check: bool) -> Result<()> {
    println!("🎨 Formatting code...");
    if check {
        cmd!(sh, "cargo fmt --all -- --check").run()?;
    } else {
        cmd!(sh, "cargo fmt --all").run()?;
    }
    println!("✅ Formatting complete!");
    Ok(())
}

fn smoke(sh: &Shell, secs: u64, with_model: bool) -> Result<()> {
    if cmd!(sh, "docker info").quiet().ignore_stderr().read().is_err() {
        anyhow::bail!("No Docker engine reachable. Start Docker or set DOCKER_HOST.");
    }

    println!("🐳 Running a {}s session...", secs);
    let secs = secs.to_string();
    let exec_flag: &[&str] = if with_model { &[] } else { &["--no-exec"] };
    cmd!(sh, "cargo run --bin dockhand -- --run-for {secs} {exec_flag...}").run()?;
    println!("✅ Session ended cleanly!");
    Ok(())
}

fn clean(sh: &Shell) -> Result<()> {
    println!("🧹 Cleaning build artifacts...");
    cmd!(sh, "cargo clean").run()?;
    println!("✅ Clean complete!");
    Ok(())
}

fn install(sh: &Shell) -> Result<()> {
    println!("📥 Installing dockhand locally...");
    cmd!(sh, "cargo install --path .").run()?;
    println!("✅ Installation complete!");
    Ok(())
}

fn ci(sh: &Shell) -> Result<()> {
    println!("🔄 Running CI checks...");
    lint(sh)?;
    test(sh, false)?;
    build(sh, true)?;
    println!("✅ CI checks passed!");
    Ok(())
}
