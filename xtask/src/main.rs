//! Build automation tasks for relink
//!
//! Run with: cargo xtask <command>

use clap::{Parser, Subcommand};
use std::process::Command;

/// Fuzz targets defined in `fuzz/Cargo.toml`
const FUZZ_TARGETS: &[&str] = &[
    "fuzz_frame_decoder",
    "fuzz_frame_roundtrip",
    "fuzz_room_list",
];

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "relink build automation")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run all tests
    Test,

    /// Run clippy lints
    Lint,

    /// Check formatting
    Fmt,

    /// Run all CI checks
    Ci,

    /// Run the codec benchmarks
    Bench,

    /// Run fuzz targets (requires cargo-fuzz and a nightly toolchain)
    Fuzz {
        /// Target to run; all targets when omitted
        target: Option<String>,

        /// Seconds per target
        #[arg(long, default_value_t = 60)]
        seconds: u64,
    },

    /// Generate documentation
    Doc,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Test => {
            run_command("cargo", &["test", "--all-features", "--workspace"])?;
        }
        Commands::Lint => {
            run_command("cargo", &["clippy", "--workspace", "--", "-D", "warnings"])?;
        }
        Commands::Fmt => {
            run_command("cargo", &["fmt", "--all", "--check"])?;
        }
        Commands::Ci => {
            println!("Running CI checks...");
            run_command("cargo", &["fmt", "--all", "--check"])?;
            run_command("cargo", &["clippy", "--workspace", "--", "-D", "warnings"])?;
            run_command("cargo", &["test", "--all-features", "--workspace"])?;
            println!("All CI checks passed!");
        }
        Commands::Bench => {
            run_command("cargo", &["bench", "-p", "relink-proto"])?;
        }
        Commands::Fuzz { target, seconds } => {
            let targets: Vec<&str> = match target.as_deref() {
                Some(name) if FUZZ_TARGETS.contains(&name) => vec![name],
                Some(name) => anyhow::bail!(
                    "unknown fuzz target {} (expected one of {:?})",
                    name,
                    FUZZ_TARGETS
                ),
                None => FUZZ_TARGETS.to_vec(),
            };

            let max_time = format!("-max_total_time={seconds}");
            for target in targets {
                println!("Fuzzing {target} for {seconds}s...");
                run_command(
                    "cargo",
                    &["+nightly", "fuzz", "run", "--fuzz-dir", "fuzz", target, "--", &max_time],
                )?;
            }
        }
        Commands::Doc => {
            run_command("cargo", &["doc", "--workspace", "--no-deps", "--open"])?;
        }
    }

    Ok(())
}

fn run_command(program: &str, args: &[&str]) -> anyhow::Result<()> {
    let status = Command::new(program).args(args).status()?;

    if !status.success() {
        anyhow::bail!("{} {:?} failed", program, args);
    }

    Ok(())
}
