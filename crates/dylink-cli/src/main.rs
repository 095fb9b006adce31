//! dylink CLI - build shared libraries from toolchain recipes.

mod build;
mod colors;
mod plan;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "dylink")]
#[command(about = "Build a shared library by compiling sources across parallel shells")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Narrate progress and enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile and link the recipe's sources
    Build {
        /// Path to the recipe (.json file)
        recipe: PathBuf,

        /// Build directory (default: the recipe's directory)
        #[arg(short, long)]
        dir: Option<PathBuf>,

        /// Maximum number of worker shells (default: all cores)
        #[arg(short = 'j', long)]
        threads: Option<usize>,

        /// Kill any worker running longer than this many seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Load the finished library once to check it
        #[arg(long)]
        verify: bool,
    },

    /// Show which worker compiles which source, without running anything
    Plan {
        /// Path to the recipe (.json file)
        recipe: PathBuf,

        /// Maximum number of worker shells (default: all cores)
        #[arg(short = 'j', long)]
        threads: Option<usize>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::DEBUG.into())
    } else {
        tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // Attach recovery hints to dylink-core errors
    let format_error = |err: anyhow::Error| -> anyhow::Error {
        if let Some(core_err) = err.downcast_ref::<dylink_core::Error>() {
            anyhow::anyhow!("{}", core_err.with_hint())
        } else {
            err
        }
    };

    match cli.command {
        Commands::Build {
            recipe,
            dir,
            threads,
            timeout,
            verify,
        } => {
            let options = build::BuildOptions {
                dir,
                threads,
                timeout,
                verify,
                verbose: cli.verbose,
            };
            build::execute(&recipe, &options).map_err(format_error)?;
        }

        Commands::Plan { recipe, threads } => {
            plan::execute(&recipe, threads).map_err(format_error)?;
        }
    }

    Ok(())
}
