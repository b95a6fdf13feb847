//! `sfx`: build and run hermetic self-extracting archives.

mod commands;
mod error;

use crate::commands::Context;
use crate::error::{ErrorKind, Result};
use clap::{Parser, Subcommand};
use exn::ResultExt;
use sfx_config::Config;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "sfx", version, about, long_about = None)]
struct Cli {
    /// More logging (-v for debug, -vv for trace). Ignored when `RUST_LOG` is set.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Configuration file, instead of `sfx.{toml,yaml,json}` in the working directory.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build configured archives.
    Package {
        /// Archives to build; all of them when omitted.
        names: Vec<String>,
        /// Where built archives are written.
        #[arg(long, default_value = "dist")]
        dist: PathBuf,
    },
    /// Run an archive non-interactively.
    Run {
        archive: PathBuf,
        /// Keep the extracted files in this directory.
        #[arg(long)]
        target: Option<PathBuf>,
        /// Arguments for the startup script.
        #[arg(last = true)]
        args: Vec<String>,
    },
    /// Verify an archive's embedded checksums.
    Check { archive: PathBuf },
    /// Show which system utilities would be used.
    Which {
        #[arg(required = true)]
        names: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| match cli.verbose {
        0 => EnvFilter::new("info"),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    });
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).with_writer(std::io::stderr).init();

    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:?}");
            ExitCode::FAILURE
        },
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = match &cli.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
    .or_raise(|| ErrorKind::Config)?;
    let context = Context::new(config)?;
    match cli.command {
        Command::Package { names, dist } => {
            let workspace = std::env::current_dir().or_raise(|| ErrorKind::Config)?;
            context.package(&names, &workspace, &dist).await?;
            Ok(ExitCode::SUCCESS)
        },
        Command::Run { archive, target, args } => context.run(&archive, target.as_deref(), &args, false).await,
        Command::Check { archive } => context.run(&archive, None, &[], true).await,
        Command::Which { names } => {
            context.which(&names).await?;
            Ok(ExitCode::SUCCESS)
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn package_defaults_to_dist() {
        let cli = Cli::try_parse_from(["sfx", "package"]).unwrap();
        match cli.command {
            Command::Package { names, dist } => {
                assert!(names.is_empty());
                assert_eq!(dist, PathBuf::from("dist"));
            },
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn run_passes_trailing_args_to_the_script() {
        let cli = Cli::try_parse_from(["sfx", "-v", "run", "dist/foo.run", "--target", "out", "--", "--flag", "x"]).unwrap();
        assert_eq!(cli.verbose, 1);
        match cli.command {
            Command::Run { archive, target, args } => {
                assert_eq!(archive, PathBuf::from("dist/foo.run"));
                assert_eq!(target, Some(PathBuf::from("out")));
                assert_eq!(args, vec!["--flag".to_string(), "x".to_string()]);
            },
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn which_needs_a_name() {
        assert!(Cli::try_parse_from(["sfx", "which"]).is_err());
        assert!(Cli::try_parse_from(["sfx", "which", "tar", "gzip"]).is_ok());
    }
}
