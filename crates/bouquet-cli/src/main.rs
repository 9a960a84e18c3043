//! Bouquet CLI - installs addon bundles into Gardener shoots

use clap::{Parser, Subcommand};
use miette::Result;

mod commands;
mod config;
mod error;
mod logging;

use commands::run::RunArgs;
use logging::LogFormat;

#[derive(Parser)]
#[command(name = "bouquet")]
#[command(version)]
#[command(about = "Addon bundle controller for Gardener shoots", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log output format
    #[arg(long, global = true, value_enum, env = "BOUQUET_LOG_FORMAT", default_value_t)]
    log_format: LogFormat,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the shoot and addon instance controllers until SIGTERM or SIGINT
    Run(RunArgs),

    /// Print the AddonManifest and AddonInstance CRDs as YAML
    Crds,
}

#[tokio::main]
async fn main() -> Result<()> {
    miette::set_panic_hook();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => {
            logging::init(cli.log_format);
            commands::run::run(args).await?;
        }
        Commands::Crds => commands::crds::run()?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use std::time::Duration;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run_flags() {
        let cli = Cli::try_parse_from([
            "bouquet",
            "run",
            "--workers",
            "4",
            "--mapper-refresh",
            "5m",
            "--remote-mapper-ttl",
            "90s",
            "--project",
            "dev",
            "--strict-templates",
            "--log-format",
            "json",
        ])
        .unwrap();

        assert_eq!(cli.log_format, LogFormat::Json);
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.workers, Some(4));
        assert_eq!(args.mapper_refresh, Some(Duration::from_secs(300)));
        assert_eq!(args.remote_mapper_ttl, Some(Duration::from_secs(90)));
        assert_eq!(args.project.as_deref(), Some("dev"));
        assert!(args.strict_templates);
    }

    #[test]
    fn test_rejects_bad_duration() {
        assert!(Cli::try_parse_from(["bouquet", "run", "--mapper-refresh", "soon"]).is_err());
    }
}
