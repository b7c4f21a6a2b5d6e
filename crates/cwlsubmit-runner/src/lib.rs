use cwlsubmit_client::{targets::local::LocalCluster, Client};
use cwlsubmit_core::{config, logging};
use std::sync::Arc;

pub mod cli;
pub mod commands;
pub mod error;

use cli::{Cli, Commands};
use commands::AppContext;
use error::CliError;

pub fn run(cli: Cli) -> Result<(), CliError> {
    logging::set_log_level_from_env();
    logging::set_log_level_from_verbosity(if cli.debug {
        cli.verbose.max(1)
    } else {
        cli.verbose
    });

    let mut config = config::load_config()?;
    if let Some(base_path) = cli.base_path {
        config.cluster.base_path = base_path;
    }

    if let Err(e) = logging::init_session_logger(&config.logging, cli.debug) {
        eprintln!("[WARN] Failed to initialize session logger: {}", e);
        logging::init_stderr_logger();
    }

    let cluster = Arc::new(LocalCluster::new(&config.cluster)?);
    tracing::debug!("Using {}", cwlsubmit_client::targets::ClusterInfo::describe(cluster.as_ref()));
    let client = Client::new(cluster);

    let context = AppContext {
        config: &config,
        client: &client,
        debug: cli.debug,
    };

    match cli.command {
        Commands::Submit(args) => commands::submit::handle_submit(args, &context),
        Commands::Status(args) => commands::status::handle_status(args, &context),
        Commands::Collect(args) => commands::collect::handle_collect(args, &context),
    }
}
