use clap::{Arg, ArgAction, Command};
use shorthash_server::{run, telemetry, Config};
use std::process::ExitCode;
use tracing::{error, info};

fn main() -> ExitCode {
    // Parse arguments
    let matches = Command::new("shorthash")
        .about("assign memorable shorthashes to chain addresses and serve them over HTTP")
        .arg(Arg::new("config").long("config").required(true))
        .arg(
            Arg::new("serve-only")
                .long("serve-only")
                .action(ArgAction::SetTrue)
                .help("serve the read API without ingesting blocks"),
        )
        .get_matches();
    let Some(path) = matches.get_one::<String>("config") else {
        eprintln!("missing --config");
        return ExitCode::FAILURE;
    };
    let serve_only = matches.get_flag("serve-only");

    // Load config
    let config = match Config::load(path) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("could not load config {}: {}", path, err);
            return ExitCode::FAILURE;
        }
    };

    // Create logger
    let level = match config.level() {
        Ok(level) => level,
        Err(err) => {
            eprintln!("{}", err);
            return ExitCode::FAILURE;
        }
    };
    if let Err(err) = telemetry::init(level) {
        eprintln!("could not install logger: {}", err);
        return ExitCode::FAILURE;
    }
    info!(
        storage_directory = ?config.storage_directory,
        partition = %config.partition,
        rpc_url = %config.rpc_url,
        listen = %config.listen,
        serve_only,
        "loaded config"
    );

    // Start runtime
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            error!(?err, "could not start runtime");
            return ExitCode::FAILURE;
        }
    };
    match runtime.block_on(run(config, serve_only)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(%err, "fatal error");
            ExitCode::FAILURE
        }
    }
}
