//! CLI smoke entry point.
//!
//! # Responsibility
//! - Open a store from an optional JSON config and verify `curricula_core` wiring.
//! - Print per-collection active counts in a deterministic order.
//!
//! Usage: `curricula_cli [path/to/curricula.json]`; without an argument,
//! `./curricula.json` is used when present.

use curricula_core::config::DEFAULT_CONFIG_NAME;
use curricula_core::{core_version, init_logging, open_db_from_config, CoreConfig, UnitOfWork};
use std::path::Path;
use std::process::ExitCode;

fn main() -> ExitCode {
    match run(std::env::args().nth(1)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("curricula_cli error: {message}");
            ExitCode::FAILURE
        }
    }
}

fn run(config_path: Option<String>) -> Result<(), String> {
    let config = match config_path {
        Some(path) => CoreConfig::load(Path::new(&path)).map_err(|err| err.to_string())?,
        None if Path::new(DEFAULT_CONFIG_NAME).is_file() => {
            CoreConfig::load(DEFAULT_CONFIG_NAME).map_err(|err| err.to_string())?
        }
        None => CoreConfig::default(),
    };
    init_logging(&config.logging)?;

    let conn = open_db_from_config(&config.database).map_err(|err| err.to_string())?;
    let uow = UnitOfWork::new(&conn, config.batch);
    uow.ensure_relation_indexes()
        .map_err(|err| err.to_string())?;

    println!("curricula_core version={}", core_version());
    for (collection, count) in uow.active_counts().map_err(|err| err.to_string())? {
        println!("{collection} active={count}");
    }
    log::info!("event=cli_probe module=cli status=ok");
    Ok(())
}
