mod config;
mod matching;
mod model;
mod orchestrator;
mod pacing;
mod providers;
mod store;

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Mutex;

use log::{error, info};

use config::Config;
use model::EntityKind;
use orchestrator::RunContext;
use store::CatalogStore;

const DEFAULT_CONFIG_FILE: &str = "melodex.toml";

/// `melodex [config.toml]` runs one reconciliation pass;
/// `melodex [config.toml] repair` rebuilds drifted catalog tables instead.
fn main() {
    colog::init();

    let mut config_path = PathBuf::from(DEFAULT_CONFIG_FILE);
    let mut repair = false;
    for arg in std::env::args().skip(1) {
        if arg == "repair" {
            repair = true;
        } else {
            config_path = PathBuf::from(arg);
        }
    }

    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(error) => {
            error!("{error}");
            std::process::exit(1);
        }
    };

    let db_path = config.db_path();
    info!("catalog store at {}", db_path.display());
    let mut store = match CatalogStore::open(&db_path) {
        Ok(store) => store,
        Err(error) => {
            error!("could not open catalog store: {error}");
            std::process::exit(1);
        }
    };
    // Repair runs before the schema pass: a table broken enough to need a
    // rebuild can also make ensure_schema fail.
    if repair {
        for kind in EntityKind::ALL {
            match store.repair_table(kind) {
                Ok(()) => info!("repaired {} table", kind.table()),
                Err(error) => {
                    error!("repair of {} table failed: {error}", kind.table());
                    std::process::exit(1);
                }
            }
        }
        return;
    }

    if let Err(error) = store.ensure_schema() {
        error!("could not prepare catalog schema: {error}");
        std::process::exit(1);
    }

    let pacer = providers::build_pacer(&config);
    let adapters = providers::build_adapters(&config, pacer);
    let store = Mutex::new(store);
    let stop = AtomicBool::new(false);
    let ctx = RunContext::new(
        &store,
        &adapters,
        config.run_options(),
        config.run.worker_count as usize,
        &stop,
    );

    // Entity-level failures are reported in the summary; only a failure to
    // run at all is fatal.
    match orchestrator::run(&ctx) {
        Ok(summary) => {
            print!("{}", summary.render());
            if summary.entities_failed > 0 {
                info!(
                    "{} entities could not be persisted this run; they remain selectable",
                    summary.entities_failed
                );
            }
        }
        Err(error) => {
            error!("reconciliation run failed: {error}");
            std::process::exit(1);
        }
    }
}
