#[macro_use]
extern crate log;

use std::process;
use std::sync::Arc;

use qos_subagent::configuration::*;
use qos_subagent::{qos, snmp, store::DirectoryNamespaces, updater};

use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() {
    env_logger::init();

    let conf = Configuration::parse();
    if let Err(e) = conf.validate() {
        error!("Configuration is broken: {}", e);
        process::exit(2);
    }
    let session = match conf.session_config() {
        Ok(session) => session,
        Err(e) => {
            error!("Configuration is broken: {}", e);
            process::exit(2);
        }
    };

    info!("Configuration valid. Starting up...");

    let namespaces = Arc::new(DirectoryNamespaces::new(conf.data_dir.clone()));
    let table = match qos::mib_table(namespaces) {
        Ok(table) => Arc::new(table),
        Err(e) => {
            error!("Failed to build MIB table: {}", e);
            process::exit(1);
        }
    };

    // Serve something from the first request on; the updaters retry on failure.
    let initial = table.clone();
    match tokio::task::spawn_blocking(move || initial.reinitialize()).await {
        Ok(Ok(())) => info!("Initial counters loaded from {}", conf.data_dir.display()),
        Ok(Err(e)) => warn!("Initial load failed, serving empty tables: {}", e),
        Err(e) => warn!("Initial load task failed: {}", e),
    }

    let cancel = CancellationToken::new();
    let updaters = updater::spawn_updaters(
        table.updaters(),
        conf.update_frequency(),
        conf.reinit_rate,
        cancel.clone(),
    );
    let server = snmp::init(session, table, cancel.clone());

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutting down...");

    cancel.cancel();
    server.shutdown().await;
    for handle in updaters {
        if let Err(e) = handle.await {
            warn!("Updater task failed: {}", e);
        }
    }
}
