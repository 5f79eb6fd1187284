use std::env;

use hashfarm::csv::{read_operations, write_ledgers};
use hashfarm::{Config, Engine};
use tokio_stream::wrappers::ReceiverStream;
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("warn".parse().unwrap()))
        .with_writer(std::io::stderr)
        .init();

    let mut args = env::args().skip(1);
    let path = args
        .next()
        .expect("usage: hashfarm <operations.csv> [config.toml]");

    if !path.ends_with(".csv") {
        warn!(path, "input file seems to not be a csv file");
    }

    let config = match args.next() {
        Some(config_path) => Config::from_file(&config_path).expect("failed to load config"),
        None => Config::default(),
    };
    let admin = config.admin.clone();
    let engine = Engine::new(config);

    if let Some(seed) = admin {
        if let Err(e) = engine.seed_admin(&seed) {
            warn!("{e}");
        }
    }

    let operations = read_operations(path.clone()).expect("failed to open operations file");
    let (op_sender, op_receiver) = tokio::sync::mpsc::channel(16);

    tokio::spawn(async move {
        for result in operations {
            match result {
                Ok(op) => {
                    if op_sender.send(op).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("{e}");
                }
            }
        }
    });

    engine.run(ReceiverStream::new(op_receiver)).await;

    let mut snapshot = Vec::new();
    for (user, ledger) in engine.ledgers().await {
        let coins: Vec<String> = engine
            .owned_machines(user.id)
            .await
            .iter()
            .filter_map(|owned| {
                engine
                    .machines()
                    .iter()
                    .find(|m| m.id == owned.machine_type)
                    .map(|m| m.coin.clone())
            })
            .collect();
        snapshot.push((user, ledger, coins));
    }

    let rows = snapshot
        .iter()
        .map(|(user, ledger, coins)| (user, ledger, coins.iter().map(String::as_str).collect()));
    write_ledgers(std::io::stdout().lock(), rows).expect("failed to write csv output");
}
