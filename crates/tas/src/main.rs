use std::sync::Arc;

use tokio::sync::mpsc;

use tas_core::{
    config::Config,
    gatekeeper::Gatekeeper,
    messaging::{
        port::ConversationPort,
        throttled::{ThrottleConfig, ThrottledPort},
    },
    scheduler::SweepScheduler,
    store::AllowlistStore,
};
use tas_telegram::{login, updates, TelegramGateway};

const EVENT_QUEUE_CAPACITY: usize = 256;

#[tokio::main]
async fn main() -> Result<(), tas_core::Error> {
    tas_core::logging::init("tas")?;

    let cfg = Arc::new(Config::load()?);

    if std::env::args().nth(1).as_deref() == Some("login") {
        return login::interactive_login(&cfg).await;
    }

    let gateway = Arc::new(TelegramGateway::connect(&cfg).await?);
    let raw_port: Arc<dyn ConversationPort> = gateway.clone();
    let port: Arc<dyn ConversationPort> =
        Arc::new(ThrottledPort::new(raw_port, ThrottleConfig::default()));

    let gatekeeper = Arc::new(
        Gatekeeper::new(
            port,
            cfg.antispam.clone(),
            cfg.service_ids.clone(),
            AllowlistStore::new(&cfg.data_file),
        )
        .await?,
    );

    if let Err(e) = gatekeeper.announce_startup().await {
        eprintln!("startup notice failed: {e}");
    }

    let scheduler = SweepScheduler::new(&cfg.sweep_cron, cfg.timezone, gatekeeper.clone())?;
    scheduler.start().await;

    let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
    let pump = tokio::spawn(updates::pump_updates(gateway, events_tx));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => println!("shutting down"),
        _ = gatekeeper.run(events_rx) => {}
    }

    scheduler.stop().await;
    gatekeeper.shutdown();
    pump.abort();

    Ok(())
}
