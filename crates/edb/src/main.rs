use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use edb_core::{
    agents::{CheckinWriter, Dedup, Delete, Notifier, Router},
    bus::EventBus,
    config::{Config, Mode},
    storage::{MemoryStorage, Storage},
    Error,
};
use edb_telegram::{api::TelegramApi, polling, responder::Responder, webhook};

#[tokio::main]
async fn main() -> Result<(), Error> {
    edb_core::logging::init("edb")?;

    let cfg = Config::load()?;
    let bus = Arc::new(EventBus::new());
    let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new(cfg.ident_salt.clone()));

    let dedup = Dedup::attach(&bus, cfg.dedup_window)?;
    Router::attach(&bus, storage.clone())?;
    CheckinWriter::attach(&bus, storage.clone())?;
    Delete::attach(&bus, storage.clone())?;
    Notifier::attach(&bus)?;

    let api = Arc::new(TelegramApi::new(
        &cfg.telegram_bot_token,
        cfg.api_base_url.clone(),
    )?);
    Responder::attach(&bus, api.clone())?;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown requested");
                cancel.cancel();
            }
        });
    }

    match cfg.mode {
        Mode::Polling => {
            polling::run_polling(
                bus.clone(),
                api,
                cfg.poll_timeout,
                cfg.idle_delay,
                cancel,
            )
            .await?;
        }
        Mode::Webhook => {
            let secret = cfg
                .webhook_secret
                .clone()
                .ok_or_else(|| Error::Config("webhook secret missing".into()))?;
            webhook::run_webhook(&cfg.webhook_host, cfg.webhook_port, secret, bus.clone(), cancel)
                .await?;
        }
    }

    dedup.flush().await;
    bus.clear();
    Ok(())
}
