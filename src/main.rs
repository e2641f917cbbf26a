use anyhow::Result;
use clap::Parser;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use survey_rewards::repositories::ai::{GeminiApi, OfflineProvider, TextProvider};
use survey_rewards::repositories::payments::SimulatedPayments;
use survey_rewards::repositories::store::{FileStore, KeyValueStore, MemoryStore, PostgresStore};
use survey_rewards::services;
use survey_rewards::settings::{AiProviderKind, Settings, StorageBackend};

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "config.toml")]
    config: String,
    #[arg(short, long)]
    listen: Option<String>,
    #[arg(long, default_value = "log4rs.yaml")]
    log4rs: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let args = Args::parse();
    let settings = Settings::load(&args.config).expect("Failed to load settings.");

    init_logging(&args.log4rs).expect("Failed to initialize logging.");
    log::info!("Starting survey rewards service.");

    let store = open_store(&settings).await?;
    let provider = text_provider(&settings)?;
    let payments = Arc::new(SimulatedPayments::new(Duration::from_millis(
        settings.payments.verification_delay_ms,
    )));

    let channels = services::start_services(&settings, store, provider, payments)
        .await
        .expect("Could not start services.");

    let listen = args.listen.unwrap_or(settings.server.listen.clone());
    services::http::start_http_server(channels, settings.server.public_url.clone(), &listen).await
}

async fn open_store(settings: &Settings) -> Result<Arc<dyn KeyValueStore>> {
    let quota = settings.storage.quota_bytes;

    let store: Arc<dyn KeyValueStore> = match settings.storage.backend {
        StorageBackend::Memory => {
            log::warn!("Using in-memory storage, nothing survives a restart.");
            Arc::new(quota.map_or_else(MemoryStore::new, MemoryStore::with_quota))
        }
        StorageBackend::File => {
            let dir = settings.storage.data_dir();
            log::info!("Using file storage at {}", dir.display());
            Arc::new(FileStore::open(dir, quota).await?)
        }
        StorageBackend::Postgres => {
            let url = settings
                .storage
                .postgres_url
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("storage.postgres_url is required for the postgres backend"))?;
            log::info!("Using postgres storage.");
            Arc::new(PostgresStore::connect(url, quota).await?)
        }
    };

    Ok(store)
}

fn text_provider(settings: &Settings) -> Result<Arc<dyn TextProvider>> {
    match settings.ai.provider {
        AiProviderKind::Offline => {
            log::info!("No text provider configured, using local fallbacks.");
            Ok(Arc::new(OfflineProvider))
        }
        AiProviderKind::Gemini => {
            let api_key = settings
                .ai
                .api_key
                .clone()
                .ok_or_else(|| anyhow::anyhow!("ai.api_key is required for the gemini provider"))?;
            log::info!("Using Gemini model {}", settings.ai.model);
            Ok(Arc::new(GeminiApi::new(
                api_key,
                settings.ai.url.clone(),
                settings.ai.model.clone(),
            )))
        }
    }
}

fn init_logging(path: &str) -> Result<(), anyhow::Error> {
    if !Path::new("logs").exists() {
        fs::create_dir("logs")?;
    }

    match log4rs::init_file(path, Default::default()) {
        Ok(_) => {
            println!("[*] Logging initialized successfully.");
            Ok(())
        }
        Err(e) => {
            println!("[ERROR] Failed to initialize logging: {}", e);
            Err(anyhow::anyhow!("Could not initialize logging: {}", e))
        }
    }
}
