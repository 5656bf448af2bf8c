mod assistant;
mod channels;
mod config;
mod context;
mod identity;
mod kv_store;
mod orchestrator;
mod tools;

use crate::assistant::OpenAIAssistantClient;
use crate::channels::matrix::{start_matrix_listener, ListenerOptions};
use crate::channels::{MatrixTransport, MessageHandler};
use crate::config::Config;
use crate::context::{ContextResolver, ResolverConfig};
use crate::identity::IdentityClient;
use crate::kv_store::{KvStore, MemoryKvStore, RedisKvStore};
use crate::orchestrator::RunOrchestrator;
use crate::tools::create_default_registry;
use dotenv::dotenv;
use std::sync::Arc;
use tokio::sync::oneshot;

#[tokio::main]
async fn main() {
    dotenv().ok();
    env_logger::init();
    log::info!("[MAIN] Starting matrix-assistant-bot");

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            log::error!("[MAIN] Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    let store: Arc<dyn KvStore> = match &config.redis_url {
        Some(url) => match RedisKvStore::new(url) {
            Ok(store) => {
                if store.ping().await {
                    log::info!("[MAIN] Connected to Redis");
                } else {
                    log::warn!("[MAIN] Redis is not responding to PING");
                }
                Arc::new(store)
            }
            Err(e) => {
                log::error!("[MAIN] {}", e);
                std::process::exit(1);
            }
        },
        None => {
            log::info!("[MAIN] REDIS_URL not set, conversation state is in-memory only");
            Arc::new(MemoryKvStore::new())
        }
    };

    let registry = Arc::new(create_default_registry(&config));

    let assistant = match OpenAIAssistantClient::new(
        &config.openai_api_key,
        &config.openai_base_url,
        &config.assistant_id,
    ) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            log::error!("[MAIN] {}", e);
            std::process::exit(1);
        }
    };

    let transport = match MatrixTransport::connect(
        &config.homeserver_url,
        &config.access_token,
        config.reply_in_thread,
        config.rich_text,
    )
    .await
    {
        Ok(transport) => Arc::new(transport),
        Err(e) => {
            log::error!("[MAIN] Failed to connect to homeserver: {}", e);
            std::process::exit(1);
        }
    };

    let resolver = ContextResolver::new(
        ResolverConfig::from_config(&config),
        transport.profile().clone(),
        transport.clone(),
    );
    let orchestrator = RunOrchestrator::new(
        assistant,
        config.poll_interval,
        config.run_timeout,
    );
    let identity = IdentityClient::new(&config.globalid_api_url, store.clone());
    let handler = Arc::new(MessageHandler::new(
        resolver,
        orchestrator,
        registry,
        store,
        identity,
        transport.clone(),
        config.context_mode,
        config.run_timeout.as_millis() as u64,
    ));

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("[MAIN] Received shutdown signal");
            let _ = shutdown_tx.send(());
        }
    });

    let options = ListenerOptions {
        autojoin: config.autojoin,
        welcome: config.welcome,
    };
    if let Err(e) = start_matrix_listener(transport, handler, options, shutdown_rx).await {
        log::error!("[MAIN] Listener failed: {}", e);
        std::process::exit(1);
    }
}
