//! Code Llama chat web server
//!
//! (c) Softlandia 2025

use codellama_chat::api;
use codellama_chat::config::Settings;
use codellama_chat::core::i18n::Catalog;
use codellama_chat::core::services::{MyChatService, MyFileService};
use codellama_chat::core::session::SessionStore;
use codellama_chat::infrastructure::replicate::ReplicateClient;

use anyhow::anyhow;
use axum::Router;
use axum::http::{HeaderValue, Method};
use di::{Injectable, Ref, ServiceCollection};
use di_axum::RouterServiceProviderExtensions;
use log::{info, warn};
use std::time::Duration;
use tokio::runtime::{Builder, Runtime};
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

fn main() -> anyhow::Result<()> {
    // initialize tracing
    tracing_subscriber::fmt::init();

    let runtime: Runtime = Builder::new_multi_thread().enable_all().build()?;

    let provider = ServiceCollection::new()
        .add(Settings::singleton())
        .add(Catalog::singleton())
        .add(SessionStore::singleton())
        .add(ReplicateClient::singleton())
        .add(MyChatService::scoped())
        .add(MyFileService::scoped())
        .build_provider()
        .map_err(|e| anyhow!("invalid service registrations: {e}"))?;

    let settings = provider.get_required::<Settings>();
    if settings.api_token.is_none() {
        warn!("REPLICATE_API_TOKEN is not set, prompts will be rejected");
    }

    // background task expiring idle sessions
    let sweeper_handle = runtime.spawn(session_sweeper(
        provider.get_required::<SessionStore>(),
        settings.session_idle,
    ));

    let app = api::app(settings.max_upload_bytes)
        .nest_service(
            "/static",
            ServiceBuilder::new().service(ServeDir::new("static")),
        )
        .layer(
            CorsLayer::new()
                .allow_headers(Any)
                .allow_methods([Method::GET, Method::POST, Method::DELETE])
                .allow_origin([
                    HeaderValue::from_static("http://localhost:3000"),
                    HeaderValue::from_static("http://localhost:5173"),
                ]),
        )
        .with_provider(provider);

    let web_task_handle = runtime.spawn(web_server_task(app, settings.bind_address.clone()));

    runtime.block_on(async {
        let result = web_task_handle.await;
        sweeper_handle.abort();
        result?
    })
}

async fn web_server_task(app: Router, bind_address: String) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    info!("Shutting down...");
    Ok(())
}

async fn session_sweeper(sessions: Ref<SessionStore>, max_idle: Duration) {
    let mut interval = tokio::time::interval(SWEEP_INTERVAL);
    loop {
        interval.tick().await;
        let expired = sessions.expire_idle(max_idle).await;
        if expired > 0 {
            info!("expired {expired} idle sessions");
        }
    }
}
