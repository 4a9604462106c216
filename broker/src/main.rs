use std::sync::Arc;
use std::time::Duration;

use axum::http::{header, Method};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

use broker::actors::draft::{DisabledDraftClient, DraftClient, OpenAiDraftClient};
use broker::actors::trail::JsonlTrailSink;
use broker::api;
use broker::config::BrokerConfig;

fn load_env_file() {
    let cwd = match std::env::current_dir() {
        Ok(dir) => dir,
        Err(e) => {
            tracing::warn!(error = %e, "Could not determine current directory for .env lookup");
            return;
        }
    };

    let mut current = cwd.clone();
    loop {
        let candidate = current.join(".env");
        if candidate.exists() {
            match dotenvy::from_path(&candidate) {
                Ok(_) => {
                    tracing::info!(path = %candidate.display(), "Loaded environment from .env");
                }
                Err(e) => {
                    tracing::warn!(
                        path = %candidate.display(),
                        error = %e,
                        "Failed to load .env file"
                    );
                }
            }
            return;
        }

        if !current.pop() {
            break;
        }
    }

    tracing::info!(
        cwd = %cwd.display(),
        "No .env file found in current directory or ancestors; using process environment only"
    );
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Load .env values early so upstream keys are visible to the config.
    load_env_file();

    let config = BrokerConfig::from_env();
    tracing::info!(
        listen_addr = %config.listen_addr,
        mode = %config.default_mode,
        model = %config.served_model_id,
        draft_upstream = config.draft_base_url.is_some(),
        "Starting human chat completions broker"
    );

    let draft_client: Arc<dyn DraftClient> = match &config.draft_base_url {
        Some(base_url) => {
            let client = OpenAiDraftClient::new(
                base_url.clone(),
                config.draft_api_key.clone(),
                config.draft_model.clone(),
                config.draft_system_prompt.clone(),
                config.draft_timeout_ms,
            )
            .map_err(|e| std::io::Error::other(e.to_string()))?;
            tracing::info!(model = %config.draft_model, "Draft generation enabled");
            Arc::new(client)
        }
        None => {
            tracing::info!("No draft upstream configured; drafts will report as failed");
            Arc::new(DisabledDraftClient)
        }
    };

    let trail_sink = Arc::new(JsonlTrailSink::new(config.trail_path.clone()));
    tracing::info!(path = %config.trail_path.display(), "Experiment trail sink ready");

    let api_state = broker::spawn_system(
        draft_client,
        trail_sink,
        config.default_mode,
        Duration::from_millis(config.draft_timeout_ms),
        config.served_model_id.clone(),
    )
    .await
    .map_err(|e| std::io::Error::other(e.to_string()))?;

    // The operator console and arbitrary API clients may call from any
    // origin; there are no cookies or ambient credentials to protect.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT, header::AUTHORIZATION]);

    let app = api::router().with_state(api_state).layer(cors);

    tracing::info!("Listening on http://{}", config.listen_addr);
    let listener = TcpListener::bind(&config.listen_addr).await?;
    axum::serve(listener, app).await
}
