use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use switchboard::config::AppConfig;
use switchboard::email::outbound::SmtpMailer;
use switchboard::llm::OpenAiChat;
use switchboard::shared::state::AppState;
use switchboard::shared::utils::create_conn;
use switchboard::{agent, companies, email, messages, tickets};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::from_env()?;
    let pool = create_conn(&config.database.url).context("failed to build database pool")?;

    let state = Arc::new(AppState {
        conn: pool,
        llm: Arc::new(OpenAiChat::new(&config.llm)),
        mailer: Arc::new(SmtpMailer::new(config.smtp.clone())),
        intake_sessions: Arc::new(Mutex::new(HashMap::new())),
        config,
    });

    tokio::spawn(tickets::autoclose::run_sweeper(Arc::clone(&state)));
    tokio::spawn(agent::run_session_reaper(Arc::clone(&state)));

    let app = axum::Router::new()
        .merge(companies::configure())
        .merge(tickets::configure())
        .merge(messages::configure())
        .merge(email::configure())
        .merge(agent::configure())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state.clone());

    let addr = format!(
        "{}:{}",
        state.config.server.host, state.config.server.port
    );
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("listening on {addr}");
    axum::serve(listener, app).await?;
    Ok(())
}
