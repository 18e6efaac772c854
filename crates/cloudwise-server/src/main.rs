use anyhow::Result;
use chrono::Utc;
use cloudwise_common::types::Severity;
use cloudwise_notify::channels::email::EmailChannel;
use cloudwise_notify::channels::webhook::WebhookChannel;
use cloudwise_notify::dispatcher::Dispatcher;
use cloudwise_notify::routing::ChannelRoute;
use cloudwise_notify::{EventBus, NotificationChannel};
use cloudwise_server::app;
use cloudwise_server::config::ServerConfig;
use cloudwise_server::state::AppState;
use cloudwise_server::sync::SyncScheduler;
use cloudwise_storage::credentials::hash_password;
use cloudwise_storage::Store;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::signal;
use tracing_subscriber::EnvFilter;

#[allow(clippy::print_stderr)]
fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  cloudwise-server [config.toml]                         Start the server");
    eprintln!("  cloudwise-server init-user <config.toml> <username> <password>");
    eprintln!("                                                         Create a user account");
}

#[tokio::main]
async fn main() -> Result<()> {
    cloudwise_common::id::init(1, 1);

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("cloudwise=info".parse()?))
        .init();

    let args: Vec<String> = std::env::args().collect();

    match args.get(1).map(|s| s.as_str()) {
        Some("init-user") => {
            let (Some(config_path), Some(username), Some(password)) =
                (args.get(2), args.get(3), args.get(4))
            else {
                print_usage();
                anyhow::bail!("init-user requires <config.toml> <username> <password>");
            };
            run_init_user(config_path, username, password).await
        }
        Some("--help" | "-h") => {
            print_usage();
            Ok(())
        }
        _ => {
            let config_path = args
                .get(1)
                .map(|s| s.as_str())
                .unwrap_or("config/server.toml");
            run_server(config_path).await
        }
    }
}

async fn run_init_user(config_path: &str, username: &str, password: &str) -> Result<()> {
    let config = ServerConfig::load(config_path)?;
    let store = Store::new(
        &config.database.connection_url(),
        Path::new(&config.database.data_dir),
    )
    .await?;

    if store.get_user_by_username(username).await?.is_some() {
        anyhow::bail!("User '{}' already exists", username);
    }
    let hash = hash_password(password)?;
    let id = cloudwise_common::id::next_id();
    store.insert_user(&id, username, &hash).await?;
    tracing::info!(username = %username, "User created");
    Ok(())
}

fn build_channels(
    config: &ServerConfig,
) -> (Vec<Box<dyn NotificationChannel>>, Vec<ChannelRoute>) {
    let mut channels: Vec<Box<dyn NotificationChannel>> = Vec::new();
    let mut routes = Vec::new();

    for webhook in &config.notifications.webhooks {
        let min_severity = webhook
            .min_severity
            .parse::<Severity>()
            .unwrap_or(Severity::Info);
        routes.push(ChannelRoute {
            min_severity,
            channel_index: channels.len(),
        });
        channels.push(Box::new(WebhookChannel::new(&webhook.url)));
    }

    if let Some(email) = &config.notifications.email {
        match EmailChannel::new(
            &email.smtp_host,
            email.smtp_port,
            email.smtp_username.as_deref(),
            email.smtp_password.as_deref(),
            &email.from,
            email.recipients.clone(),
        ) {
            Ok(channel) => {
                let min_severity = email
                    .min_severity
                    .parse::<Severity>()
                    .unwrap_or(Severity::Info);
                routes.push(ChannelRoute {
                    min_severity,
                    channel_index: channels.len(),
                });
                channels.push(Box::new(channel));
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to build email channel; skipping");
            }
        }
    }

    (channels, routes)
}

async fn run_server(config_path: &str) -> Result<()> {
    let config = match ServerConfig::load(config_path) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(path = %config_path, error = %e, "Config not loaded; using defaults");
            toml::from_str("")?
        }
    };
    let config = Arc::new(config);

    let store = Arc::new(
        Store::new(
            &config.database.connection_url(),
            Path::new(&config.database.data_dir),
        )
        .await?,
    );

    // First-start convenience: a default admin exists until real users
    // are provisioned with init-user.
    let default_hash = hash_password(&config.auth.default_password)?;
    store
        .ensure_default_user(&config.auth.default_username, &default_hash)
        .await?;

    let jwt_secret = config.auth.jwt_secret.clone().unwrap_or_else(|| {
        tracing::warn!("No jwt_secret configured; generating an ephemeral one (tokens won't survive restarts)");
        cloudwise_common::id::next_id()
    });

    let (events, event_rx) = EventBus::new();
    let (channels, routes) = build_channels(&config);
    let dispatcher = Dispatcher::new(channels, routes);
    tokio::spawn(dispatcher.run(event_rx));

    let state = AppState {
        store: Arc::clone(&store),
        events: events.clone(),
        start_time: Utc::now(),
        jwt_secret: Arc::new(jwt_secret),
        token_expire_secs: config.auth.token_expire_secs,
        config: Arc::clone(&config),
    };

    if config.sync.enabled {
        let scheduler = SyncScheduler::new(Arc::clone(&store), events.clone(), Arc::clone(&config));
        tokio::spawn(async move { scheduler.run().await });
    } else {
        tracing::info!("Background sync disabled by config");
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], config.http_port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %addr, "HTTP server listening");

    let router = app::build_http_app(state);
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        return;
    }
    tracing::info!("Shutdown signal received");
}
