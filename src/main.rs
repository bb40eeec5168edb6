use axum::Router;
use clap::Parser;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use payflow::config::Config;
use payflow::db::{AppState, create_pool, init_db, queries};
use payflow::engine::Engine;
use payflow::gateway::MercadoPagoClient;
use payflow::handlers;
use payflow::models::CreateOrder;
use payflow::notify::{NotificationGate, sender_from_config};
use payflow::sweeper;

#[derive(Parser, Debug)]
#[command(name = "payflow")]
#[command(about = "Order and payment lifecycle reconciliation service")]
struct Cli {
    /// Seed the database with a demo order (dev mode only)
    #[arg(long)]
    seed: bool,

    /// Run one sweep cycle and exit (operational recovery)
    #[arg(long)]
    sweep_once: bool,
}

fn seed_dev_data(state: &AppState) {
    let conn = state.db.get().expect("Failed to get db connection for seed");
    let input = CreateOrder {
        customer_name: "Dev Customer".to_string(),
        customer_email: "dev@example.com".to_string(),
        amount_cents: 125_000_00,
        currency: "cop".to_string(),
    };
    match queries::create_order(&conn, &input) {
        Ok(order) => tracing::info!("Seeded demo order {}", order.order_number),
        Err(e) => tracing::warn!("Failed to seed demo order: {}", e),
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let config = Config::from_env();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "payflow=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let pool = create_pool(&config.database_path).expect("Failed to create database pool");
    {
        let conn = pool.get().expect("Failed to get db connection");
        init_db(&conn).expect("Failed to initialize schema");
    }

    let gateway = Arc::new(MercadoPagoClient::new(&config.gateway));
    let sender = sender_from_config(&config.notify);
    let gate = Arc::new(NotificationGate::new(pool.clone(), sender));
    let engine = Arc::new(Engine::new(pool.clone(), gate));

    let state = AppState {
        db: pool,
        gateway,
        engine,
        sweep: config.sweep.clone(),
        backoff: config.backoff,
        webhook_secret: config.gateway.webhook_secret.clone(),
        base_url: config.base_url.clone(),
    };

    if cli.sweep_once {
        match sweeper::run_cycle(&state).await {
            Ok(report) => {
                tracing::info!(
                    "Sweep finished: abandoned={} expired={} rescued={} errors={}",
                    report.abandoned,
                    report.expired,
                    report.rescued,
                    report.errors
                );
            }
            Err(e) => {
                tracing::error!("Sweep failed: {}", e);
                std::process::exit(1);
            }
        }
        return;
    }

    if cli.seed {
        if !config.dev_mode {
            tracing::warn!("--seed flag ignored: not in dev mode (set PAYFLOW_ENV=dev)");
        } else {
            seed_dev_data(&state);
        }
    }

    sweeper::spawn(state.clone());
    tracing::info!(
        "Timeout sweeper started (interval {:?}, abandonment after {:?})",
        state.sweep.interval,
        state.sweep.abandoned_after
    );

    let app = Router::new()
        .merge(handlers::orders::router())
        .merge(handlers::status::router())
        .merge(handlers::webhook::router())
        .merge(handlers::admin::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Payflow server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Failed to start server");
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    tracing::info!("Shutdown signal received, stopping server...");
}
