mod config;
mod delivery;
mod domain;
mod repository;
mod telemetry;
mod usecase;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::Serialize;
use sqlx::PgPool;

use crate::delivery::http::layers::{cors_layer, with_http_layers};
use crate::delivery::http::v1::device_tokens::{list_devices, register_device, unregister_device};
use crate::delivery::http::v1::internal::{notify, notify_bulk};
use crate::delivery::http::v1::middleware::{api_key_middleware, auth_middleware};
use crate::delivery::http::v1::notifications::{
    get_notification, list_notifications, mark_all_as_read, mark_as_read, unread_count,
};
use crate::delivery::http::v1::preferences::{get_preferences, update_preferences};
use crate::delivery::http::v1::ws::websocket_handler;
use crate::repository::postgres::{
    create_pool, PostgresDeviceTokenRepository, PostgresNotificationRepository,
    PostgresPreferencesRepository,
};
use crate::usecase::device_tokens::DeviceTokensUseCase;
use crate::usecase::dispatch::DispatchService;
use crate::usecase::fcm::FcmClient;
use crate::usecase::hub::ConnectionHub;
use crate::usecase::jwt::JwtService;
use crate::usecase::notifications::NotificationsUseCase;
use crate::usecase::preferences::PreferencesUseCase;
use crate::usecase::sendgrid::SendGridClient;

const RETENTION_SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

pub type Dispatcher = DispatchService<
    PostgresNotificationRepository,
    PostgresPreferencesRepository,
    PostgresDeviceTokenRepository,
    SendGridClient,
    FcmClient<PostgresDeviceTokenRepository>,
>;

pub struct AppState {
    pub dispatch_service: Dispatcher,
    pub notifications_usecase: NotificationsUseCase<PostgresNotificationRepository>,
    pub preferences_usecase: PreferencesUseCase<PostgresPreferencesRepository>,
    pub device_tokens_usecase: DeviceTokensUseCase<PostgresDeviceTokenRepository>,
    pub hub: Arc<ConnectionHub>,
    pub jwt_service: JwtService,
    pub api_keys: Vec<String>,
    pub metrics_handle: PrometheusHandle,
    pub pool: PgPool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = config::AppConfig::from_env()?;

    telemetry::init(&config);

    tracing::info!("starting the notification service");

    let metrics_handle = PrometheusBuilder::new().install_recorder()?;
    metrics_process::Collector::default().describe();
    metrics::describe_counter!("notifications_dispatched_total", "Channel deliveries by final status");
    metrics::describe_counter!("notifications_suppressed_total", "Requests or channels gated by preferences");
    metrics::describe_counter!("ws_slow_consumers_dropped_total", "Connections dropped for a full mailbox");
    metrics::describe_gauge!("ws_connections", "Live websocket connections");
    tracing::info!("prometheus metrics initialized");

    tracing::info!("config loaded, telemetry_enabled={}", config.telemetry_enabled);

    let pool = create_pool(&config.database_url, config.database_max_connections).await?;
    tracing::info!("database pool created");

    sqlx::migrate!().run(&pool).await?;
    tracing::info!("database migrations applied");

    let notification_repository = PostgresNotificationRepository::new(pool.clone());
    let preferences_repository = PostgresPreferencesRepository::new(pool.clone());
    let device_token_repository = PostgresDeviceTokenRepository::new(pool.clone());

    let email_sender = match config.sendgrid() {
        Some((api_key, from_email)) => Some(SendGridClient::new(
            config.sendgrid_base_url.clone(),
            api_key.to_string(),
            from_email.to_string(),
            config.sendgrid_from_name.clone(),
        )?),
        None => {
            tracing::warn!("SendGrid not configured, email channel disabled");
            None
        }
    };

    let push_sender = match config.fcm() {
        Some((project_id, access_token)) => Some(FcmClient::new(
            config.fcm_base_url.clone(),
            project_id.to_string(),
            access_token.to_string(),
            device_token_repository.clone(),
        )?),
        None => {
            tracing::warn!("FCM not configured, push channel disabled");
            None
        }
    };

    let api_keys = config.api_keys();
    if api_keys.is_empty() {
        tracing::warn!("no internal api keys configured, internal endpoints are unauthenticated");
    }

    let hub = Arc::new(ConnectionHub::new(config.ws_mailbox_capacity));

    let shared_state = Arc::new(AppState {
        dispatch_service: DispatchService::new(
            notification_repository.clone(),
            preferences_repository.clone(),
            device_token_repository.clone(),
            email_sender,
            push_sender,
            hub.clone(),
        ),
        notifications_usecase: NotificationsUseCase::new(notification_repository),
        preferences_usecase: PreferencesUseCase::new(preferences_repository),
        device_tokens_usecase: DeviceTokensUseCase::new(device_token_repository),
        hub: hub.clone(),
        jwt_service: JwtService::new(config.jwt_secret.clone()),
        api_keys,
        metrics_handle,
        pool,
    });

    let retention_task = (config.retention_days > 0)
        .then(|| tokio::spawn(run_retention_sweep(shared_state.clone(), config.retention_days)));

    let user_api = Router::new()
        .route("/api/v1/notifications", get(list_notifications))
        .route("/api/v1/notifications/unread-count", get(unread_count))
        .route("/api/v1/notifications/read-all", post(mark_all_as_read))
        .route("/api/v1/notifications/{id}", get(get_notification))
        .route("/api/v1/notifications/{id}/read", post(mark_as_read))
        .route(
            "/api/v1/preferences",
            get(get_preferences).put(update_preferences).patch(update_preferences),
        )
        .route("/api/v1/device-tokens", get(list_devices).post(register_device))
        .route("/api/v1/device-tokens/{token}", delete(unregister_device))
        .layer(middleware::from_fn_with_state(
            shared_state.clone(),
            auth_middleware,
        ));

    let internal_api = Router::new()
        .route("/internal/v1/notify", post(notify))
        .route("/internal/v1/notify/bulk", post(notify_bulk))
        .layer(middleware::from_fn_with_state(
            shared_state.clone(),
            api_key_middleware,
        ));

    let cors = cors_layer(&config.cors_origins())?;

    let router = Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/ws/notifications", get(websocket_handler))
        .merge(user_api)
        .merge(internal_api)
        .with_state(shared_state);
    let router = with_http_layers(router, cors);

    let addr = format!("0.0.0.0:{}", config.server_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("notification service running on {}", addr);
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    hub.shutdown().await;
    if let Some(task) = retention_task {
        task.abort();
    }

    if config.telemetry_enabled {
        telemetry::shutdown_telemetry();
    }

    Ok(())
}

async fn run_retention_sweep(state: Arc<AppState>, retention_days: u32) {
    let mut interval = tokio::time::interval(RETENTION_SWEEP_INTERVAL);
    tracing::info!(retention_days, "retention sweep started");

    loop {
        interval.tick().await;
        if let Err(e) = state.notifications_usecase.purge_older_than(retention_days).await {
            tracing::error!(error = %e, "retention sweep failed");
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received");
}

async fn metrics(State(state): State<Arc<AppState>>) -> String {
    metrics_process::Collector::default().collect();
    state.metrics_handle.render()
}

#[tracing::instrument]
async fn healthz() -> &'static str {
    "OK"
}

#[derive(Serialize)]
struct ReadinessResponse {
    status: &'static str,
    database: bool,
    connected_users: usize,
    connections: usize,
}

async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let database = match sqlx::query("SELECT 1").execute(&state.pool).await {
        Ok(_) => true,
        Err(e) => {
            tracing::warn!(error = %e, "readiness check: database unavailable");
            false
        }
    };

    let body = ReadinessResponse {
        status: if database { "ready" } else { "unavailable" },
        database,
        connected_users: state.hub.connected_users().await,
        connections: state.hub.total_connections().await,
    };
    let status = if database { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };

    (status, Json(body))
}
