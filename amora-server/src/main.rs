use axum::{middleware, routing::{get, post, put}, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use socketioxide::SocketIo;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

mod config;
mod events;
mod routes;
mod socket;

use amora_core::adapters::{HttpClassifier, MinioSigner, RabbitEventSink, RabbitNotifier, RedisCache, RedisRateLimiter};
use amora_core::ports::{Clock, SystemClock};
use amora_core::store::PgStore;
use amora_core::{Core, CoreConfig};
use amora_shared::clients::classifier::ClassifierClient;
use amora_shared::clients::db::{create_pool, DbPool, PoolSettings};
use amora_shared::clients::minio::MinioClient;
use amora_shared::clients::rabbitmq::RabbitMQClient;
use amora_shared::clients::redis::RedisClient;
use config::ServerConfig;

pub struct AppState {
    pub core: Core,
    pub db: DbPool,
    pub config: ServerConfig,
    pub rabbitmq: RabbitMQClient,
    pub redis: RedisClient,
    pub io: SocketIo,
    pub metrics_handle: PrometheusHandle,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    amora_shared::middleware::init_tracing("amora-server");
    let metrics_handle = amora_shared::middleware::init_metrics()?;

    let config = ServerConfig::load()?;
    let core_config = Arc::new(CoreConfig::load(&config.core_config)?);
    let port = config.port;

    let db = create_pool(
        &config.database_url,
        PoolSettings {
            max_size: config.database_pool_size,
            ..PoolSettings::default()
        },
    );
    let rabbitmq = RabbitMQClient::connect(&config.rabbitmq_url).await?;
    let redis = RedisClient::connect(&config.redis_url).await?;
    let minio = MinioClient::new(
        &config.minio_endpoint,
        &config.minio_access_key,
        &config.minio_secret_key,
        &config.minio_bucket,
    )
    .await;
    let classifier = ClassifierClient::new(
        &config.classifier_url,
        Duration::from_secs(core_config.timeouts.classifier),
    )?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let core = Core {
        store: Arc::new(PgStore::new(db.clone())),
        cache: Arc::new(RedisCache::new(redis.clone())),
        limiter: Arc::new(RedisRateLimiter::new(redis.clone(), clock.clone())),
        notifier: Arc::new(RabbitNotifier::new(rabbitmq.clone())),
        events: Arc::new(RabbitEventSink::new(rabbitmq.clone())),
        signer: Arc::new(MinioSigner::new(minio)),
        classifier: Arc::new(HttpClassifier::new(classifier)),
        clock,
        config: core_config,
    };

    let (sio_layer, io) = SocketIo::builder().build_layer();

    let state = Arc::new(AppState {
        core,
        db,
        config,
        rabbitmq,
        redis,
        io: io.clone(),
        metrics_handle,
    });

    io.ns("/", {
        let state = state.clone();
        move |socket: socketioxide::extract::SocketRef| {
            let state = state.clone();
            async move {
                socket::handlers::on_connect_with_state(socket, state).await;
            }
        }
    });

    let shutdown = CancellationToken::new();
    let mut workers = amora_core::sweeper::spawn_all(&state.core, &state.config.instance_id, &shutdown);

    let sub_state = state.clone();
    let sub_cancel = shutdown.child_token();
    workers.push(tokio::spawn(async move {
        if let Err(e) = events::subscriber::listen_user_registered(sub_state, sub_cancel).await {
            tracing::error!(error = %e, "user.registered subscriber failed");
        }
    }));

    let push_state = state.clone();
    let push_cancel = shutdown.child_token();
    workers.push(tokio::spawn(async move {
        if let Err(e) = events::subscriber::listen_push_fanout(push_state, push_cancel).await {
            tracing::error!(error = %e, "push fan-out subscriber failed");
        }
    }));

    let app = Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/metrics", get(routes::health::metrics))
        // Identity
        .route("/users/:id/standing", get(routes::identity::get_standing))
        .route(
            "/admin/users/:id/role",
            put(routes::identity::grant_role).delete(routes::identity::revoke_role),
        )
        // Blocks
        .route("/blocks", get(routes::blocks::list_blocked).post(routes::blocks::block_user))
        .route("/blocks/:user_id", get(routes::blocks::block_status).delete(routes::blocks::unblock_user))
        .route("/blocks/filter", post(routes::blocks::filter_candidates))
        // Swipes and matches
        .route("/swipes", post(routes::swipes::record_swipe))
        .route("/matches", get(routes::swipes::list_matches))
        .route("/matches/:id", get(routes::swipes::get_match).delete(routes::swipes::unmatch))
        .route("/matches/:id/rematch", post(routes::swipes::request_rematch))
        .route("/matches/:id/messages", post(routes::conversations::send_message))
        .route("/admin/matches/:id/deactivate", post(routes::swipes::deactivate_match))
        .route("/admin/matches/:id/reactivate", post(routes::swipes::reactivate_match))
        // Conversations
        .route("/conversations", get(routes::conversations::list_conversations))
        .route(
            "/conversations/:id",
            get(routes::conversations::get_conversation).delete(routes::conversations::delete_conversation),
        )
        .route("/conversations/:id/messages", get(routes::conversations::list_messages))
        .route("/conversations/:id/read", post(routes::conversations::mark_read))
        .route("/conversations/:id/unread", get(routes::conversations::unread_in_conversation))
        .route("/unread-count", get(routes::conversations::unread_count))
        // Ephemeral photos
        .route("/ephemeral-photos", post(routes::ephemeral::upload_photo))
        .route("/ephemeral-photos/access/:access_key", post(routes::ephemeral::view_photo))
        .route("/ephemeral-photos/views/:view_id/complete", post(routes::ephemeral::complete_view))
        .route("/ephemeral-photos/:id", get(routes::ephemeral::photo_status))
        .route("/ephemeral-photos/:id/expire", post(routes::ephemeral::expire_photo))
        .route("/ephemeral-photos/:id/views", get(routes::ephemeral::list_views))
        // Moderation
        .route("/reports", post(routes::moderation::submit_report))
        .route("/admin/reports", get(routes::moderation::list_reports))
        .route("/admin/reports/:id", get(routes::moderation::get_report))
        .route("/admin/reports/:id/review", post(routes::moderation::review_report))
        .route("/admin/users/:id/sanctions", post(routes::moderation::apply_sanction))
        .route("/admin/sanctions/:id/lift", post(routes::moderation::lift_sanction))
        .route("/users/:id/sanctions", get(routes::moderation::list_sanctions))
        .route("/sanctions/:id", get(routes::moderation::get_sanction))
        .route("/appeals", post(routes::moderation::submit_appeal))
        .route("/appeals/:id", get(routes::moderation::get_appeal))
        .route("/admin/appeals", get(routes::moderation::list_appeals))
        .route("/admin/appeals/:id/review", post(routes::moderation::review_appeal))
        .route_layer(middleware::from_fn(amora_shared::middleware::metrics_middleware))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(sio_layer),
        )
        .with_state(state.clone());

    let addr = format!("0.0.0.0:{port}");
    tracing::info!(addr = %addr, instance_id = %state.config.instance_id, "amora-server starting");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    shutdown.cancel();
    for worker in workers {
        match tokio::time::timeout(Duration::from_secs(10), worker).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!(error = %e, "background task panicked"),
            Err(_) => tracing::warn!("background task did not stop in time"),
        }
    }
    tracing::info!("amora-server stopped");

    Ok(())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }
    tracing::info!("shutdown signal received");
    shutdown.cancel();
}
