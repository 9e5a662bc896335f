use actix_web::{middleware::Logger, web, App, HttpResponse, HttpServer};
use anyhow::Context;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};

use livestream_service::config::Config;
use livestream_service::counter::{AtomicCounter, MemoryCounter, RedisCounter};
use livestream_service::jobs::{self, FinalizeJob, PreLiveJob, ViewerCountJob};
use livestream_service::redis_client::RedisClient;
use livestream_service::routes::{engagement, streams, wsroute};
use livestream_service::services::{AnalyticsSnapshotter, PgUserDirectory};
use livestream_service::state::AppState;
use livestream_service::store::{PgStreamStore, SharedStreamStore};
use livestream_service::websocket::{NullPubSub, PubSubTransport, RedisPubSub};
use livestream_service::{db, logging, metrics};

async fn health() -> HttpResponse {
    HttpResponse::Ok().body("ok")
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    logging::init_tracing();

    let config = Arc::new(Config::from_env().context("failed to load configuration")?);

    let pool = db::connect(&config.database_url)
        .await
        .context("failed to connect to Postgres")?;
    db::run_migrations(&pool)
        .await
        .context("failed to run migrations")?;

    let redis = match config.redis_url.as_deref() {
        Some(url) => match RedisClient::from_url(url).await {
            Ok(client) => Some(client),
            Err(e) => {
                warn!(error = %e, "failed to connect Redis, degrading to durable-store counting");
                None
            }
        },
        None => None,
    };

    let (counter, transport): (Arc<dyn AtomicCounter>, Arc<dyn PubSubTransport>) = match redis {
        Some(client) => {
            info!("Redis counter and pub/sub fan-out enabled");
            (
                Arc::new(RedisCounter::new(client.clone())),
                Arc::new(RedisPubSub::new(client)),
            )
        }
        None => {
            warn!("running with in-process counters and no cross-instance fan-out");
            (Arc::new(MemoryCounter::new()), Arc::new(NullPubSub))
        }
    };

    let store: SharedStreamStore = Arc::new(PgStreamStore::new(pool.clone()));
    let users = Arc::new(PgUserDirectory::new(pool.clone()));

    let state = AppState::assemble(config.clone(), store.clone(), users, counter, transport);
    let snapshotter = AnalyticsSnapshotter::new(store.clone());

    // Lifecycle jobs run for the whole process lifetime; the broadcast
    // channel tells them to stop once the HTTP server exits.
    let (shutdown_tx, _) = broadcast::channel(1);
    let _pre_live = jobs::spawn_job(
        Arc::new(PreLiveJob::new(
            store.clone(),
            state.broadcaster.clone(),
            std::time::Duration::from_secs(config.pre_live_interval_secs),
            config.pre_live_window(),
        )),
        shutdown_tx.subscribe(),
    );
    let _viewer_count = jobs::spawn_job(
        Arc::new(ViewerCountJob::new(
            store.clone(),
            state.counters.clone(),
            snapshotter.clone(),
            state.broadcaster.clone(),
            std::time::Duration::from_secs(config.viewer_count_interval_secs),
        )),
        shutdown_tx.subscribe(),
    );
    let _finalize = jobs::spawn_job(
        Arc::new(FinalizeJob::new(
            store.clone(),
            state.counters.clone(),
            snapshotter,
            state.broadcaster.clone(),
            std::time::Duration::from_secs(config.finalize_interval_secs),
            config.ending_grace(),
        )),
        shutdown_tx.subscribe(),
    );

    let bind_addr = config.bind_addr();
    info!(%bind_addr, "starting livestream-service");

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(state.clone()))
            .wrap(Logger::default())
            .service(
                web::scope("/api/v1")
                    .service(streams::create_stream)
                    .service(streams::list_live_streams)
                    .service(streams::get_stream)
                    .service(streams::start_stream)
                    .service(streams::end_stream)
                    .service(streams::stream_analytics)
                    .service(engagement::join_stream)
                    .service(engagement::leave_stream)
                    .service(engagement::post_comment)
                    .service(engagement::send_gift)
                    .service(engagement::like_stream)
                    .service(engagement::share_stream)
                    .service(engagement::send_reaction),
            )
            .service(wsroute::stream_ws)
            .route("/health", web::get().to(health))
            .route("/metrics", web::get().to(metrics::serve_metrics))
    })
    .bind(&bind_addr)
    .with_context(|| format!("failed to bind on {bind_addr}"))?
    .run()
    .await
    .context("HTTP server error")?;

    let _ = shutdown_tx.send(());
    Ok(())
}
