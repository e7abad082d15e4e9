mod api;
mod config;
mod tracker;

use std::sync::Arc;

use axum::http::Method;
use axum::routing::get;
use axum::Router;
use clap::Parser;
use feeds::{FeedUpdate, HistoryStore, PositionFeed};
use streaming::{RouteCache, RouteError};
use tokio::sync::mpsc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::AppState;
use crate::config::Args;
use crate::tracker::Tracker;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    args.validate()?;

    let source = args.build_source().await?;
    let routes = RouteCache::new(args.build_router()?);
    let history = match args.history_path() {
        Some(path) => {
            let name = args.item.clone();
            Some(HistoryStore::open(path, &name).await?)
        }
        None => None,
    };

    info!(
        "tracking via {} with {} waypoint(s), routing via {}",
        source.name(),
        args.waypoints.len(),
        routes.router_name()
    );
    let tracker = Arc::new(Tracker::new(routes, args.waypoints.clone(), history));
    let feed = PositionFeed::new(source, args.cadence());

    if args.once {
        if let Err(err) = tracker.load_route().await {
            warn!("continuing without route: {err}");
        }
        match feed.get_current_position().await {
            Ok(p) => tracker.apply_update(FeedUpdate::Position(p)).await,
            Err(err) => error!("{err}"),
        }
        println!("{}", serde_json::to_string_pretty(&tracker.status())?);
        return Ok(());
    }

    // Feed updates are applied by a single task, in delivery order.
    let (tx, mut rx) = mpsc::unbounded_channel::<FeedUpdate>();
    let applier = {
        let tracker = tracker.clone();
        tokio::spawn(async move {
            while let Some(update) = rx.recv().await {
                tracker.apply_update(update).await;
            }
        })
    };
    let subscription = feed.subscribe(move |update| {
        let _ = tx.send(update);
    });

    let route_task = {
        let tracker = tracker.clone();
        let retry = args.route_retry();
        tokio::spawn(async move {
            loop {
                if tracker.needs_route() {
                    if let Err(RouteError::InvalidWaypoints(msg)) = tracker.load_route().await {
                        warn!("waiting for usable waypoints: {msg}");
                    }
                }
                tokio::time::sleep(retry).await;
            }
        })
    };

    if args.no_serve {
        tokio::signal::ctrl_c().await?;
    } else {
        let state = AppState {
            tracker: tracker.clone(),
        };

        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_headers(Any)
            .allow_methods([Method::GET, Method::PUT, Method::OPTIONS]);

        let app = Router::new()
            .route("/healthz", get(api::healthz))
            .route("/map.geojson", get(api::get_map))
            .route("/status", get(api::get_status))
            .route("/history", get(api::get_history))
            .route("/events", get(api::get_events))
            .route(
                "/waypoints",
                get(api::get_waypoints).put(api::put_waypoints),
            )
            .layer(cors)
            .layer(TraceLayer::new_for_http())
            .with_state(state);

        let listener = tokio::net::TcpListener::bind(args.listen).await?;
        info!("tracker listening on http://{}", args.listen);
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = tokio::signal::ctrl_c().await;
            })
            .await?;
    }

    info!("shutting down");
    if !subscription.is_active() {
        warn!("feed polling had already stopped");
    }
    subscription.cancel();
    route_task.abort();
    applier.abort();
    Ok(())
}
