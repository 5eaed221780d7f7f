//! Read-only statistics endpoint.
//!
//! Serves query counters, cache usage, and per-server balancer state as
//! JSON. Strictly observational: nothing here can touch the resolution
//! pipeline.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{Value, json};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

use crate::balancer::LoadBalancer;
use crate::cache::ResolutionCache;
use crate::monitor::Monitor;
use crate::resolver::Pools;

#[derive(Clone)]
pub struct ApiState {
    pub monitor: Arc<Monitor>,
    pub cache: Arc<ResolutionCache>,
    pub balancer: Arc<LoadBalancer>,
    pub pools: Arc<Pools>,
}

pub async fn serve(listen: SocketAddr, state: ApiState) -> io::Result<()> {
    let app = Router::new()
        .route("/api/stats", get(stats))
        .route("/health", get(health))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(listen).await?;
    info!(addr = %listen, "stats endpoint listening");
    axum::serve(listener, app).await
}

async fn stats(State(state): State<ApiState>) -> Json<Value> {
    let monitor = state.monitor.snapshot();
    let cache = state.cache.stats();
    let cache_usage = if cache.capacity == 0 {
        0
    } else {
        cache.size * 100 / cache.capacity
    };

    Json(json!({
        "uptime": monitor.uptime_secs,
        "totalQueries": monitor.total_queries,
        "blockedQueries": monitor.blocked,
        "failedQueries": monitor.failed,
        "averageResponseTime": monitor.average_response_ms,
        "cacheHitRate": monitor.cache_hit_rate,
        "queryHistory": monitor.history,
        "cacheStats": {
            "usage": cache_usage,
            "hitRate": cache.hit_rate,
            "hits": cache.hits,
            "misses": cache.misses,
            "total": cache.size,
        },
        "loadBalancer": {
            "domestic": state.balancer.snapshot(&state.pools.domestic),
            "foreign": state.balancer.snapshot(&state.pools.foreign),
        },
    }))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
