//! HTTP Broadcast Server
//!
//! Axum server exposing the Server-Sent-Events subscribe endpoint and a
//! liveness probe. Owns the broadcast context and the scheduler task.

use std::convert::Infallible;
use std::sync::Arc;
use axum::{
    body::Body,
    extract::{rejection::QueryRejection, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::{catch_panic::CatchPanicLayer, cors::CorsLayer, trace::TraceLayer};
use tracing::{info, instrument};

use crate::config::BroadcasterConfig;
use crate::core::coord::{unix_timestamp, Coordinate};
use crate::feed::registry::SubscriberRegistry;
use crate::feed::scheduler::BroadcastScheduler;
use crate::network::delivery::{ChannelSink, DeliveryLoop};

/// Server errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Could not listen on the configured address.
    #[error("Failed to bind {addr}: {source}")]
    BindFailed {
        /// Address that was requested.
        addr: std::net::SocketAddr,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The accept loop failed.
    #[error("Server error: {0}")]
    Serve(#[from] std::io::Error),
}

/// State shared by the HTTP handlers and the scheduler.
pub struct BroadcastContext {
    /// Live subscribers.
    pub registry: Arc<SubscriberRegistry>,
    /// Runtime configuration.
    pub config: BroadcasterConfig,
    /// Cancelled on server shutdown; every connection holds a child token.
    pub shutdown: CancellationToken,
}

impl BroadcastContext {
    /// Create a context with an empty registry.
    pub fn new(config: BroadcasterConfig) -> Self {
        Self {
            registry: Arc::new(SubscriberRegistry::new()),
            config,
            shutdown: CancellationToken::new(),
        }
    }
}

/// Query parameters of the subscribe endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct SubscribeParams {
    /// Free-form numeric filter.
    pub query: Option<String>,
}

/// Parse the subscriber filter. Missing or malformed values become 0.
pub fn parse_filter(raw: Option<&str>) -> f64 {
    raw.and_then(|q| q.parse::<f64>().ok()).unwrap_or(0.0)
}

/// GET /health: empty 200.
pub async fn health_handler() -> StatusCode {
    StatusCode::OK
}

/// GET /sse: register a subscriber and stream its frames until disconnect.
pub async fn subscribe_handler(
    State(ctx): State<Arc<BroadcastContext>>,
    params: Result<Query<SubscribeParams>, QueryRejection>,
) -> Response {
    let raw = params.ok().and_then(|Query(p)| p.query);
    let filter = parse_filter(raw.as_deref());

    let (handle, inbox) = ctx.registry.register(filter).await;
    let id = handle.id;
    // From here on the registry holds the only inbox sender.
    drop(handle);
    info!(subscriber = %id, filter, "New subscriber");

    let (sink, mut body_rx) = ChannelSink::channel(ctx.config.body_buffer);
    let cancel = ctx.shutdown.child_token();
    let disconnect_guard = cancel.clone().drop_guard();

    let delivery = DeliveryLoop::new(
        id,
        inbox,
        sink,
        ctx.registry.clone(),
        ctx.config.delivery(),
        cancel,
    );
    tokio::spawn(delivery.run());

    // Dropped by the transport when the client goes away, which cancels
    // the delivery loop.
    let body = async_stream::stream! {
        let _guard = disconnect_guard;
        while let Some(chunk) = body_rx.recv().await {
            yield Ok::<_, Infallible>(chunk);
        }
    };

    (
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
            (header::CONNECTION, "keep-alive"),
        ],
        Body::from_stream(body),
    )
        .into_response()
}

/// Assemble the router.
pub fn build_router(ctx: Arc<BroadcastContext>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/sse", get(subscribe_handler))
        .with_state(ctx)
        .layer(CatchPanicLayer::new())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// The position broadcast server.
pub struct BroadcastServer {
    /// Shared handler state.
    context: Arc<BroadcastContext>,
}

impl BroadcastServer {
    /// Create a server.
    pub fn new(config: BroadcasterConfig) -> Self {
        Self {
            context: Arc::new(BroadcastContext::new(config)),
        }
    }

    /// Shared context.
    pub fn context(&self) -> Arc<BroadcastContext> {
        self.context.clone()
    }

    /// Router bound to this server's context.
    pub fn router(&self) -> Router {
        build_router(self.context.clone())
    }

    /// Bind the configured address and serve until shutdown.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<(), ServerError> {
        let addr = self.context.config.bind_addr;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::BindFailed { addr, source })?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener until shutdown.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        let local_addr = listener.local_addr()?;
        info!("Position broadcaster listening on {}", local_addr);

        let scheduler = BroadcastScheduler::new(
            self.context.config.scheduler(),
            self.context.registry.clone(),
            Coordinate::initial(unix_timestamp()),
        );
        let scheduler_task = tokio::spawn(scheduler.run(self.context.shutdown.child_token()));

        let shutdown = self.context.shutdown.clone();
        let result = axum::serve(listener, self.router())
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await;

        // Stop the scheduler even if serving failed.
        self.context.shutdown.cancel();
        let _ = scheduler_task.await;
        self.context.registry.clear().await;

        result?;
        info!("Position broadcaster stopped");
        Ok(())
    }

    /// Signal shutdown: stop accepting, end all streams, stop the scheduler.
    pub fn shutdown(&self) {
        self.context.shutdown.cancel();
    }

    /// Active subscriber count.
    pub async fn subscriber_count(&self) -> usize {
        self.context.registry.len().await
    }
}
