//! HTTP server assembly: open API routes, authentication, health and
//! middleware layers

mod auth;
mod cors;
mod health;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use chatrelay_config::Config;
use chatrelay_llm::LlmState;
use chatrelay_store::{ConversationStore, MemoryStore};
use tower_http::trace::TraceLayer;

/// Assembled server with all routes and middleware
pub struct Server {
    router: Router,
    listen_address: SocketAddr,
}

impl Server {
    /// Build the server from configuration with an in-memory store seeded
    /// from the configured applications
    ///
    /// # Errors
    ///
    /// Returns an error if the upstream client cannot be built
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let store = Arc::new(MemoryStore::from_applications(&config.applications));
        Self::with_store(config, store)
    }

    /// Build the server over an existing store
    ///
    /// # Errors
    ///
    /// Returns an error if the upstream client cannot be built
    pub fn with_store(config: &Config, store: Arc<dyn ConversationStore>) -> anyhow::Result<Self> {
        let listen_address = config
            .server
            .listen_address
            .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 3000)));

        let llm_state = LlmState::from_config(config, store.clone())?;

        let mut app = Router::new();

        // Health check
        if config.server.health.enabled {
            app = app.route(&config.server.health.path, axum::routing::get(health::health_handler));
        }

        // Open API routes, every one of them authenticated
        let open = chatrelay_llm::open_router(llm_state).route_layer(axum::middleware::from_fn(move |req, next| {
            let store = Arc::clone(&store);
            async move { auth::auth_middleware(store, req, next).await }
        }));
        app = app.merge(open);

        // Tracing
        app = app.layer(TraceLayer::new_for_http());

        // CORS
        if let Some(ref cors_config) = config.server.cors {
            app = app.layer(cors::cors_layer(cors_config));
        }

        Ok(Self {
            router: app,
            listen_address,
        })
    }

    /// Get the configured listen address
    #[must_use]
    pub const fn listen_address(&self) -> SocketAddr {
        self.listen_address
    }

    /// Consume the server and return the inner router
    ///
    /// Useful for testing when the caller manages the listener
    pub fn into_router(self) -> Router {
        self.router
    }

    /// Start serving requests
    ///
    /// Blocks until the cancellation token is triggered.
    ///
    /// # Errors
    ///
    /// Returns an error if binding the TCP listener or serving fails
    pub async fn serve(self, shutdown: tokio_util::sync::CancellationToken) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.listen_address).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!(%local_addr, "server listening");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                shutdown.cancelled().await;
                tracing::info!("graceful shutdown initiated");
            })
            .await?;

        Ok(())
    }
}
