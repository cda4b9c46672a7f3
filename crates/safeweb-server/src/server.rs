// ABOUTME: Composition root: validates the config, builds both policy chains, and serves them.
// ABOUTME: Also provides graceful start/stop and a plain-HTTP to HTTPS redirect handler.

use axum::Router;
use axum::http::Uri;
use axum::response::Redirect;
use safeweb_core::csrf::generate_key;
use safeweb_core::{Classifier, CsrfProtector, HmacCsrf, MediaType, Route};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower::ServiceBuilder;
use tower::util::BoxCloneSyncService;
use tower_http::trace::TraceLayer;

use crate::config::{Config, ConfigError, header_value, validate};
use crate::dispatch::{Dispatcher, PolicyChain};
use crate::middleware::cors::CorsHeaders;
use crate::middleware::{
    ContentTypeLayer, CookieOptions, CorsLayer, CsrfLayer, SameSite, SecurityHeadersLayer,
};

/// An HTTP server whose API and browser traffic run through separate policy chains.
pub struct Server {
    handler: Router,
    shutdown: watch::Sender<bool>,
}

impl Server {
    /// Validate the configuration and build the root handler.
    ///
    /// CSRF cookies are signed with `csrf_secret`, or a random key when none is set.
    pub fn new(config: Config) -> Result<Self, ConfigError> {
        let config = validate(config)?;
        let key = config.csrf_secret.clone().unwrap_or_else(generate_key);
        let protector = HmacCsrf::new(&key)?;
        Self::build(config, Arc::new(protector))
    }

    /// Like [`Server::new`] with a caller-supplied CSRF scheme.
    pub fn with_csrf_protector(
        config: Config,
        protector: Arc<dyn CsrfProtector>,
    ) -> Result<Self, ConfigError> {
        let config = validate(config)?;
        Self::build(config, protector)
    }

    fn build(config: Config, protector: Arc<dyn CsrfProtector>) -> Result<Self, ConfigError> {
        let api = config
            .api_mux
            .clone()
            .map(|mux| api_chain(&config, mux))
            .transpose()?;
        let browser = config
            .browser_mux
            .clone()
            .map(|mux| browser_chain(&config, mux, protector))
            .transpose()?;

        let classifier = if api.is_some() {
            Classifier::new(config.api_prefix.clone())
        } else {
            Classifier::browser_only()
        };

        tracing::info!(
            api = api.is_some(),
            browser = browser.is_some(),
            api_prefix = ?classifier.api_prefix(),
            cors = config.cors_enabled(),
            secure_context = config.secure_context,
            "policy chains built"
        );

        let handler = Router::new()
            .fallback_service(Dispatcher::new(classifier, api, browser))
            .layer(TraceLayer::new_for_http());
        let (shutdown, _) = watch::channel(false);

        Ok(Self { handler, shutdown })
    }

    /// The root handler. Mount it on any listener or drive it directly in tests.
    pub fn handler(&self) -> Router {
        self.handler.clone()
    }

    /// Serve on an already-bound listener until [`Server::close`] is called.
    pub async fn serve(&self, listener: TcpListener) -> std::io::Result<()> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let mut closed = self.shutdown.subscribe();
        axum::serve(listener, self.handler())
            .with_graceful_shutdown(async move {
                let _ = closed.wait_for(|is_closed| *is_closed).await;
            })
            .await?;

        tracing::info!(address = %addr, "HTTP server stopped");
        Ok(())
    }

    pub async fn listen_and_serve(&self, addr: SocketAddr) -> std::io::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        self.serve(listener).await
    }

    /// Stop accepting connections and let in-flight requests finish.
    pub fn close(&self) {
        tracing::info!("shutdown requested");
        self.shutdown.send_replace(true);
    }
}

/// API chain: CORS preflight, then JSON-only bodies.
fn api_chain(config: &Config, mux: Router) -> Result<PolicyChain, ConfigError> {
    let cors = if config.cors_enabled() {
        Some(CorsHeaders {
            allow_origin: header_value(
                "access_control_allow_origin",
                &config.access_control_allow_origin.join(", "),
            )?,
            allow_methods: header_value(
                "access_control_allow_methods",
                &config.access_control_allow_methods.join(", "),
            )?,
        })
    } else {
        None
    };

    let service = ServiceBuilder::new()
        .layer(CorsLayer::new(cors))
        .layer(ContentTypeLayer::new(MediaType::for_route(Route::Api)))
        .service(mux);

    Ok(BoxCloneSyncService::new(service))
}

/// Browser chain: response headers on everything, then form-only bodies, then CSRF.
fn browser_chain(
    config: &Config,
    mux: Router,
    protector: Arc<dyn CsrfProtector>,
) -> Result<PolicyChain, ConfigError> {
    let cookie = CookieOptions {
        secure: config.secure_context,
        same_site: if config.cookies_same_site_lax {
            SameSite::Lax
        } else {
            SameSite::Strict
        },
    };

    let service = ServiceBuilder::new()
        .layer(SecurityHeadersLayer::for_browser(config)?)
        .layer(ContentTypeLayer::new(MediaType::for_route(Route::Browser)))
        .layer(CsrfLayer::new(protector, cookie))
        .service(mux);

    Ok(BoxCloneSyncService::new(service))
}

/// Handler for a plain-HTTP listener that sends every request to HTTPS on `fqdn`.
pub fn redirect_http(fqdn: impl Into<String>) -> Router {
    let fqdn: Arc<str> = Arc::from(fqdn.into());

    Router::new().fallback(move |uri: Uri| {
        let fqdn = Arc::clone(&fqdn);
        async move {
            let path = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
            Redirect::permanent(&format!("https://{fqdn}{path}"))
        }
    })
}
