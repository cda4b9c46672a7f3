// ABOUTME: HTTP side of safeweb: config validation, policy middleware, dispatcher, and server.
// ABOUTME: Builds one root axum Router that keeps API and browser policies strictly apart.

pub mod config;
pub mod dispatch;
pub mod middleware;
pub mod server;

pub use config::{Config, ConfigError, Settings, validate};
pub use dispatch::Dispatcher;
pub use middleware::csrf::CsrfToken;
pub use server::{Server, redirect_http};
