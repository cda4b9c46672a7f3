// ABOUTME: Tower layers implementing the per-class security policies.
// ABOUTME: Each layer is independent; the server decides which chain gets which layers.

pub mod content_type;
pub mod cors;
pub mod csrf;
pub mod headers;

use axum::body::Body;
use axum::http::{Response, StatusCode};
use axum::response::IntoResponse;

pub use content_type::ContentTypeLayer;
pub use cors::CorsLayer;
pub use csrf::{CookieOptions, CsrfLayer, CsrfToken, SameSite};
pub use headers::SecurityHeadersLayer;

/// Short plain-text response for a request the policy layer refuses.
pub(crate) fn reject(status: StatusCode, message: &'static str) -> Response<Body> {
    (status, message).into_response()
}
