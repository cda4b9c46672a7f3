// ABOUTME: Content-type gate for body-bearing requests (POST, PUT, PATCH).
// ABOUTME: API chains accept only JSON, browser chains only urlencoded forms; anything else is a 400.

use axum::body::Body;
use axum::http::{Request, Response, StatusCode, header};
use safeweb_core::MediaType;
use safeweb_core::policy::is_body_bearing;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tower::{Layer, Service};

use super::reject;

/// A tower Layer that rejects request bodies of the wrong media type.
#[derive(Debug, Clone, Copy)]
pub struct ContentTypeLayer {
    expected: MediaType,
}

impl ContentTypeLayer {
    pub fn new(expected: MediaType) -> Self {
        Self { expected }
    }
}

impl<S> Layer<S> for ContentTypeLayer {
    type Service = ContentTypeMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ContentTypeMiddleware {
            inner,
            expected: self.expected,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ContentTypeMiddleware<S> {
    inner: S,
    expected: MediaType,
}

impl<S> Service<Request<Body>> for ContentTypeMiddleware<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        if is_body_bearing(req.method()) {
            let accepted = req
                .headers()
                .get(header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .is_some_and(|ct| self.expected.matches(ct));

            if !accepted {
                tracing::debug!(
                    method = %req.method(),
                    path = %req.uri().path(),
                    expected = self.expected.essence(),
                    "rejecting request body with unsupported content type"
                );
                return Box::pin(async move {
                    Ok(reject(StatusCode::BAD_REQUEST, "invalid content type"))
                });
            }
        }

        let mut inner = self.inner.clone();
        Box::pin(async move { inner.call(req).await })
    }
}
