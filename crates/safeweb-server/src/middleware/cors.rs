// ABOUTME: CORS preflight responder for the API chain.
// ABOUTME: Answers OPTIONS with the configured allow-lists; emits nothing when CORS is disabled.

use axum::body::Body;
use axum::http::{HeaderValue, Method, Request, Response, StatusCode, header};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};

/// Pre-rendered `Access-Control-Allow-*` values.
#[derive(Debug, Clone)]
pub struct CorsHeaders {
    pub allow_origin: HeaderValue,
    pub allow_methods: HeaderValue,
}

/// A tower Layer that answers CORS preflight requests.
///
/// Without headers (CORS disabled) every request, `OPTIONS` included, passes
/// through untouched.
#[derive(Debug, Clone, Default)]
pub struct CorsLayer {
    headers: Option<Arc<CorsHeaders>>,
}

impl CorsLayer {
    pub fn new(headers: Option<CorsHeaders>) -> Self {
        Self {
            headers: headers.map(Arc::new),
        }
    }

    pub fn disabled() -> Self {
        Self::default()
    }
}

impl<S> Layer<S> for CorsLayer {
    type Service = CorsMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CorsMiddleware {
            inner,
            headers: self.headers.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CorsMiddleware<S> {
    inner: S,
    headers: Option<Arc<CorsHeaders>>,
}

impl<S> Service<Request<Body>> for CorsMiddleware<S>
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
        if req.method() == Method::OPTIONS {
            if let Some(cors) = self.headers.clone() {
                tracing::debug!(path = %req.uri().path(), "answering CORS preflight");
                return Box::pin(async move { Ok(preflight_response(&cors)) });
            }
        }

        let mut inner = self.inner.clone();
        Box::pin(async move { inner.call(req).await })
    }
}

fn preflight_response(cors: &CorsHeaders) -> Response<Body> {
    let mut resp = Response::new(Body::empty());
    *resp.status_mut() = StatusCode::NO_CONTENT;
    let headers = resp.headers_mut();
    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, cors.allow_origin.clone());
    headers.insert(header::ACCESS_CONTROL_ALLOW_METHODS, cors.allow_methods.clone());
    resp
}
