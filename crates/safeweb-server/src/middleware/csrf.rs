// ABOUTME: CSRF guard for the browser chain, plus the CsrfToken extractor for handlers.
// ABOUTME: Issues a signed session cookie on first contact and checks tokens on state-changing methods.

use axum::body::{Body, to_bytes};
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderValue, Request, Response, StatusCode, header};
use safeweb_core::policy::is_safe;
use safeweb_core::{CsrfProtector, MediaType};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};

use super::reject;

pub const CSRF_COOKIE_NAME: &str = "safeweb_csrf";
pub const CSRF_HEADER_NAME: &str = "x-csrf-token";
pub const CSRF_FORM_FIELD: &str = "csrf_token";

/// Twelve hours.
pub const CSRF_COOKIE_MAX_AGE_SECS: u64 = 12 * 60 * 60;

/// Largest form body buffered while looking for the token field.
pub const MAX_FORM_BYTES: usize = 1024 * 1024;

/// Token bound to the current session, minted for every request that passes
/// the guard. Embed it in forms or echo it back in the `X-CSRF-Token` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsrfToken(pub String);

impl<S> FromRequestParts<S> for CsrfToken
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts.extensions.get::<CsrfToken>().cloned().ok_or((
            StatusCode::INTERNAL_SERVER_ERROR,
            "CSRF token is only available to browser handlers",
        ))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SameSite {
    #[default]
    Strict,
    Lax,
}

impl SameSite {
    fn as_str(&self) -> &'static str {
        match self {
            SameSite::Strict => "Strict",
            SameSite::Lax => "Lax",
        }
    }
}

/// Attributes of the session cookie.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CookieOptions {
    pub secure: bool,
    pub same_site: SameSite,
}

impl CookieOptions {
    /// Render a `Set-Cookie` value carrying the sealed session secret.
    pub fn render(&self, value: &str) -> String {
        let mut cookie = format!(
            "{CSRF_COOKIE_NAME}={value}; Path=/; Max-Age={CSRF_COOKIE_MAX_AGE_SECS}; HttpOnly; SameSite={}",
            self.same_site.as_str()
        );
        if self.secure {
            cookie.push_str("; Secure");
        }
        cookie
    }
}

/// A tower Layer that enforces CSRF tokens on state-changing browser requests.
#[derive(Clone)]
pub struct CsrfLayer {
    protector: Arc<dyn CsrfProtector>,
    cookie: CookieOptions,
}

impl CsrfLayer {
    pub fn new(protector: Arc<dyn CsrfProtector>, cookie: CookieOptions) -> Self {
        Self { protector, cookie }
    }
}

impl<S> Layer<S> for CsrfLayer {
    type Service = CsrfMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CsrfMiddleware {
            inner,
            protector: Arc::clone(&self.protector),
            cookie: self.cookie,
        }
    }
}

/// The middleware service behind [`CsrfLayer`].
#[derive(Clone)]
pub struct CsrfMiddleware<S> {
    inner: S,
    protector: Arc<dyn CsrfProtector>,
    cookie: CookieOptions,
}

impl<S> Service<Request<Body>> for CsrfMiddleware<S>
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
        let mut inner = self.inner.clone();
        let protector = Arc::clone(&self.protector);
        let cookie = self.cookie;

        Box::pin(async move {
            let existing =
                session_cookies(req.headers()).find_map(|sealed| protector.open(sealed));
            let is_new_session = existing.is_none();
            let secret = existing.unwrap_or_else(|| protector.new_session());

            let mut req = req;
            if !is_safe(req.method()) {
                if is_new_session {
                    tracing::debug!(
                        method = %req.method(),
                        path = %req.uri().path(),
                        "rejecting state-changing request without a CSRF session"
                    );
                    return Ok(reject(StatusCode::FORBIDDEN, "missing CSRF session"));
                }

                let (presented, rebuilt) = match presented_token(req).await {
                    Ok(found) => found,
                    Err(resp) => return Ok(resp),
                };
                req = rebuilt;

                let valid = presented.is_some_and(|token| protector.validate(&secret, &token));
                if !valid {
                    tracing::debug!(
                        method = %req.method(),
                        path = %req.uri().path(),
                        "rejecting state-changing request with missing or invalid CSRF token"
                    );
                    return Ok(reject(StatusCode::FORBIDDEN, "invalid CSRF token"));
                }
            }

            req.extensions_mut()
                .insert(CsrfToken(protector.issue_token(&secret)));

            let mut resp = inner.call(req).await?;

            if is_new_session {
                match HeaderValue::from_str(&cookie.render(&protector.seal(&secret))) {
                    Ok(value) => {
                        resp.headers_mut().append(header::SET_COOKIE, value);
                    }
                    Err(_) => tracing::warn!("sealed CSRF session is not a valid cookie value"),
                }
            }

            Ok(resp)
        })
    }
}

/// Every value sent under the session cookie name, in header order.
fn session_cookies(headers: &HeaderMap) -> impl Iterator<Item = &str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .filter(|(name, _)| *name == CSRF_COOKIE_NAME)
        .map(|(_, value)| value.trim_matches('"'))
}

/// Find the token in the header or, failing that, in a urlencoded form body.
///
/// Reading the form consumes the body, so the request is handed back rebuilt
/// from the buffered bytes.
async fn presented_token(
    req: Request<Body>,
) -> Result<(Option<String>, Request<Body>), Response<Body>> {
    if let Some(token) = req
        .headers()
        .get(CSRF_HEADER_NAME)
        .and_then(|v| v.to_str().ok())
    {
        let token = token.to_string();
        return Ok((Some(token), req));
    }

    let is_form = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| MediaType::FormUrlEncoded.matches(ct));
    if !is_form {
        return Ok((None, req));
    }

    let (parts, body) = req.into_parts();
    let bytes = to_bytes(body, MAX_FORM_BYTES)
        .await
        .map_err(|_| reject(StatusCode::PAYLOAD_TOO_LARGE, "form body too large"))?;

    let token = url::form_urlencoded::parse(&bytes)
        .find(|(name, _)| name == CSRF_FORM_FIELD)
        .map(|(_, value)| value.into_owned());

    Ok((token, Request::from_parts(parts, Body::from(bytes))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::routing::get;
    use safeweb_core::{HmacCsrf, SessionSecret};
    use axum::http::Method;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tower::ServiceExt;

    fn hmac() -> Arc<dyn CsrfProtector> {
        Arc::new(HmacCsrf::new(&[5u8; 32]).unwrap())
    }

    fn guarded(protector: Arc<dyn CsrfProtector>, cookie: CookieOptions) -> CsrfMiddleware<Router> {
        let router = Router::new().route(
            "/",
            get(|token: CsrfToken| async move { token.0 }).post(|| async { "posted" }),
        );
        CsrfLayer::new(protector, cookie).layer(router)
    }

    fn set_cookie(resp: &Response<Body>) -> Option<String> {
        resp.headers()
            .get(header::SET_COOKIE)
            .map(|v| v.to_str().unwrap().to_string())
    }

    async fn body_string(resp: Response<Body>) -> String {
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    /// GET once and return (cookie pair, token).
    async fn harvest(protector: &Arc<dyn CsrfProtector>) -> (String, String) {
        let resp = guarded(Arc::clone(protector), CookieOptions::default())
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let cookie = set_cookie(&resp).expect("first GET should set a session cookie");
        let pair = cookie.split(';').next().unwrap().to_string();
        let token = body_string(resp).await;
        (pair, token)
    }

    #[tokio::test]
    async fn first_get_issues_cookie_and_token() {
        let resp = guarded(hmac(), CookieOptions::default())
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        let cookie = set_cookie(&resp).unwrap();
        assert!(cookie.starts_with("safeweb_csrf="));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("SameSite=Strict"));
        assert!(!cookie.contains("Secure"));
        assert!(!body_string(resp).await.is_empty());
    }

    #[tokio::test]
    async fn secure_and_lax_options_are_rendered() {
        let options = CookieOptions {
            secure: true,
            same_site: SameSite::Lax,
        };
        let resp = guarded(hmac(), options)
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        let cookie = set_cookie(&resp).unwrap();
        assert!(cookie.ends_with("; Secure"));
        assert!(cookie.contains("SameSite=Lax"));
    }

    #[tokio::test]
    async fn post_without_session_is_forbidden() {
        let resp = guarded(hmac(), CookieOptions::default())
            .oneshot(Request::post("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        assert!(set_cookie(&resp).is_none());
    }

    #[tokio::test]
    async fn post_with_session_but_no_token_is_forbidden() {
        let protector = hmac();
        let (cookie, _) = harvest(&protector).await;

        let resp = guarded(protector, CookieOptions::default())
            .oneshot(
                Request::post("/")
                    .header(header::COOKIE, cookie)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn post_with_header_token_passes() {
        let protector = hmac();
        let (cookie, token) = harvest(&protector).await;

        let resp = guarded(protector, CookieOptions::default())
            .oneshot(
                Request::post("/")
                    .header(header::COOKIE, cookie)
                    .header("X-CSRF-Token", token)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(set_cookie(&resp).is_none(), "existing session is not re-issued");
        assert_eq!(body_string(resp).await, "posted");
    }

    #[tokio::test]
    async fn post_with_form_field_token_passes_and_keeps_body() {
        let protector = hmac();
        let (cookie, token) = harvest(&protector).await;

        let router = Router::new().route(
            "/",
            axum::routing::post(|body: String| async move { body }),
        );
        let svc = CsrfLayer::new(protector, CookieOptions::default()).layer(router);

        let form = format!("name=ada&{CSRF_FORM_FIELD}={token}");
        let resp = svc
            .oneshot(
                Request::post("/")
                    .header(header::COOKIE, format!("theme=dark; {cookie}"))
                    .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                    .body(Body::from(form.clone()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_string(resp).await, form);
    }

    #[tokio::test]
    async fn token_from_other_session_is_forbidden() {
        let protector = hmac();
        let (cookie, _) = harvest(&protector).await;
        let (_, foreign_token) = harvest(&protector).await;

        let resp = guarded(protector, CookieOptions::default())
            .oneshot(
                Request::post("/")
                    .header(header::COOKIE, cookie)
                    .header("X-CSRF-Token", foreign_token)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn forged_cookie_starts_new_session() {
        let resp = guarded(hmac(), CookieOptions::default())
            .oneshot(
                Request::get("/")
                    .header(header::COOKIE, "safeweb_csrf=forged.value")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert!(set_cookie(&resp).is_some());
    }

    #[tokio::test]
    async fn junk_cookie_does_not_shadow_valid_session() {
        let protector = hmac();
        let (cookie, token) = harvest(&protector).await;

        let resp = guarded(Arc::clone(&protector), CookieOptions::default())
            .oneshot(
                Request::get("/")
                    .header(header::COOKIE, format!("safeweb_csrf=junk; {cookie}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert!(set_cookie(&resp).is_none(), "valid session should be reused");

        let resp = guarded(protector, CookieOptions::default())
            .oneshot(
                Request::post("/")
                    .header(header::COOKIE, format!("safeweb_csrf=junk; {cookie}"))
                    .header("X-CSRF-Token", token)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    /// Counts calls so the guard's decisions can be checked without real crypto.
    struct CountingProtector {
        validations: AtomicUsize,
        accept: bool,
    }

    impl CsrfProtector for CountingProtector {
        fn new_session(&self) -> SessionSecret {
            SessionSecret::from_bytes([1u8; 32])
        }

        fn seal(&self, _secret: &SessionSecret) -> String {
            "sealed".to_string()
        }

        fn open(&self, sealed: &str) -> Option<SessionSecret> {
            (sealed == "sealed").then(|| SessionSecret::from_bytes([1u8; 32]))
        }

        fn issue_token(&self, _secret: &SessionSecret) -> String {
            "token".to_string()
        }

        fn validate(&self, _secret: &SessionSecret, _token: &str) -> bool {
            self.validations.fetch_add(1, Ordering::SeqCst);
            self.accept
        }
    }

    #[tokio::test]
    async fn safe_methods_never_validate() {
        let protector = Arc::new(CountingProtector {
            validations: AtomicUsize::new(0),
            accept: false,
        });
        let router = Router::new().route(
            "/",
            get(|| async { "ok" }).options(|| async { "ok" }),
        );
        let svc = CsrfLayer::new(protector.clone(), CookieOptions::default()).layer(router);

        for method in [Method::GET, Method::HEAD, Method::OPTIONS] {
            let resp = svc
                .clone()
                .oneshot(
                    Request::builder()
                        .method(method)
                        .uri("/")
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::OK);
        }
        assert_eq!(protector.validations.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn delete_is_guarded_like_post() {
        let protector = Arc::new(CountingProtector {
            validations: AtomicUsize::new(0),
            accept: false,
        });
        let router = Router::new().route("/", axum::routing::delete(|| async { "gone" }));
        let svc = CsrfLayer::new(protector.clone(), CookieOptions::default()).layer(router);

        let resp = svc
            .oneshot(
                Request::delete("/")
                    .header(header::COOKIE, "safeweb_csrf=sealed")
                    .header("X-CSRF-Token", "token")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        assert_eq!(protector.validations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn extractor_fails_outside_guard() {
        let router = Router::new().route("/", get(|_token: CsrfToken| async { "unreachable" }));
        let resp = router
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
