// ABOUTME: Response header injection for the browser chain.
// ABOUTME: Adds Content-Security-Policy, Referer-Policy and, in a secure context, HSTS.

use axum::http::{HeaderName, HeaderValue, header};
use safeweb_core::ContentSecurityPolicy;
use safeweb_core::policy::{REFERER_POLICY, strict_transport_security};
use tower::Layer;
use tower_http::set_header::{SetResponseHeader, SetResponseHeaderLayer};

use crate::config::{Config, ConfigError, header_value};

/// The header as named by browsers' historical spelling of "referrer".
pub static REFERER_POLICY_HEADER: HeaderName = HeaderName::from_static("referer-policy");

/// Service produced by [`SecurityHeadersLayer`]: one overriding setter per header.
pub type SecurityHeaders<S> = SetResponseHeader<
    SetResponseHeader<
        SetResponseHeader<SetResponseHeader<S, Option<HeaderValue>>, HeaderValue>,
        HeaderValue,
    >,
    HeaderValue,
>;

/// A tower Layer that stamps the browser security headers onto every response,
/// replacing any value the handler set.
#[derive(Debug, Clone)]
pub struct SecurityHeadersLayer {
    csp: HeaderValue,
    referer: HeaderValue,
    hsts: Option<HeaderValue>,
}

impl SecurityHeadersLayer {
    /// Headers for browser-classified responses under the given configuration.
    pub fn for_browser(config: &Config) -> Result<Self, ConfigError> {
        let csp = ContentSecurityPolicy::new(config.csp_allow_inline_styles).header_value();
        let csp = header_value("content_security_policy", &csp)?;

        let hsts = if config.secure_context {
            let options = config.strict_transport_security_options.as_deref();
            Some(header_value(
                "strict_transport_security_options",
                &strict_transport_security(options),
            )?)
        } else {
            None
        };

        Ok(Self {
            csp,
            referer: HeaderValue::from_static(REFERER_POLICY),
            hsts,
        })
    }
}

impl<S> Layer<S> for SecurityHeadersLayer {
    type Service = SecurityHeaders<S>;

    fn layer(&self, inner: S) -> Self::Service {
        let inner = SetResponseHeaderLayer::overriding(
            header::STRICT_TRANSPORT_SECURITY,
            self.hsts.clone(),
        )
        .layer(inner);
        let inner =
            SetResponseHeaderLayer::overriding(header::REFERRER_POLICY, self.referer.clone())
                .layer(inner);
        let inner = SetResponseHeaderLayer::overriding(
            REFERER_POLICY_HEADER.clone(),
            self.referer.clone(),
        )
        .layer(inner);
        SetResponseHeaderLayer::overriding(header::CONTENT_SECURITY_POLICY, self.csp.clone())
            .layer(inner)
    }
}
