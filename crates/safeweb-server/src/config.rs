// ABOUTME: Server configuration, its cross-field validator, and environment-driven settings.
// ABOUTME: Every invalid combination is rejected here, before any middleware chain is built.

use std::fmt;
use std::net::SocketAddr;

use axum::Router;
use axum::http::HeaderValue;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use safeweb_core::csrf::{CsrfError, MIN_KEY_LEN};
use safeweb_core::policy::strict_transport_security;
use safeweb_core::route::DEFAULT_API_PREFIX;
use thiserror::Error;

/// Errors that can occur while building or validating a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(
        "incomplete CORS configuration: access_control_allow_origin and access_control_allow_methods must both be set or both be empty"
    )]
    IncompleteCorsConfig,

    #[error("api_prefix must start with '/' and name a sub-path, got {0:?}")]
    InvalidApiPrefix(String),

    #[error("csrf_secret must be at least 32 bytes, got {0}")]
    CsrfSecretTooShort(usize),

    #[error("{field} cannot be sent as an HTTP header value: {value:?}")]
    InvalidHeaderValue { field: &'static str, value: String },

    #[error("SAFEWEB_BIND is not a valid socket address: {0}")]
    InvalidBind(String),

    #[error("SAFEWEB_CSRF_SECRET is not valid base64")]
    InvalidCsrfSecret,
}

impl From<CsrfError> for ConfigError {
    fn from(err: CsrfError) -> Self {
        match err {
            CsrfError::KeyTooShort(len) => ConfigError::CsrfSecretTooShort(len),
        }
    }
}

/// Everything the server needs, supplied once at construction time.
#[derive(Clone)]
pub struct Config {
    /// Handler for machine-to-machine routes under `api_prefix`.
    pub api_mux: Option<Router>,
    /// Handler for every other route.
    pub browser_mux: Option<Router>,
    pub access_control_allow_origin: Vec<String>,
    pub access_control_allow_methods: Vec<String>,
    /// Served over HTTPS: marks the CSRF cookie `Secure` and enables HSTS.
    pub secure_context: bool,
    pub csp_allow_inline_styles: bool,
    pub api_prefix: String,
    /// Key that signs CSRF session cookies. Random per server when absent, which
    /// invalidates every session on restart.
    pub csrf_secret: Option<Vec<u8>>,
    pub cookies_same_site_lax: bool,
    /// Appended to `max-age=...` in `Strict-Transport-Security`.
    pub strict_transport_security_options: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_mux: None,
            browser_mux: None,
            access_control_allow_origin: Vec::new(),
            access_control_allow_methods: Vec::new(),
            secure_context: false,
            csp_allow_inline_styles: false,
            api_prefix: DEFAULT_API_PREFIX.to_string(),
            csrf_secret: None,
            cookies_same_site_lax: false,
            strict_transport_security_options: None,
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("api_mux", &self.api_mux.is_some())
            .field("browser_mux", &self.browser_mux.is_some())
            .field("access_control_allow_origin", &self.access_control_allow_origin)
            .field("access_control_allow_methods", &self.access_control_allow_methods)
            .field("secure_context", &self.secure_context)
            .field("csp_allow_inline_styles", &self.csp_allow_inline_styles)
            .field("api_prefix", &self.api_prefix)
            .field("csrf_secret", &self.csrf_secret.as_ref().map(|_| "<redacted>"))
            .field("cookies_same_site_lax", &self.cookies_same_site_lax)
            .field(
                "strict_transport_security_options",
                &self.strict_transport_security_options,
            )
            .finish()
    }
}

impl Config {
    pub fn cors_enabled(&self) -> bool {
        !self.access_control_allow_origin.is_empty()
    }
}

/// Check a configuration for internal consistency.
///
/// This is the single gate for cross-field constraints; middleware assumes a
/// configuration that passed it.
pub fn validate(config: Config) -> Result<Config, ConfigError> {
    let has_origins = !config.access_control_allow_origin.is_empty();
    let has_methods = !config.access_control_allow_methods.is_empty();
    if has_origins != has_methods {
        return Err(ConfigError::IncompleteCorsConfig);
    }

    let prefix = config.api_prefix.trim_end_matches('/');
    if !config.api_prefix.starts_with('/') || prefix.is_empty() {
        return Err(ConfigError::InvalidApiPrefix(config.api_prefix.clone()));
    }

    if let Some(secret) = &config.csrf_secret {
        if secret.len() < MIN_KEY_LEN {
            return Err(ConfigError::CsrfSecretTooShort(secret.len()));
        }
    }

    if has_origins {
        header_value(
            "access_control_allow_origin",
            &config.access_control_allow_origin.join(", "),
        )?;
        header_value(
            "access_control_allow_methods",
            &config.access_control_allow_methods.join(", "),
        )?;
    }

    header_value(
        "strict_transport_security_options",
        &strict_transport_security(config.strict_transport_security_options.as_deref()),
    )?;

    Ok(config)
}

/// Convert a configured string into a header value, naming the field on failure.
pub(crate) fn header_value(field: &'static str, value: &str) -> Result<HeaderValue, ConfigError> {
    HeaderValue::from_str(value).map_err(|_| ConfigError::InvalidHeaderValue {
        field,
        value: value.to_string(),
    })
}

/// Deployment settings read from the environment, for the `safeweb` binary.
#[derive(Clone)]
pub struct Settings {
    pub bind: SocketAddr,
    pub secure_context: bool,
    pub cors_origins: Vec<String>,
    pub cors_methods: Vec<String>,
    pub csp_allow_inline_styles: bool,
    pub csrf_secret: Option<Vec<u8>>,
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("bind", &self.bind)
            .field("secure_context", &self.secure_context)
            .field("cors_origins", &self.cors_origins)
            .field("cors_methods", &self.cors_methods)
            .field("csp_allow_inline_styles", &self.csp_allow_inline_styles)
            .field("csrf_secret", &self.csrf_secret.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Settings {
    /// Load settings from environment variables with sensible defaults.
    ///
    /// Environment variables:
    /// - SAFEWEB_BIND: socket address to bind (default: 127.0.0.1:8080)
    /// - SAFEWEB_SECURE_CONTEXT: served over HTTPS (default: false)
    /// - SAFEWEB_CORS_ORIGINS: comma-separated allowed origins (default: none)
    /// - SAFEWEB_CORS_METHODS: comma-separated allowed methods (default: none)
    /// - SAFEWEB_CSP_ALLOW_INLINE_STYLES: relax CSP for inline styles (default: false)
    /// - SAFEWEB_CSRF_SECRET: base64 cookie signing key (default: random per process)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Settings::from_env`] with a custom variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let bind_str = lookup("SAFEWEB_BIND").unwrap_or_else(|| "127.0.0.1:8080".to_string());
        let bind: SocketAddr = bind_str
            .parse()
            .map_err(|_| ConfigError::InvalidBind(bind_str))?;

        let flag = |key: &str| {
            lookup(key)
                .map(|v| matches!(v.trim(), "true" | "1" | "yes"))
                .unwrap_or(false)
        };

        let list = |key: &str| -> Vec<String> {
            lookup(key)
                .map(|v| {
                    v.split(',')
                        .map(str::trim)
                        .filter(|item| !item.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default()
        };

        let csrf_secret = match lookup("SAFEWEB_CSRF_SECRET").filter(|s| !s.is_empty()) {
            Some(encoded) => Some(
                STANDARD
                    .decode(encoded.trim())
                    .map_err(|_| ConfigError::InvalidCsrfSecret)?,
            ),
            None => None,
        };

        Ok(Self {
            bind,
            secure_context: flag("SAFEWEB_SECURE_CONTEXT"),
            cors_origins: list("SAFEWEB_CORS_ORIGINS"),
            cors_methods: list("SAFEWEB_CORS_METHODS"),
            csp_allow_inline_styles: flag("SAFEWEB_CSP_ALLOW_INLINE_STYLES"),
            csrf_secret,
        })
    }

    /// Combine the settings with the application's handlers.
    pub fn into_config(self, api_mux: Option<Router>, browser_mux: Option<Router>) -> Config {
        Config {
            api_mux,
            browser_mux,
            access_control_allow_origin: self.cors_origins,
            access_control_allow_methods: self.cors_methods,
            secure_context: self.secure_context,
            csp_allow_inline_styles: self.csp_allow_inline_styles,
            csrf_secret: self.csrf_secret,
            ..Config::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn empty_config_is_valid() {
        assert!(validate(Config::default()).is_ok());
    }

    #[test]
    fn origins_without_methods_are_rejected() {
        let config = Config {
            access_control_allow_origin: vec!["https://foobar.com".into()],
            ..Config::default()
        };
        assert!(matches!(
            validate(config),
            Err(ConfigError::IncompleteCorsConfig)
        ));
    }

    #[test]
    fn methods_without_origins_are_rejected() {
        let config = Config {
            access_control_allow_methods: vec!["GET".into(), "POST".into()],
            ..Config::default()
        };
        assert!(matches!(
            validate(config),
            Err(ConfigError::IncompleteCorsConfig)
        ));
    }

    #[test]
    fn complete_cors_config_is_valid() {
        let config = Config {
            access_control_allow_origin: vec!["https://foobar.com".into()],
            access_control_allow_methods: vec!["GET".into(), "POST".into()],
            ..Config::default()
        };
        let config = validate(config).unwrap();
        assert!(config.cors_enabled());
    }

    #[test]
    fn bad_api_prefixes_are_rejected() {
        for prefix in ["api", "/", ""] {
            let config = Config {
                api_prefix: prefix.to_string(),
                ..Config::default()
            };
            assert!(
                matches!(validate(config), Err(ConfigError::InvalidApiPrefix(_))),
                "prefix {prefix:?} should be rejected"
            );
        }
    }

    #[test]
    fn short_csrf_secret_is_rejected() {
        let config = Config {
            csrf_secret: Some(vec![1u8; 16]),
            ..Config::default()
        };
        assert!(matches!(
            validate(config),
            Err(ConfigError::CsrfSecretTooShort(16))
        ));
    }

    #[test]
    fn unencodable_cors_origin_is_rejected() {
        let config = Config {
            access_control_allow_origin: vec!["https://foo.com\n".into()],
            access_control_allow_methods: vec!["GET".into()],
            ..Config::default()
        };
        let err = validate(config).unwrap_err();
        assert!(err.to_string().contains("access_control_allow_origin"));
    }

    #[test]
    fn unencodable_hsts_options_are_rejected() {
        let config = Config {
            strict_transport_security_options: Some("pre\r\nload".into()),
            ..Config::default()
        };
        assert!(matches!(
            validate(config),
            Err(ConfigError::InvalidHeaderValue { field: "strict_transport_security_options", .. })
        ));
    }

    #[test]
    fn debug_output_redacts_csrf_secret() {
        let config = Config {
            csrf_secret: Some(b"super-secret-key-material-0123456789".to_vec()),
            ..Config::default()
        };
        let rendered = format!("{config:?}");
        assert!(rendered.contains("<redacted>"));
        assert!(!rendered.contains("super-secret"));
    }

    #[test]
    fn settings_load_defaults() {
        let settings = Settings::from_lookup(|_| None).unwrap();
        assert_eq!(settings.bind, "127.0.0.1:8080".parse::<SocketAddr>().unwrap());
        assert!(!settings.secure_context);
        assert!(settings.cors_origins.is_empty());
        assert!(settings.cors_methods.is_empty());
        assert!(settings.csrf_secret.is_none());
    }

    #[test]
    fn settings_parse_lists_and_flags() {
        let settings = Settings::from_lookup(lookup_from(&[
            ("SAFEWEB_BIND", "0.0.0.0:9000"),
            ("SAFEWEB_SECURE_CONTEXT", "yes"),
            ("SAFEWEB_CORS_ORIGINS", "https://a.example, https://b.example,"),
            ("SAFEWEB_CORS_METHODS", "GET,POST"),
            ("SAFEWEB_CSP_ALLOW_INLINE_STYLES", "1"),
            ("SAFEWEB_CSRF_SECRET", &STANDARD.encode([3u8; 32])),
        ]))
        .unwrap();

        assert_eq!(settings.bind.port(), 9000);
        assert!(settings.secure_context);
        assert_eq!(settings.cors_origins, vec!["https://a.example", "https://b.example"]);
        assert_eq!(settings.cors_methods, vec!["GET", "POST"]);
        assert!(settings.csp_allow_inline_styles);
        assert_eq!(settings.csrf_secret, Some(vec![3u8; 32]));

        let config = validate(settings.into_config(None, None)).unwrap();
        assert!(config.secure_context);
        assert_eq!(config.api_prefix, "/api");
    }

    #[test]
    fn settings_reject_bad_bind() {
        let err =
            Settings::from_lookup(lookup_from(&[("SAFEWEB_BIND", "not-an-addr")])).unwrap_err();
        assert!(err.to_string().contains("SAFEWEB_BIND"));
    }

    #[test]
    fn settings_reject_bad_csrf_secret() {
        let err =
            Settings::from_lookup(lookup_from(&[("SAFEWEB_CSRF_SECRET", "%%%")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidCsrfSecret));
    }
}
