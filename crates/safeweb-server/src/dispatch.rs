// ABOUTME: Root service that classifies each request and forwards it to the matching policy chain.
// ABOUTME: Chains are fixed at construction; a class without a handler answers 404.

use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use safeweb_core::{Classifier, Route};
use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::util::BoxCloneSyncService;
use tower::{Service, ServiceExt};

use crate::middleware::reject;

/// A fully wrapped handler for one traffic class.
pub type PolicyChain = BoxCloneSyncService<Request<Body>, Response<Body>, Infallible>;

/// Routes each request to the API chain or the browser chain.
#[derive(Clone)]
pub struct Dispatcher {
    classifier: Arc<Classifier>,
    api: Option<PolicyChain>,
    browser: Option<PolicyChain>,
}

impl Dispatcher {
    pub fn new(
        classifier: Classifier,
        api: Option<PolicyChain>,
        browser: Option<PolicyChain>,
    ) -> Self {
        Self {
            classifier: Arc::new(classifier),
            api,
            browser,
        }
    }

    pub fn classify(&self, req: &Request<Body>) -> Route {
        self.classifier.classify(req.uri().path())
    }

    fn chain(&self, route: Route) -> Option<PolicyChain> {
        match route {
            Route::Api => self.api.clone(),
            Route::Browser => self.browser.clone(),
        }
    }
}

impl Service<Request<Body>> for Dispatcher {
    type Response = Response<Body>;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let route = self.classify(&req);
        tracing::debug!(%route, path = %req.uri().path(), "classified request");

        match self.chain(route) {
            Some(chain) => Box::pin(chain.oneshot(req)),
            None => {
                tracing::debug!(%route, "no handler configured for traffic class");
                Box::pin(async { Ok(reject(StatusCode::NOT_FOUND, "not found")) })
            }
        }
    }
}
