//! Tower middleware that sends every call of a service through a [`Regulator`].
//!
//! This is the "install" hook: wrap the service that performs upstream calls once, and every
//! request is classified by its [`Target`]. Unregulated requests pass straight through.
//!
//! ```rust
//! use tollgate::{RegulatedRequest, Regulator, RegulatorConfig, Target};
//! use tower::{service_fn, ServiceBuilder, ServiceExt};
//!
//! #[derive(Clone)]
//! struct Hook { url: &'static str }
//!
//! impl RegulatedRequest for Hook {
//!     fn target(&self) -> Target {
//!         Target::from_url(self.url).unwrap_or_else(|| Target::new("", self.url))
//!     }
//! }
//!
//! # #[tokio::main]
//! # async fn main() {
//! let config = RegulatorConfig::builder().regulate_host("hooks.example.com").build().unwrap();
//! let regulator = Regulator::new(config);
//! let svc = ServiceBuilder::new()
//!     .layer(regulator.install())
//!     .service(service_fn(|_req: Hook| async { Ok::<u16, std::io::Error>(200) }));
//! let status = svc.oneshot(Hook { url: "https://hooks.example.com/catch/1" }).await.unwrap();
//! assert_eq!(status, 200);
//! # }
//! ```

use crate::classifier::Target;
use crate::error::RegulatorError;
use crate::retry::UpstreamResponse;
use crate::telemetry::TelemetrySink;
use crate::Regulator;
use futures::future::BoxFuture;
use std::task::{Context, Poll};
use tower::ServiceExt;
use tower_layer::Layer;
use tower_service::Service;

/// A request that knows where it is going.
pub trait RegulatedRequest {
    fn target(&self) -> Target;
}

/// Layer produced by [`Regulator::install`]. Clones share the regulator.
#[derive(Clone, Debug)]
pub struct RegulatorLayer<S> {
    regulator: Regulator<S>,
}

impl<S> RegulatorLayer<S> {
    pub fn new(regulator: Regulator<S>) -> Self {
        Self { regulator }
    }
}

impl<Svc, S> Layer<Svc> for RegulatorLayer<S> {
    type Service = RegulatorService<Svc, S>;

    fn layer(&self, service: Svc) -> Self::Service {
        RegulatorService { inner: service, regulator: self.regulator.clone() }
    }
}

/// Service produced by [`RegulatorLayer`].
///
/// Each attempt runs on a fresh clone of the inner service driven to readiness with `oneshot`,
/// so `poll_ready` here is always ready.
#[derive(Clone, Debug)]
pub struct RegulatorService<Svc, S> {
    inner: Svc,
    regulator: Regulator<S>,
}

impl<Svc, S, Req> Service<Req> for RegulatorService<Svc, S>
where
    Req: RegulatedRequest + Clone + Send + 'static,
    Svc: Service<Req> + Clone + Send + 'static,
    Svc::Response: UpstreamResponse + Send + 'static,
    Svc::Error: Send + 'static,
    Svc::Future: Send + 'static,
    S: TelemetrySink,
{
    type Response = Svc::Response;
    type Error = RegulatorError<Svc::Error>;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let regulator = self.regulator.clone();
        let inner = self.inner.clone();
        Box::pin(async move {
            let target = req.target();
            regulator.execute(&target, move || inner.clone().oneshot(req.clone())).await
        })
    }
}
