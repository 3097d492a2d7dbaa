//! Drives a [`Resolver`] on the tokio reactor.
//!
//! The resolver itself is loop-agnostic; this helper plugs it into tokio by
//! handing it a [`TokioWatch`] and calling [`Resolver::on_readable`] each time
//! the backend's descriptor becomes readable.

use super::backend::AsyncDnsBackend;
use super::resolver::{Resolver, ResolverRequest, ResolverResult};
use crate::base::neterror::NetError;
use crate::socket::watch::TokioWatch;
use std::cell::RefCell;
use std::rc::Rc;

/// Resolve `request` to completion.
///
/// Dropping the returned future cancels the outstanding query and releases
/// the backend.
///
/// The future is not `Send`. On a multi-thread runtime, run it with
/// [`tokio::task::spawn_local`] inside a [`tokio::task::LocalSet`].
pub async fn resolve<B, F>(request: ResolverRequest, open: F) -> Result<ResolverResult, NetError>
where
    B: AsyncDnsBackend + 'static,
    F: FnMut() -> Result<B, NetError> + 'static,
{
    let watch = TokioWatch::new();
    let slot: Rc<RefCell<Option<ResolverResult>>> = Rc::new(RefCell::new(None));

    let sink = slot.clone();
    let mut resolver = Resolver::new(open, watch.clone(), move |result| {
        *sink.borrow_mut() = Some(result);
    });
    resolver.start(request);

    while let Some(id) = resolver.watch_id() {
        let registered = watch.readable(id).await.map_err(|e| {
            tracing::warn!(error = %e, "readiness wait failed");
            NetError::DnsInitFailed
        })?;
        if !registered {
            break;
        }
        resolver.on_readable();
    }

    let result = slot.borrow_mut().take();
    result.ok_or_else(|| {
        tracing::error!(state = ?resolver.state(), "resolver stopped without a result");
        NetError::NameResolutionFailed
    })
}
