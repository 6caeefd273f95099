//! One-shot observer of an asynchronous response
//!
//! An [`AsyncResponseHandler`] waits for a single value on a oneshot channel
//! and runs exactly one of its callbacks:
//!
//! - stop requested before a value arrives: `on_error`
//! - channel closed without a value: `on_error`
//! - value received: `on_success`, followed by `on_error` if it fails
//!
//! The handler knows nothing about what it is waiting for.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, PoisonError};
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

type BoxFuture<O> = Pin<Box<dyn Future<Output = O> + Send>>;
type SuccessFn<T> = Box<dyn FnOnce(T) -> BoxFuture<anyhow::Result<()>> + Send>;
type ErrorFn = Box<dyn FnOnce() -> BoxFuture<()> + Send>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HandlerError {
    #[error("an on-success callback is required")]
    MissingOnSuccess,

    #[error("an on-error callback is required")]
    MissingOnError,

    #[error("a response channel is required")]
    MissingResponse,
}

/// Something that can be asked to stop early
pub trait Stoppable: Send + Sync {
    fn stop(&self);
}

pub struct HandlerBuilder<T> {
    on_success: Option<SuccessFn<T>>,
    on_error: Option<ErrorFn>,
    response: Option<oneshot::Receiver<T>>,
    stop: Option<CancellationToken>,
}

impl<T: Send + 'static> Default for HandlerBuilder<T> {
    fn default() -> Self {
        Self {
            on_success: None,
            on_error: None,
            response: None,
            stop: None,
        }
    }
}

impl<T: Send + 'static> HandlerBuilder<T> {
    pub fn on_success<F, Fut>(mut self, callback: F) -> Self
    where
        F: FnOnce(T) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.on_success = Some(Box::new(move |value| Box::pin(callback(value))));
        self
    }

    pub fn on_error<F, Fut>(mut self, callback: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_error = Some(Box::new(move || Box::pin(callback())));
        self
    }

    pub fn response(mut self, response: oneshot::Receiver<T>) -> Self {
        self.response = Some(response);
        self
    }

    /// Use an existing token as the stop signal, so that whoever produces
    /// the response observes the stop too. A fresh token is used otherwise.
    pub fn stop_token(mut self, token: CancellationToken) -> Self {
        self.stop = Some(token);
        self
    }

    pub fn build(self) -> Result<AsyncResponseHandler<T>, HandlerError> {
        let on_success = self.on_success.ok_or(HandlerError::MissingOnSuccess)?;
        let on_error = self.on_error.ok_or(HandlerError::MissingOnError)?;
        let response = self.response.ok_or(HandlerError::MissingResponse)?;

        Ok(AsyncResponseHandler {
            stop: self.stop.unwrap_or_else(CancellationToken::new),
            pending: Mutex::new(Some(Pending {
                on_success,
                on_error,
                response,
            })),
        })
    }
}

struct Pending<T> {
    on_success: SuccessFn<T>,
    on_error: ErrorFn,
    response: oneshot::Receiver<T>,
}

pub struct AsyncResponseHandler<T> {
    stop: CancellationToken,
    pending: Mutex<Option<Pending<T>>>,
}

impl<T: Send + 'static> AsyncResponseHandler<T> {
    pub fn builder() -> HandlerBuilder<T> {
        HandlerBuilder::default()
    }

    /// Begin observing the response without blocking. Returns `None` if the
    /// handler was already started.
    pub fn start(&self) -> Option<JoinHandle<()>> {
        let pending = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()?;
        let stop = self.stop.clone();

        Some(tokio::spawn(async move {
            let Pending {
                on_success,
                on_error,
                response,
            } = pending;

            let received = tokio::select! {
                biased;
                _ = stop.cancelled() => {
                    debug!("Response handler stopped before a response arrived");
                    None
                }
                received = response => {
                    if received.is_err() {
                        debug!("Response channel closed without a value");
                    }
                    received.ok()
                }
            };

            match received {
                Some(value) => {
                    if let Err(e) = on_success(value).await {
                        warn!(error = %format!("{e:#}"), "Response handling failed");
                        on_error().await;
                    }
                }
                None => on_error().await,
            }
        }))
    }

    /// Request an early stop. Safe to call any number of times, before or
    /// after the outcome.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }
}

impl<T: Send + 'static> Stoppable for AsyncResponseHandler<T> {
    fn stop(&self) {
        AsyncResponseHandler::stop(self);
    }
}
