//! FIFO token-bucket rate limiter for outbound fetches.
//!
//! Callers hold a cheap, cloneable [`RateLimiter`] handle. Each
//! [`RateLimiter::acquire`] enqueues a reply slot on an mpsc channel; a
//! single supervised [`RateLimiterWorker`] drains the queue in arrival order
//! and answers each slot once the `governor` bucket has a token. Acquisition
//! may wait indefinitely; there is no timeout.

use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota};
use std::num::NonZeroU32;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tracing::debug;

use crate::error::{DocsError, Result};
use crate::supervisor::Worker;

const QUEUE_CAPACITY: usize = 1024;

type Ticket = oneshot::Sender<()>;

#[derive(Clone)]
pub struct RateLimiter {
    tx: mpsc::Sender<Ticket>,
}

pub struct RateLimiterWorker {
    // Survives worker restarts so queued tickets are not lost.
    rx: Mutex<mpsc::Receiver<Ticket>>,
    bucket: DefaultDirectRateLimiter,
}

impl RateLimiter {
    /// Build a handle and the worker that must be supervised for it to serve.
    pub fn new(requests_per_second: u32, burst: u32) -> (Self, Arc<RateLimiterWorker>) {
        let rps = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(burst).unwrap_or(NonZeroU32::MIN);
        let quota = Quota::per_second(rps).allow_burst(burst);

        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let worker = RateLimiterWorker {
            rx: Mutex::new(rx),
            bucket: governor::RateLimiter::direct(quota),
        };
        (Self { tx }, Arc::new(worker))
    }

    /// Wait for a token. Tokens are issued in request order.
    pub async fn acquire(&self) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(reply_tx)
            .await
            .map_err(|_| DocsError::Internal("rate limiter is not running".into()))?;
        reply_rx
            .await
            .map_err(|_| DocsError::Internal("rate limiter dropped the request".into()))
    }
}

#[async_trait]
impl Worker for RateLimiterWorker {
    fn name(&self) -> &str {
        "rate_limiter"
    }

    async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut rx = self.rx.lock().await;
        loop {
            let ticket = tokio::select! {
                _ = shutdown.changed() => return Ok(()),
                ticket = rx.recv() => ticket,
            };
            let Some(ticket) = ticket else {
                debug!("all rate limiter handles dropped");
                return Ok(());
            };
            if ticket.is_closed() {
                continue;
            }
            tokio::select! {
                _ = shutdown.changed() => return Ok(()),
                _ = self.bucket.until_ready() => {}
            }
            let _ = ticket.send(());
        }
    }
}
