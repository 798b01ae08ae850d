use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use super::client::{LlmRequest, LlmResponse, RawLlmClient};

type Job = (LlmRequest, oneshot::Sender<LlmResponse>);

/// Serializes every call to the backend through a single worker task, so
/// the pre-filter call for one event always completes before its generator
/// call is dispatched, and concurrent callers never exceed the one-
/// request-at-a-time rate the upstream API expects. Cloning an `LlmQueue`
/// shares the same worker. `submit` never returns an `Err` — a transport or
/// parse failure resolves with `LlmResponse::response_ok() == false`
/// instead, per `spec.md` §4.6's "the future is always resolved exactly
/// once" contract.
#[derive(Clone)]
pub struct LlmQueue {
    sender: mpsc::Sender<Job>,
    shutdown: Arc<AtomicBool>,
}

impl LlmQueue {
    /// Spawns the worker task. The queue is unbounded in depth but strictly
    /// one-in-flight: the worker awaits each `complete` call before pulling
    /// the next job.
    pub fn spawn(client: Arc<dyn RawLlmClient>) -> Self {
        let (sender, mut receiver) = mpsc::channel::<Job>(256);
        let shutdown = Arc::new(AtomicBool::new(false));
        let worker_shutdown = shutdown.clone();

        tokio::spawn(async move {
            while let Some((request, reply)) = receiver.recv().await {
                let response = if worker_shutdown.load(Ordering::SeqCst) {
                    LlmResponse::transport_failure(None, "llm queue is shutting down")
                } else {
                    match client.complete(request).await {
                        Ok(response) => response,
                        Err(err) => LlmResponse::transport_failure(None, err.to_string()),
                    }
                };
                // the caller may have dropped its receiver (e.g. on
                // shutdown); nothing to do if the reply can't be delivered.
                let _ = reply.send(response);
            }
        });

        Self { sender, shutdown }
    }

    /// Submits a request and awaits its response in turn behind every job
    /// already queued ahead of it. Always resolves — never propagates an
    /// error — so callers never need to distinguish "the call failed" from
    /// "the queue is gone"; both show up as `response_ok() == false`.
    pub async fn submit(&self, request: LlmRequest) -> LlmResponse {
        if self.shutdown.load(Ordering::SeqCst) {
            return LlmResponse::transport_failure(None, "llm queue is shutting down");
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        if self.sender.send((request, reply_tx)).await.is_err() {
            return LlmResponse::transport_failure(None, "worker task is no longer running");
        }

        reply_rx.await.unwrap_or_else(|_| {
            LlmResponse::transport_failure(None, "worker task dropped the reply channel")
        })
    }

    /// Marks the queue as shutting down: every request already enqueued (and
    /// any submitted after this call returns) resolves immediately with a
    /// transport-error response instead of reaching the backend. Matches
    /// `spec.md` §4.6's "drain the queue, resolving every pending future
    /// with a transport-error result" shutdown behaviour.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }
}
