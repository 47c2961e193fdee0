use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, Semaphore};
use tracing::debug;

use crate::observability;

/// Human sign-off for a soft conflict.
#[async_trait]
pub trait Confirmer: Send + Sync {
    /// Suspend until a decision is made. `true` proceeds with the override.
    async fn request(&self, message: &str) -> bool;
}

/// One outstanding question for the decision-maker.
/// Dropping it unanswered counts as a rejection.
#[derive(Debug)]
pub struct Prompt {
    pub id: u64,
    pub message: String,
    reply: oneshot::Sender<bool>,
}

impl Prompt {
    pub fn answer(self, accept: bool) {
        let _ = self.reply.send(accept);
    }

    pub fn accept(self) {
        self.answer(true);
    }

    pub fn reject(self) {
        self.answer(false);
    }
}

/// FIFO confirmation queue.
///
/// Exactly one prompt is outstanding at a time. A request arriving while
/// another is pending waits for its turn instead of replacing it, so no
/// decision is ever silently dropped. If the receiving side goes away,
/// pending and future requests resolve to `false`.
pub struct ConfirmationQueue {
    turn: Semaphore,
    prompts: mpsc::Sender<Prompt>,
    next_id: AtomicU64,
}

impl ConfirmationQueue {
    /// The queue plus the receiver the decision-maker reads prompts from.
    pub fn new() -> (Self, mpsc::Receiver<Prompt>) {
        let (tx, rx) = mpsc::channel(1);
        let queue = Self {
            turn: Semaphore::new(1),
            prompts: tx,
            next_id: AtomicU64::new(1),
        };
        (queue, rx)
    }
}

#[async_trait]
impl Confirmer for ConfirmationQueue {
    async fn request(&self, message: &str) -> bool {
        let Ok(_turn) = self.turn.acquire().await else {
            return false;
        };
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (reply, answer) = oneshot::channel();
        let prompt = Prompt {
            id,
            message: message.to_string(),
            reply,
        };
        debug!(prompt = id, "awaiting override decision");
        if self.prompts.send(prompt).await.is_err() {
            return false;
        }
        let accepted = answer.await.unwrap_or(false);
        metrics::counter!(
            observability::CONFIRMATIONS_TOTAL,
            "answer" => if accepted { "accepted" } else { "rejected" }
        )
        .increment(1);
        debug!(prompt = id, accepted, "override decided");
        accepted
    }
}
