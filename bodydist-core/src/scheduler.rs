//! Immediate and deferred morph application.
//!
//! Deferred requests go to a single worker thread that keeps them in a
//! due-time heap. There is no cancellation: two requests for the same actor
//! both run, and the later one wins.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::host::{ActorHandle, ActorPresence, MorphBackend};
use crate::{GUARD_MORPH, PRESET_KEY};

/// Owned snapshot of everything one apply needs.
#[derive(Debug, Clone, PartialEq)]
pub struct ApplyRequest {
    pub actor: ActorHandle,
    /// Display name, for diagnostics only.
    pub name: String,
    /// Morph name of the processed marker.
    pub distribution_key: String,
    /// Set the processed marker before applying.
    pub mark_processed: bool,
}

struct Due {
    at: Instant,
    seq: u64,
    request: ApplyRequest,
}

impl PartialEq for Due {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.seq == other.seq
    }
}

impl Eq for Due {}

impl PartialOrd for Due {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Due {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.at, self.seq).cmp(&(other.at, other.seq))
    }
}

enum Message {
    Apply(Due),
    Shutdown,
}

#[derive(Clone)]
struct Host {
    backend: Arc<dyn MorphBackend>,
    presence: Arc<dyn ActorPresence>,
}

impl Host {
    fn mark(&self, request: &ApplyRequest) {
        if request.mark_processed {
            self.backend
                .set_morph(request.actor, &request.distribution_key, PRESET_KEY, 1.0);
        }
    }

    fn apply_now(&self, request: &ApplyRequest) -> bool {
        if !self.presence.is_live(request.actor) {
            return false;
        }
        self.mark(request);
        if !self.presence.is_loaded(request.actor) {
            return false;
        }
        self.backend.apply_morphs(request.actor);
        self.backend.update_model_weight(request.actor);
        true
    }

    fn apply_deferred(&self, request: &ApplyRequest) -> bool {
        if !self.presence.is_live(request.actor) {
            log::info!("Actor {} is no longer valid, skipping deferred apply", request.name);
            return false;
        }
        self.mark(request);
        let guarded = self.backend.has_morph(request.actor, GUARD_MORPH, PRESET_KEY);
        if self.presence.is_loaded(request.actor) && !guarded {
            self.backend.apply_morphs(request.actor);
            self.backend.update_model_weight(request.actor);
            true
        } else {
            log::info!("Actor {} is not loaded, morphs will apply on next load", request.name);
            false
        }
    }
}

pub struct ApplyScheduler {
    host: Host,
    sender: Sender<Message>,
    worker: Option<JoinHandle<()>>,
    next_seq: u64,
}

impl ApplyScheduler {
    pub fn new(backend: Arc<dyn MorphBackend>, presence: Arc<dyn ActorPresence>) -> Self {
        let host = Host { backend, presence };
        let (sender, receiver) = mpsc::channel();
        let worker_host = host.clone();
        let worker = thread::Builder::new()
            .name("bodydist-apply".to_string())
            .spawn(move || run_worker(worker_host, receiver));

        let worker = match worker {
            Ok(handle) => Some(handle),
            Err(err) => {
                log::warn!("could not start apply worker, deferred applies run inline: {}", err);
                None
            }
        };

        Self {
            host,
            sender,
            worker,
            next_seq: 0,
        }
    }

    /// Apply on the caller's thread. Returns whether the backend applied.
    pub fn apply_now(&self, request: &ApplyRequest) -> bool {
        self.host.apply_now(request)
    }

    /// Queue `request` to run after `delay` on the worker thread.
    pub fn apply_after(&mut self, request: ApplyRequest, delay: Duration) {
        if self.worker.is_none() {
            self.host.apply_deferred(&request);
            return;
        }
        let due = Due {
            at: Instant::now() + delay,
            seq: self.next_seq,
            request,
        };
        self.next_seq += 1;
        if let Err(mpsc::SendError(Message::Apply(due))) = self.sender.send(Message::Apply(due)) {
            self.host.apply_deferred(&due.request);
        }
    }

    /// Run every pending request now and stop the worker.
    pub fn shutdown(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        let _ = self.sender.send(Message::Shutdown);
        if worker.join().is_err() {
            log::warn!("apply worker panicked");
        }
    }
}

impl Drop for ApplyScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker(host: Host, receiver: Receiver<Message>) {
    let mut pending: BinaryHeap<Reverse<Due>> = BinaryHeap::new();

    loop {
        let message = match pending.peek() {
            Some(Reverse(next)) => {
                let wait = next.at.saturating_duration_since(Instant::now());
                match receiver.recv_timeout(wait) {
                    Ok(message) => Some(message),
                    Err(RecvTimeoutError::Timeout) => None,
                    Err(RecvTimeoutError::Disconnected) => Some(Message::Shutdown),
                }
            }
            None => Some(receiver.recv().unwrap_or(Message::Shutdown)),
        };

        match message {
            Some(Message::Apply(due)) => pending.push(Reverse(due)),
            Some(Message::Shutdown) => {
                while let Some(Reverse(due)) = pending.pop() {
                    host.apply_deferred(&due.request);
                }
                return;
            }
            None => {}
        }

        let now = Instant::now();
        while pending.peek().map_or(false, |Reverse(next)| next.at <= now) {
            if let Some(Reverse(due)) = pending.pop() {
                host.apply_deferred(&due.request);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryMorphs, MemoryPresence};

    fn request(actor: u32) -> ApplyRequest {
        ApplyRequest {
            actor: ActorHandle(actor),
            name: format!("actor {actor}"),
            distribution_key: "obody_processed".to_string(),
            mark_processed: true,
        }
    }

    fn setup() -> (Arc<MemoryMorphs>, Arc<MemoryPresence>, ApplyScheduler) {
        let morphs = Arc::new(MemoryMorphs::new());
        let presence = Arc::new(MemoryPresence::new());
        let scheduler = ApplyScheduler::new(morphs.clone(), presence.clone());
        (morphs, presence, scheduler)
    }

    #[test]
    fn immediate_apply_needs_a_loaded_model() {
        let (morphs, presence, scheduler) = setup();
        presence.set(ActorHandle(1), true, false);
        assert!(!scheduler.apply_now(&request(1)));
        assert!(morphs.has_morph(ActorHandle(1), "obody_processed", PRESET_KEY));
        assert_eq!(morphs.apply_count(ActorHandle(1)), 0);

        presence.set(ActorHandle(1), true, true);
        assert!(scheduler.apply_now(&request(1)));
        assert_eq!(morphs.apply_count(ActorHandle(1)), 1);
        assert_eq!(morphs.weight_update_count(ActorHandle(1)), 1);
    }

    #[test]
    fn deferred_applies_run_in_due_order_and_drain_on_shutdown() {
        let (morphs, presence, mut scheduler) = setup();
        presence.set(ActorHandle(1), true, true);
        presence.set(ActorHandle(2), true, true);

        scheduler.apply_after(request(1), Duration::from_millis(10));
        scheduler.apply_after(request(1), Duration::from_millis(20));
        scheduler.apply_after(request(2), Duration::from_secs(60));
        scheduler.shutdown();

        assert_eq!(morphs.apply_count(ActorHandle(1)), 2);
        assert_eq!(morphs.apply_count(ActorHandle(2)), 1);
    }

    #[test]
    fn deferred_apply_rechecks_liveness_and_guard() {
        let (morphs, presence, mut scheduler) = setup();
        presence.set(ActorHandle(3), false, false);
        presence.set(ActorHandle(4), true, true);
        morphs.set_morph(ActorHandle(4), GUARD_MORPH, PRESET_KEY, 1.0);

        scheduler.apply_after(request(3), Duration::ZERO);
        scheduler.apply_after(request(4), Duration::ZERO);
        scheduler.shutdown();

        assert_eq!(morphs.morph_count(ActorHandle(3)), 0);
        assert_eq!(morphs.apply_count(ActorHandle(4)), 0);
        assert!(morphs.has_morph(ActorHandle(4), "obody_processed", PRESET_KEY));
    }
}
