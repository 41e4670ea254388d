//! The MR actor registry.
//!
//! One logical actor per MR: events for the same MR are processed strictly
//! sequentially by that actor's task, while distinct MRs proceed in parallel
//! up to the configured bound (a shared semaphore around the cycle, default
//! 2 permits). Actors are spawned on first event, evicted after an idle
//! period, and respawned transparently; their state is reconstructible from
//! forge, tracker, and git, so eviction loses nothing.

mod actor;

#[cfg(test)]
mod scenario_tests;

pub use actor::{combine_triggers, run_cycle, CycleOutcome};

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::checkers::{ComplianceChecker, SubmoduleChecker};
use crate::context::Context;
use crate::forge::ForgeApi;
use crate::ingress::Event;
use crate::tracker::TrackerApi;
use crate::types::MrId;

/// Per-actor mailbox capacity. Senders back-pressure when an actor falls
/// this far behind; coalescing drains the queue quickly.
const ACTOR_MAILBOX: usize = 64;

/// Routes events to per-MR actors.
pub struct ActorRegistry<F, T, C, S> {
    ctx: Arc<Context<F, T, C, S>>,
    semaphore: Arc<Semaphore>,
    actors: Mutex<HashMap<MrId, mpsc::Sender<Event>>>,
    shutdown: CancellationToken,
}

impl<F, T, C, S> ActorRegistry<F, T, C, S>
where
    F: ForgeApi + 'static,
    T: TrackerApi + 'static,
    C: ComplianceChecker + 'static,
    S: SubmoduleChecker + 'static,
{
    pub fn new(ctx: Arc<Context<F, T, C, S>>, shutdown: CancellationToken) -> Arc<Self> {
        let parallelism = ctx.config.engine.parallelism.max(1);
        info!(parallelism, "Actor registry started");
        Arc::new(ActorRegistry {
            semaphore: Arc::new(Semaphore::new(parallelism)),
            ctx,
            actors: Mutex::new(HashMap::new()),
            shutdown,
        })
    }

    /// Hands an event to its MR's actor, spawning or respawning the actor as
    /// needed. Events for one MR are delivered in call order.
    pub async fn dispatch(&self, event: Event) {
        let mr_id = event.mr_id;
        let tx = self.sender_for(mr_id);
        if let Err(send_error) = tx.send(event).await {
            // The actor evicted itself between lookup and send; respawn once
            // and redeliver.
            debug!(mr = %mr_id, "Actor was evicted, respawning");
            let tx = self.respawn(mr_id);
            let _ = tx.send(send_error.0).await;
        }
    }

    /// Number of currently registered actors (dead senders included until
    /// their next dispatch).
    pub fn actor_count(&self) -> usize {
        self.actors.lock().expect("registry lock poisoned").len()
    }

    fn sender_for(&self, mr_id: MrId) -> mpsc::Sender<Event> {
        let mut actors = self.actors.lock().expect("registry lock poisoned");
        actors
            .entry(mr_id)
            .or_insert_with(|| self.spawn_actor(mr_id))
            .clone()
    }

    fn respawn(&self, mr_id: MrId) -> mpsc::Sender<Event> {
        let mut actors = self.actors.lock().expect("registry lock poisoned");
        let tx = self.spawn_actor(mr_id);
        actors.insert(mr_id, tx.clone());
        tx
    }

    fn spawn_actor(&self, mr_id: MrId) -> mpsc::Sender<Event> {
        let (tx, rx) = mpsc::channel(ACTOR_MAILBOX);
        tokio::spawn(actor::actor_loop(
            Arc::clone(&self.ctx),
            mr_id,
            rx,
            tx.clone(),
            Arc::clone(&self.semaphore),
            self.shutdown.clone(),
        ));
        tx
    }
}
