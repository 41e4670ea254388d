//! The per-MR actor: one evaluation cycle at a time, events coalesced.
//!
//! An actor processes one event by rebuilding the snapshot, running the rule
//! battery, planning, and executing. Events arriving mid-cycle queue up and
//! are coalesced into a single re-evaluate pass afterwards, since the fresh
//! snapshot subsumes all their payloads. Cycle failures release the actor;
//! nothing is marked bad, the next event or timer tick re-attempts.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::checkers::{ComplianceChecker, SubmoduleChecker};
use crate::commands::Command;
use crate::context::Context;
use crate::executor::{self, ExecOutcome};
use crate::forge::ForgeApi;
use crate::ingress::{Event, EventPayload};
use crate::ledger::{format_discussion_body, DiscussionLedger};
use crate::planner::{self, PlanTrigger};
use crate::projector::{self, ProjectError};
use crate::rules::evaluate_rules;
use crate::tracker::TrackerApi;
use crate::types::{Finding, MrId};

/// Delay before a deferred cycle is retried via a timer tick.
const DEFER_RETRY_DELAY: Duration = Duration::from_secs(60);

/// How one evaluation cycle ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Completed,
    /// A transient failure; a timer tick will re-attempt.
    Deferred { reason: String },
    /// An internal error; logged with context, the actor stays available.
    Failed { error: String },
}

/// Folds a coalesced event batch into the planner's trigger overrides.
pub fn combine_triggers(events: &[Event]) -> PlanTrigger {
    let mut trigger = PlanTrigger::default();
    for event in events {
        if let EventPayload::CommandInvoked { command } = &event.payload {
            match command {
                Command::RunPipeline => trigger.forced_pipeline = true,
                Command::FollowUp => trigger.forced_follow_up = Some(false),
                Command::DraftFollowUp => trigger.forced_follow_up = Some(true),
                Command::Process => {}
            }
        }
    }
    trigger
}

/// Runs one full evaluation cycle for an MR.
#[instrument(skip(ctx), fields(mr = %mr_id))]
pub async fn run_cycle<F, T, C, S>(
    ctx: &Context<F, T, C, S>,
    mr_id: MrId,
    trigger: PlanTrigger,
) -> CycleOutcome
where
    F: ForgeApi,
    T: TrackerApi,
    C: ComplianceChecker,
    S: SubmoduleChecker,
{
    let cycle = match projector::project(ctx, mr_id).await {
        Ok(cycle) => cycle,
        Err(ProjectError::Gone) => {
            debug!("MR vanished, nothing to do");
            return CycleOutcome::Completed;
        }
        Err(e @ ProjectError::Deferred { .. }) => {
            let reason = e.to_string();
            report_deferral(ctx, mr_id, &reason).await;
            return CycleOutcome::Deferred { reason };
        }
        Err(e @ ProjectError::Escalate(_)) => {
            let finding = e
                .into_finding(ctx.config.bot.escalation_mention.as_deref())
                .expect("escalate errors always produce a finding");
            ensure_discussion(ctx, mr_id, None, &finding).await;
            return CycleOutcome::Completed;
        }
    };

    let findings = evaluate_rules(&ctx.rules, &cycle);
    let plan = planner::plan(&cycle, &findings, trigger);
    if plan.is_empty() {
        debug!("Nothing to do, cycle converged");
        return CycleOutcome::Completed;
    }

    let report = executor::execute(ctx, &cycle, plan).await;

    // Permanent failures become findings the user can see; the ledger keeps
    // them single-shot.
    for failure in report.failures {
        let finding = failure.into_finding();
        ensure_discussion(ctx, mr_id, Some(&cycle.ledger), &finding).await;
    }

    match report.outcome {
        ExecOutcome::Completed => CycleOutcome::Completed,
        ExecOutcome::AbortedNotMergeable => {
            info!("Merge refused as not mergeable, plan abandoned");
            CycleOutcome::Completed
        }
        ExecOutcome::Deferred { reason } => {
            report_deferral(ctx, mr_id, &reason).await;
            CycleOutcome::Deferred { reason }
        }
    }
}

/// Best-effort warn discussion for a deferred cycle.
///
/// The category is self-healing so the thread resolves itself once the
/// service recovers. Failures are swallowed: if the forge is the thing that
/// is down, there is nobody to tell.
async fn report_deferral<F, T, C, S>(ctx: &Context<F, T, C, S>, mr_id: MrId, reason: &str)
where
    F: ForgeApi,
    T: TrackerApi,
    C: ComplianceChecker,
    S: SubmoduleChecker,
{
    use crate::types::{Category, Severity};
    let finding = Finding::new(
        Severity::Warn,
        Category::Pipeline,
        "temporary-failure",
        format!("{reason}; the bot will retry shortly."),
    );
    ensure_discussion(ctx, mr_id, None, &finding).await;
}

/// Creates the finding's discussion unless an open one already carries its
/// fingerprint. When no ledger is at hand, one is derived on the spot.
async fn ensure_discussion<F, T, C, S>(
    ctx: &Context<F, T, C, S>,
    mr_id: MrId,
    ledger: Option<&DiscussionLedger>,
    finding: &Finding,
) where
    F: ForgeApi,
    T: TrackerApi,
    C: ComplianceChecker,
    S: SubmoduleChecker,
{
    let derived;
    let ledger = match ledger {
        Some(l) => l,
        None => match ctx.forge.list_discussions(mr_id).await {
            Ok(discussions) => {
                derived = DiscussionLedger::from_discussions(ctx.bot_handle(), &discussions);
                &derived
            }
            Err(e) => {
                warn!(error = %e, "Cannot list discussions to report a finding");
                return;
            }
        },
    };
    if ledger.has_open(&finding.fingerprint) {
        return;
    }
    let body = format_discussion_body(finding);
    if let Err(e) = ctx.forge.create_discussion(mr_id, &body).await {
        warn!(error = %e, "Cannot create finding discussion");
    }
}

/// The actor's event loop. Exits on shutdown, channel closure, or after the
/// idle eviction period with no events; state loss is fine because every
/// cycle rebuilds from forge, tracker, and git.
pub async fn actor_loop<F, T, C, S>(
    ctx: Arc<Context<F, T, C, S>>,
    mr_id: MrId,
    mut rx: mpsc::Receiver<Event>,
    self_tx: mpsc::Sender<Event>,
    semaphore: Arc<Semaphore>,
    shutdown: CancellationToken,
) where
    F: ForgeApi + 'static,
    T: TrackerApi + 'static,
    C: ComplianceChecker + 'static,
    S: SubmoduleChecker + 'static,
{
    let idle = Duration::from_secs(ctx.config.engine.actor_idle_eviction);
    info!(mr = %mr_id, "Actor started");

    loop {
        let event = tokio::select! {
            _ = shutdown.cancelled() => break,
            received = tokio::time::timeout(idle, rx.recv()) => match received {
                Ok(Some(event)) => event,
                Ok(None) => break,
                Err(_) => {
                    debug!(mr = %mr_id, "Actor idle, evicting");
                    break;
                }
            },
        };

        // Coalesce everything that queued up while we were waiting: the
        // fresh snapshot subsumes all the payloads, only the command
        // overrides need folding.
        let mut batch = vec![event];
        while let Ok(more) = rx.try_recv() {
            batch.push(more);
        }
        let trigger = combine_triggers(&batch);
        debug!(mr = %mr_id, coalesced = batch.len(), "Starting cycle");

        let permit = match semaphore.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => break,
        };
        let outcome = run_cycle(ctx.as_ref(), mr_id, trigger).await;
        drop(permit);

        match outcome {
            CycleOutcome::Completed => {}
            CycleOutcome::Deferred { reason } => {
                warn!(mr = %mr_id, reason = %reason, "Cycle deferred, scheduling retry");
                schedule_retry_tick(mr_id, self_tx.clone(), shutdown.clone());
            }
            CycleOutcome::Failed { error } => {
                error!(mr = %mr_id, error = %error, "Cycle failed; actor stays available");
            }
        }
    }

    info!(mr = %mr_id, "Actor stopped");
}

/// Re-enqueues a timer tick for this MR after the defer delay.
fn schedule_retry_tick(mr_id: MrId, tx: mpsc::Sender<Event>, shutdown: CancellationToken) {
    tokio::spawn(async move {
        tokio::select! {
            _ = shutdown.cancelled() => {}
            _ = tokio::time::sleep(DEFER_RETRY_DELAY) => {
                // Internal ticks do not participate in receipt ordering.
                let tick = Event {
                    mr_id,
                    payload: EventPayload::TimerTick,
                    received_at: chrono::Utc::now(),
                    seq: u64::MAX,
                };
                let _ = tx.send(tick).await;
            }
        }
    });
}
