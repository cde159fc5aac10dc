//! Worker: one task driving one exclusive session.
//!
//! Each worker owns its [`SessionBackend`] outright — exclusive access is a
//! property of ownership, not of a lock — and loops: dequeue, render,
//! submit, poll to completion, parse, hand off downstream. Failures are
//! contained per unit; the only ways out of the loop are queue-drained
//! shutdown and session retirement.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use rand::Rng;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use qaforge_session::prompt::PromptTemplate;
use qaforge_session::{PollOutcome, SessionBackend, SessionError, parse_response};
use qaforge_shared::{ContextUnit, ResponseBody};

use crate::queue::ContextQueue;

/// A processed unit on its way to the aggregator.
#[derive(Debug)]
pub struct WorkerOutput {
    /// The unit this output derives from.
    pub unit: ContextUnit,
    /// The rendered prompt that was submitted.
    pub prompt: String,
    /// Normalized parse of the session's reply.
    pub body: ResponseBody,
}

/// Per-worker tuning, distilled from the pipeline config.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub id: usize,
    pub template: PromptTemplate,
    /// Dequeue wait per attempt.
    pub pop_timeout: Duration,
    /// Sleep between idle polls once the queue is monitored and empty.
    pub idle_poll_interval: Duration,
    /// Consecutive idle polls before exiting.
    pub max_idle_polls: u32,
    /// Sleep between response-completion polls.
    pub response_poll_interval: Duration,
    /// Completion polls before the round-trip counts as a transient failure.
    pub max_response_polls: u32,
    /// Proactively reset the session every N successful responses.
    pub refresh_every: u32,
    /// Inter-request pacing bounds.
    pub pacing: (Duration, Duration),
}

/// Counters reported when a worker's loop ends.
#[derive(Debug, Clone, Default)]
pub struct WorkerStats {
    pub id: usize,
    pub processed: u64,
    pub dropped: u64,
    /// True when the worker exited by retiring its session rather than by
    /// queue-drained shutdown.
    pub retired: bool,
}

/// How one unit ended. Retirement ends the worker; a retirement during the
/// post-delivery refresh still counts the unit as processed.
enum UnitOutcome {
    Delivered,
    Dropped,
    Retire { delivered: bool, reason: String },
}

pub struct Worker {
    config: WorkerConfig,
    session: Box<dyn SessionBackend>,
    queue: Arc<ContextQueue<ContextUnit>>,
    output: mpsc::UnboundedSender<WorkerOutput>,
    /// Liveness flag read by the drive loop; cleared on any exit.
    working: Arc<AtomicBool>,
    responses_since_refresh: u32,
}

impl Worker {
    pub fn new(
        config: WorkerConfig,
        session: Box<dyn SessionBackend>,
        queue: Arc<ContextQueue<ContextUnit>>,
        output: mpsc::UnboundedSender<WorkerOutput>,
        working: Arc<AtomicBool>,
    ) -> Self {
        working.store(true, Ordering::SeqCst);
        Self {
            config,
            session,
            queue,
            output,
            working,
            responses_since_refresh: 0,
        }
    }

    /// Run until the queue drains or the session retires.
    pub async fn run(mut self) -> WorkerStats {
        let mut stats = WorkerStats {
            id: self.config.id,
            ..Default::default()
        };
        let mut idle_polls: u32 = 0;

        loop {
            if self.queue.is_monitoring() && self.queue.is_empty().await {
                idle_polls += 1;
                if idle_polls >= self.config.max_idle_polls {
                    info!(worker = self.config.id, "queue drained, worker exiting");
                    break;
                }
                tokio::time::sleep(self.config.idle_poll_interval).await;
                continue;
            }

            let Some(unit) = self.queue.pop_timeout(self.config.pop_timeout).await else {
                continue;
            };
            idle_polls = 0;

            match self.process(unit).await {
                UnitOutcome::Delivered => stats.processed += 1,
                UnitOutcome::Dropped => stats.dropped += 1,
                UnitOutcome::Retire { delivered, reason } => {
                    if delivered {
                        stats.processed += 1;
                    } else {
                        stats.dropped += 1;
                    }
                    stats.retired = true;
                    warn!(worker = self.config.id, %reason, "session retired");
                    break;
                }
            }
        }

        self.working.store(false, Ordering::SeqCst);
        info!(
            worker = self.config.id,
            processed = stats.processed,
            dropped = stats.dropped,
            retired = stats.retired,
            "worker finished"
        );
        stats
    }

    /// One unit, end to end. A rate-limit signal earns a session reset and a
    /// single retry of the same unit; everything else either succeeds or
    /// forfeits the unit.
    async fn process(&mut self, unit: ContextUnit) -> UnitOutcome {
        let envelope = self.config.template.render(&unit);
        let mut rate_limited_once = false;

        loop {
            match self.round_trip(&envelope.text).await {
                Ok(raw) => {
                    let body = parse_response(&raw);
                    if body.pairs().is_empty() {
                        debug!(
                            worker = self.config.id,
                            source = %unit.source_name,
                            "no QA pairs extracted"
                        );
                    }
                    // Empty bodies still flow downstream; the aggregator
                    // logs and skips them so drop accounting is central.
                    let _ = self.output.send(WorkerOutput {
                        unit,
                        prompt: envelope.text,
                        body,
                    });

                    self.pace().await;
                    return match self.maybe_refresh().await {
                        Ok(()) => UnitOutcome::Delivered,
                        Err(reason) => UnitOutcome::Retire {
                            delivered: true,
                            reason,
                        },
                    };
                }
                Err(SessionError::Transient(msg)) => {
                    warn!(
                        worker = self.config.id,
                        source = %unit.source_name,
                        %msg,
                        "transient failure, unit dropped"
                    );
                    return UnitOutcome::Dropped;
                }
                Err(SessionError::RateLimited(msg)) if !rate_limited_once => {
                    warn!(worker = self.config.id, %msg, "rate limited, resetting session");
                    rate_limited_once = true;
                    if let Err(e) = self.session.reset().await {
                        return UnitOutcome::Retire {
                            delivered: false,
                            reason: format!("reset failed: {e}"),
                        };
                    }
                }
                Err(SessionError::RateLimited(msg)) => {
                    return UnitOutcome::Retire {
                        delivered: false,
                        reason: format!("rate limit persisted: {msg}"),
                    };
                }
                Err(SessionError::Fatal(msg)) => {
                    return UnitOutcome::Retire {
                        delivered: false,
                        reason: msg,
                    };
                }
            }
        }
    }

    /// Submit and poll until the reply is complete or the poll budget runs
    /// out. Every wait is bounded.
    async fn round_trip(
        &mut self,
        prompt: &str,
    ) -> Result<qaforge_shared::RawResponse, SessionError> {
        self.session.submit(prompt).await?;

        for _ in 0..self.config.max_response_polls {
            match self.session.poll().await? {
                PollOutcome::Complete(raw) => return Ok(raw),
                PollOutcome::Pending => {
                    tokio::time::sleep(self.config.response_poll_interval).await;
                }
            }
        }

        Err(SessionError::Transient(format!(
            "no response after {} polls",
            self.config.max_response_polls
        )))
    }

    /// Random delay between completed units to avoid a detectable cadence.
    async fn pace(&mut self) {
        let (min, max) = self.config.pacing;
        if max.is_zero() {
            return;
        }
        let millis = rand::thread_rng().gen_range(min.as_millis()..=max.as_millis()) as u64;
        debug!(worker = self.config.id, millis, "pacing");
        tokio::time::sleep(Duration::from_millis(millis)).await;
    }

    /// Counter UI drift with a periodic proactive reset.
    async fn maybe_refresh(&mut self) -> Result<(), String> {
        self.responses_since_refresh += 1;
        if self.responses_since_refresh < self.config.refresh_every {
            return Ok(());
        }

        debug!(worker = self.config.id, "periodic session refresh");
        self.responses_since_refresh = 0;
        match self.session.reset().await {
            Ok(()) => Ok(()),
            // A failed routine refresh is not worth the session; only a
            // fatal signal retires it.
            Err(SessionError::Fatal(msg)) => Err(msg),
            Err(e) => {
                warn!(worker = self.config.id, error = %e, "session refresh failed");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScriptStep, ScriptedSession};
    use qaforge_shared::Payload;

    fn unit(index: u64) -> ContextUnit {
        ContextUnit {
            index,
            source_name: format!("doc_{index}.txt"),
            payload: Payload::Document {
                text: "a pesca na costa".into(),
            },
        }
    }

    fn config() -> WorkerConfig {
        WorkerConfig {
            id: 0,
            template: PromptTemplate::Generation,
            pop_timeout: Duration::from_millis(5),
            idle_poll_interval: Duration::from_millis(1),
            max_idle_polls: 3,
            response_poll_interval: Duration::from_millis(1),
            max_response_polls: 3,
            refresh_every: 100,
            pacing: (Duration::ZERO, Duration::ZERO),
        }
    }

    async fn run_worker(
        steps: Vec<ScriptStep>,
        units: Vec<ContextUnit>,
        config: WorkerConfig,
    ) -> (WorkerStats, Vec<WorkerOutput>, ScriptedSession) {
        let queue = Arc::new(ContextQueue::unbounded());
        for unit in units {
            queue.push(unit).await;
        }
        queue.enable_monitoring();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let session = ScriptedSession::new(steps);
        let probe = session.clone();
        let worker = Worker::new(
            config,
            Box::new(session),
            Arc::clone(&queue),
            tx,
            Arc::new(AtomicBool::new(false)),
        );

        let stats = worker.run().await;
        let mut outputs = Vec::new();
        while let Ok(output) = rx.try_recv() {
            outputs.push(output);
        }
        (stats, outputs, probe)
    }

    #[tokio::test]
    async fn successful_unit_flows_downstream() {
        let reply = r#"[{"pergunta":"Q1","resposta":"A1"}]"#;
        let (stats, outputs, _) = run_worker(
            vec![ScriptStep::reply(reply)],
            vec![unit(0)],
            config(),
        )
        .await;

        assert_eq!(stats.processed, 1);
        assert_eq!(stats.dropped, 0);
        assert!(!stats.retired);
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].body.pairs().len(), 1);
        assert!(outputs[0].prompt.contains("CONTEXTO"));
    }

    #[tokio::test]
    async fn transient_failure_drops_the_unit() {
        let (stats, outputs, _) = run_worker(
            vec![ScriptStep::Transient],
            vec![unit(0)],
            config(),
        )
        .await;

        assert_eq!(stats.processed, 0);
        assert_eq!(stats.dropped, 1);
        assert!(!stats.retired);
        assert!(outputs.is_empty());
    }

    #[tokio::test]
    async fn delayed_reply_within_budget_succeeds() {
        let (stats, outputs, _) = run_worker(
            vec![ScriptStep::DelayedReply {
                polls: 2,
                text: r#"[{"pergunta":"Q","resposta":"A"}]"#.into(),
            }],
            vec![unit(0)],
            config(),
        )
        .await;

        assert_eq!(stats.processed, 1);
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].body.pairs().len(), 1);
    }

    #[tokio::test]
    async fn poll_budget_exhaustion_is_transient() {
        // The scripted session stays Pending forever for this submission.
        let (stats, outputs, _) = run_worker(
            vec![ScriptStep::NeverCompletes],
            vec![unit(0)],
            config(),
        )
        .await;

        assert_eq!(stats.dropped, 1);
        assert!(outputs.is_empty());
        assert!(!stats.retired);
    }

    #[tokio::test]
    async fn rate_limit_resets_and_retries_same_unit() {
        let reply = r#"[{"pergunta":"Q","resposta":"A"}]"#;
        let (stats, outputs, session) = run_worker(
            vec![ScriptStep::RateLimited, ScriptStep::reply(reply)],
            vec![unit(0)],
            config(),
        )
        .await;

        assert_eq!(stats.processed, 1);
        assert_eq!(session.reset_count(), 1);
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].unit.index, 0);
    }

    #[tokio::test]
    async fn persistent_rate_limit_retires_the_session() {
        let (stats, _, session) = run_worker(
            vec![ScriptStep::RateLimited, ScriptStep::RateLimited],
            vec![unit(0), unit(1)],
            config(),
        )
        .await;

        assert!(stats.retired);
        assert_eq!(session.reset_count(), 1);
    }

    #[tokio::test]
    async fn fatal_error_retires_the_session() {
        let (stats, _, _) = run_worker(
            vec![ScriptStep::Fatal],
            vec![unit(0), unit(1)],
            config(),
        )
        .await;

        assert!(stats.retired);
        assert_eq!(stats.dropped, 1);
    }

    #[tokio::test]
    async fn idle_shutdown_after_exact_poll_count() {
        // Empty, monitored queue: the worker must exit after exactly
        // max_idle_polls cycles, not before and not much after.
        let mut cfg = config();
        cfg.max_idle_polls = 10;
        cfg.idle_poll_interval = Duration::from_millis(10);

        let started = std::time::Instant::now();
        let (stats, outputs, _) = run_worker(vec![], vec![], cfg).await;
        let elapsed = started.elapsed();

        assert_eq!(stats.processed, 0);
        assert!(outputs.is_empty());
        assert!(!stats.retired);
        // Nine sleeps between ten idle observations.
        assert!(elapsed >= Duration::from_millis(90), "exited early: {elapsed:?}");
        assert!(elapsed < Duration::from_millis(500), "exited late: {elapsed:?}");
    }

    #[tokio::test]
    async fn periodic_refresh_after_k_responses() {
        let reply = r#"[{"pergunta":"Q","resposta":"A"}]"#;
        let mut cfg = config();
        cfg.refresh_every = 2;

        let (stats, _, session) = run_worker(
            vec![
                ScriptStep::reply(reply),
                ScriptStep::reply(reply),
                ScriptStep::reply(reply),
                ScriptStep::reply(reply),
            ],
            (0..4).map(unit).collect(),
            cfg,
        )
        .await;

        assert_eq!(stats.processed, 4);
        assert_eq!(session.reset_count(), 2);
    }

    #[tokio::test]
    async fn empty_reply_still_reaches_aggregator() {
        let (stats, outputs, _) = run_worker(
            vec![ScriptStep::reply("não posso ajudar com isso")],
            vec![unit(0)],
            config(),
        )
        .await;

        assert_eq!(stats.processed, 1);
        assert_eq!(outputs.len(), 1);
        assert!(outputs[0].body.pairs().is_empty());
    }
}
