//! Quality escalation scheduler
//!
//! Walks each requested page up the tier ladder one rasterizer call at a
//! time. Every tier is written into the cache as soon as it arrives, the
//! next tier is only requested after a settle delay, and failed attempts
//! are retried with a fixed backoff before the run gives up.
//!
//! The scheduler never waits itself. It returns [`Effect`]s (rasterize
//! this, wake me up later) and is fed the outcomes back through
//! [`EscalationScheduler::on_response`] and [`EscalationScheduler::on_timer`].
//! Each of those is a checkpoint: the run id and cancel token are checked
//! before anything touches the cache.

use std::collections::HashMap;
use std::time::Duration;

use log::{debug, error, info, warn};

use super::cache::TieredPageCache;
use super::ledger::FailureLedger;
use super::request::{RasterFault, RasterJob, RasterResponse};
use super::state::{Effect, ViewerUpdate};
use super::tier::Tier;
use super::timer::Timer;
use super::token::{CancelToken, JobId, RunId};
use super::types::ImagePayload;

/// Timing and retry policy for escalation runs
#[derive(Clone, Debug, PartialEq)]
pub struct EscalationPolicy {
    /// Highest tier a run escalates to
    pub top_tier: Tier,
    /// A page whose best cached tier is at least this needs no new run
    pub satisfied_tier: Tier,
    /// Retries after the first failed attempt at a tier
    pub max_retries: u32,
    pub retry_backoff: Duration,
    /// Pause after a tier lands before the next one is requested,
    /// indexed by the tier that just landed
    pub settle_after: [Duration; Tier::COUNT],
    /// Delay before lower tiers are dropped once the top tier is shown
    pub crossfade: Duration,
    /// Per-attempt deadline; `None` waits for the rasterizer indefinitely
    pub attempt_timeout: Option<Duration>,
}

impl Default for EscalationPolicy {
    fn default() -> Self {
        Self {
            top_tier: Tier::Final,
            satisfied_tier: Tier::Final,
            max_retries: 2,
            retry_backoff: Duration::from_millis(1200),
            settle_after: [
                Duration::from_millis(500),
                Duration::from_millis(2000),
                Duration::from_millis(2000),
                Duration::from_millis(2000),
            ],
            crossfade: Duration::from_millis(600),
            attempt_timeout: Some(Duration::from_secs(30)),
        }
    }
}

impl EscalationPolicy {
    #[must_use]
    pub fn settle_delay(&self, landed: Tier) -> Duration {
        self.settle_after[landed.index()]
    }

    /// Tier at which a revisited page is left alone
    #[must_use]
    pub fn satisfied(&self) -> Tier {
        self.satisfied_tier.min(self.top_tier)
    }
}

/// What a run is trying to achieve
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunMode {
    /// Walk the whole ladder up to the top tier
    Escalate,
    /// Produce the lowest tier only, one attempt, failures are silent
    PreviewOnly,
}

/// Transient per-page state of an escalation run
#[derive(Debug)]
pub struct PageLoadState {
    pub run: RunId,
    pub mode: RunMode,
    pub cancel: CancelToken,
    pub attempts_by_tier: [u32; Tier::COUNT],
    /// Tier of the attempt on a worker right now, `None` between attempts
    pub highest_tier_in_flight: Option<Tier>,
    in_flight: Option<JobId>,
}

impl PageLoadState {
    #[must_use]
    pub fn cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    #[must_use]
    pub fn attempts(&self, tier: Tier) -> u32 {
        self.attempts_by_tier[tier.index()]
    }
}

#[derive(Debug)]
struct JobTicket {
    page: u32,
    run: RunId,
    tier: Tier,
    cancel: CancelToken,
}

pub struct EscalationScheduler {
    policy: EscalationPolicy,
    runs: HashMap<u32, PageLoadState>,
    jobs: HashMap<JobId, JobTicket>,
    next_run: u64,
    next_job: u64,
}

impl EscalationScheduler {
    #[must_use]
    pub fn new(policy: EscalationPolicy) -> Self {
        Self {
            policy,
            runs: HashMap::new(),
            jobs: HashMap::new(),
            next_run: 1,
            next_job: 1,
        }
    }

    #[must_use]
    pub fn policy(&self) -> &EscalationPolicy {
        &self.policy
    }

    #[must_use]
    pub fn run_state(&self, page: u32) -> Option<&PageLoadState> {
        self.runs.get(&page)
    }

    #[must_use]
    pub fn is_running(&self, page: u32) -> bool {
        self.runs.contains_key(&page)
    }

    #[must_use]
    pub fn has_attempt_in_flight(&self, page: u32) -> bool {
        self.runs
            .get(&page)
            .is_some_and(|state| state.in_flight.is_some())
    }

    /// Pages with a live run
    #[must_use]
    pub fn running_pages(&self) -> Vec<u32> {
        let mut pages: Vec<u32> = self.runs.keys().copied().collect();
        pages.sort_unstable();
        pages
    }

    /// Start a run for `page`, or attach to the one already running.
    ///
    /// Attaching with [`RunMode::Escalate`] upgrades a preview-only run
    /// in place. Nothing starts for failed pages or pages already cached
    /// at the satisfied tier; a new run only escalates past what is cached.
    pub fn begin(
        &mut self,
        page: u32,
        mode: RunMode,
        cache: &TieredPageCache,
        ledger: &FailureLedger,
    ) -> Vec<Effect> {
        if ledger.is_failed(page) {
            debug!("Page {page} is marked failed, not starting a run");
            return Vec::new();
        }

        if let Some(state) = self.runs.get_mut(&page) {
            if mode == RunMode::Escalate && state.mode == RunMode::PreviewOnly {
                debug!("Upgrading preview run {:?} for page {page} to full escalation", state.run);
                state.mode = RunMode::Escalate;
            }
            return Vec::new();
        }

        let best = cache.best_tier(page);
        let Some(tier) = self.first_tier(best, mode) else {
            // Nothing to fetch; a page left mid-escalation may still hold
            // the tiers below its best one
            return match (mode, best) {
                (RunMode::Escalate, Some(best)) => {
                    self.reclaim_below(page, best, cache).into_iter().collect()
                }
                _ => Vec::new(),
            };
        };

        let run = RunId(self.next_run);
        self.next_run += 1;
        debug!("Starting {mode:?} run {run:?} for page {page} at {tier}");
        self.runs.insert(
            page,
            PageLoadState {
                run,
                mode,
                cancel: CancelToken::new(),
                attempts_by_tier: [0; Tier::COUNT],
                highest_tier_in_flight: None,
                in_flight: None,
            },
        );
        self.dispatch(page, tier)
    }

    /// Cancel the run for `page`, if any. Late results are discarded.
    pub fn supersede(&mut self, page: u32) -> bool {
        let Some(state) = self.runs.remove(&page) else {
            return false;
        };
        state.cancel.cancel();
        self.jobs.retain(|_, ticket| ticket.page != page);
        debug!("Superseded run {:?} for page {page}", state.run);
        true
    }

    /// Cancel every run except the one for `keep`, returning the pages hit
    pub fn supersede_all_except(&mut self, keep: u32) -> Vec<u32> {
        let stale: Vec<u32> = self
            .runs
            .keys()
            .copied()
            .filter(|page| *page != keep)
            .collect();
        for page in &stale {
            self.supersede(*page);
        }
        stale
    }

    /// Feed a worker response back in
    pub fn on_response(
        &mut self,
        response: RasterResponse,
        cache: &mut TieredPageCache,
        ledger: &mut FailureLedger,
    ) -> Vec<Effect> {
        let id = response.id();
        let Some(ticket) = self.jobs.remove(&id) else {
            debug!("Discarding result of retired job {id:?}");
            return Vec::new();
        };

        if !self.is_current(&ticket) {
            debug!(
                "Discarding stale {} result for page {} (run {:?})",
                ticket.tier, ticket.page, ticket.run
            );
            return Vec::new();
        }

        match response {
            RasterResponse::Finished {
                output: Ok(output), ..
            } => self.complete_tier(ticket, output.image, cache),
            RasterResponse::Finished {
                output: Err(fault), ..
            } => self.fail_attempt(ticket, fault, cache, ledger),
            RasterResponse::Cancelled { page, tier, .. } => {
                debug!("Worker skipped cancelled {tier} attempt for page {page}");
                Vec::new()
            }
        }
    }

    /// Handle the timers this scheduler asked for
    pub fn on_timer(
        &mut self,
        timer: &Timer,
        cache: &mut TieredPageCache,
        ledger: &mut FailureLedger,
    ) -> Vec<Effect> {
        match *timer {
            Timer::StartAttempt { page, run, tier } => {
                let live = self.runs.get(&page).is_some_and(|state| {
                    state.run == run && !state.cancelled() && state.in_flight.is_none()
                });
                if !live {
                    debug!("Dropping stale {tier} attempt for page {page} (run {run:?})");
                    return Vec::new();
                }
                self.dispatch(page, tier)
            }

            Timer::AttemptDeadline { job } => {
                let Some(ticket) = self.jobs.remove(&job) else {
                    return Vec::new();
                };
                let current = self.is_current(&ticket);
                ticket.cancel.cancel();
                if !current {
                    return Vec::new();
                }
                self.fail_attempt(ticket, RasterFault::Timeout, cache, ledger)
            }

            _ => Vec::new(),
        }
    }

    /// Cancel everything, e.g. when the viewer shuts down
    pub fn cancel_all(&mut self) {
        for (_, state) in self.runs.drain() {
            state.cancel.cancel();
        }
        self.jobs.clear();
    }

    fn first_tier(&self, best: Option<Tier>, mode: RunMode) -> Option<Tier> {
        match (mode, best) {
            (RunMode::PreviewOnly, None) => Some(Tier::LOWEST),
            (RunMode::PreviewOnly, Some(_)) => None,
            (RunMode::Escalate, Some(best)) if best >= self.policy.satisfied() => None,
            (RunMode::Escalate, None) => Some(Tier::LOWEST),
            (RunMode::Escalate, Some(best)) => best.next().filter(|t| *t <= self.policy.top_tier),
        }
    }

    fn attempt_budget(&self, mode: RunMode) -> u32 {
        match mode {
            RunMode::Escalate => self.policy.max_retries + 1,
            RunMode::PreviewOnly => 1,
        }
    }

    fn is_current(&self, ticket: &JobTicket) -> bool {
        !ticket.cancel.is_cancelled()
            && self
                .runs
                .get(&ticket.page)
                .is_some_and(|state| state.run == ticket.run && !state.cancelled())
    }

    fn dispatch(&mut self, page: u32, tier: Tier) -> Vec<Effect> {
        let Some(state) = self.runs.get_mut(&page) else {
            return Vec::new();
        };

        let id = JobId::new(self.next_job);
        self.next_job += 1;

        let cancel = state.cancel.child_token();
        state.in_flight = Some(id);
        state.highest_tier_in_flight = Some(tier);
        self.jobs.insert(
            id,
            JobTicket {
                page,
                run: state.run,
                tier,
                cancel: cancel.clone(),
            },
        );

        let mut effects = vec![Effect::Rasterize(RasterJob {
            id,
            page,
            tier,
            scale: tier.scale(),
            fast_mode: tier.is_fast(),
            cancel,
        })];
        if let Some(timeout) = self.policy.attempt_timeout {
            effects.push(Effect::Schedule {
                delay: timeout,
                timer: Timer::AttemptDeadline { job: id },
            });
        }
        effects
    }

    /// Cross-fade drop of everything below `kept`, if anything is below it
    fn reclaim_below(&self, page: u32, kept: Tier, cache: &TieredPageCache) -> Option<Effect> {
        let lowest = cache.tiers(page).first().copied()?;
        (lowest < kept).then(|| Effect::Schedule {
            delay: self.policy.crossfade,
            timer: Timer::DropLowerTiers { page, kept },
        })
    }

    fn complete_tier(
        &mut self,
        ticket: JobTicket,
        image: ImagePayload,
        cache: &mut TieredPageCache,
    ) -> Vec<Effect> {
        let page = ticket.page;
        let tier = ticket.tier;
        let Some(mut state) = self.runs.remove(&page) else {
            return Vec::new();
        };
        state.in_flight = None;
        state.highest_tier_in_flight = None;

        let mut effects = Vec::new();
        if cache.best_tier(page).is_some_and(|best| best >= tier) {
            debug!("Page {page} already holds {tier} or better, not writing");
        } else {
            let evicted = cache.put(page, tier, image);
            effects.push(Effect::Notify(ViewerUpdate::PageDisplayed { page, tier }));
            for victim in evicted {
                self.supersede(victim);
                effects.push(Effect::Notify(ViewerUpdate::PageEvicted { page: victim }));
            }
            if !cache.has(page, tier) {
                return effects;
            }
        }

        let next = tier.next().filter(|next| *next <= self.policy.top_tier);
        match (state.mode, next) {
            (RunMode::Escalate, Some(next)) => {
                effects.push(Effect::Schedule {
                    delay: self.policy.settle_delay(tier),
                    timer: Timer::StartAttempt {
                        page,
                        run: state.run,
                        tier: next,
                    },
                });
                self.runs.insert(page, state);
            }
            (RunMode::Escalate, None) => {
                info!("Page {page} reached {tier}");
                effects.extend(self.reclaim_below(page, tier, cache));
            }
            (RunMode::PreviewOnly, _) => {
                debug!("Preloaded {tier} for page {page}");
            }
        }
        effects
    }

    fn fail_attempt(
        &mut self,
        ticket: JobTicket,
        fault: RasterFault,
        cache: &TieredPageCache,
        ledger: &mut FailureLedger,
    ) -> Vec<Effect> {
        let page = ticket.page;
        let tier = ticket.tier;
        let Some(mut state) = self.runs.remove(&page) else {
            return Vec::new();
        };
        state.in_flight = None;
        state.highest_tier_in_flight = None;
        state.attempts_by_tier[tier.index()] += 1;
        let attempts = state.attempts(tier);
        let budget = self.attempt_budget(state.mode);

        if attempts < budget {
            debug!(
                "Page {page} {tier} attempt {attempts}/{budget} failed: {fault}; retrying in {:?}",
                self.policy.retry_backoff
            );
            let run = state.run;
            self.runs.insert(page, state);
            return vec![Effect::Schedule {
                delay: self.policy.retry_backoff,
                timer: Timer::StartAttempt { page, run, tier },
            }];
        }

        if state.mode == RunMode::PreviewOnly {
            debug!("Preload of page {page} failed: {fault}");
            return Vec::new();
        }

        if let Some(best) = cache.best_tier(page) {
            warn!("Page {page} could not reach {tier} ({fault}), keeping {best}");
            return self.reclaim_below(page, best, cache).into_iter().collect();
        }

        error!("Page {page} failed after {attempts} attempts at {tier}: {fault}");
        ledger.mark_failed(page);
        vec![Effect::Notify(ViewerUpdate::PageFailed { page })]
    }
}
