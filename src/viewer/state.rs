//! Viewer state: current page, per-page phase and the command dispatch
//!
//! `ViewerState::apply` is the only way anything changes. It takes a
//! [`Command`] (user navigation, a worker response, a timer firing) and
//! returns the [`Effect`]s the driver has to carry out.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};

use super::cache::TieredPageCache;
use super::ledger::FailureLedger;
use super::request::{RasterJob, RasterResponse};
use super::scheduler::{EscalationScheduler, RunMode};
use super::tier::Tier;
use super::timer::Timer;
use super::types::ImagePayload;
use crate::settings::Settings;

/// Default pause between opening a document and requesting page 1
pub const DEFAULT_INITIAL_LOAD_DELAY: Duration = Duration::from_millis(100);

/// Commands that drive the viewer
#[derive(Clone, Debug)]
pub enum Command {
    /// Document is open, schedule the first page
    Start,
    /// Go to a specific page (1-based, clamped)
    GoToPage(u32),
    /// Purge and reload the current page after a terminal failure
    RetryCurrentPage,
    /// A raster worker answered
    RasterFinished(RasterResponse),
    /// A scheduled timer is due
    TimerFired(Timer),
}

/// Effects produced by commands
#[derive(Clone, Debug, PartialEq)]
pub enum Effect {
    /// Hand a job to the raster workers
    Rasterize(RasterJob),
    /// Fire `timer` after `delay`
    Schedule { delay: Duration, timer: Timer },
    /// Tell the presentation layer something changed
    Notify(ViewerUpdate),
}

/// Changes the presentation layer may want to react to
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ViewerUpdate {
    /// A tier of `page` was written to the cache
    PageDisplayed { page: u32, tier: Tier },
    /// Nothing could be rendered for `page`
    PageFailed { page: u32 },
    /// The current page has something to show
    LoadingFinished { page: u32 },
    /// `page` lost all its cache entries to the page budget
    PageEvicted { page: u32 },
}

/// Per-page state as seen by the controller
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PagePhase {
    Unrequested,
    Loading,
    Displaying(Tier),
    Failed,
}

/// Best available image for the current page
#[derive(Clone, Debug)]
pub struct DisplayImage {
    pub page: u32,
    pub image: Arc<ImagePayload>,
    pub tier: Tier,
    pub tier_label: &'static str,
    pub is_top_tier: bool,
}

/// Failure indicator for a page that could not be rendered at all
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FailedPage {
    pub page: u32,
}

/// What the presentation layer should draw for the current page
#[derive(Clone, Debug)]
pub enum PageView {
    /// Nothing cached yet; show a spinner
    Pending,
    Ready(DisplayImage),
    /// Show a retry affordance
    Failed(FailedPage),
}

impl PageView {
    #[must_use]
    pub fn tier(&self) -> Option<Tier> {
        match self {
            PageView::Ready(display) => Some(display.tier),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_top_tier(&self) -> bool {
        matches!(self, PageView::Ready(display) if display.is_top_tier)
    }

    #[must_use]
    pub fn is_failed(&self) -> bool {
        matches!(self, PageView::Failed(_))
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(self, PageView::Pending)
    }
}

/// Neighbour preloading policy.
///
/// Preloads compete with quality upgrades for the same rasterizer, so a
/// preload that comes due while the current page has an attempt in flight
/// is pushed back by another `stagger`.
#[derive(Clone, Debug, PartialEq)]
pub struct PreloadPolicy {
    pub enabled: bool,
    /// How many following pages get a preview
    pub ahead: u32,
    pub stagger: Duration,
    /// Only documents shorter than this are preloaded
    pub max_document_pages: u32,
}

impl Default for PreloadPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            ahead: 3,
            stagger: Duration::from_millis(500),
            max_document_pages: 200,
        }
    }
}

/// Navigation controller for one open document
pub struct ViewerState {
    current_page: u32,
    total_pages: u32,
    loading: bool,
    phases: HashMap<u32, PagePhase>,
    cache: TieredPageCache,
    scheduler: EscalationScheduler,
    ledger: FailureLedger,
    preload: PreloadPolicy,
    initial_load_delay: Duration,
}

impl ViewerState {
    /// Create a viewer over `total_pages` pages using the given cache and
    /// scheduler
    #[must_use]
    pub fn new(total_pages: u32, cache: TieredPageCache, scheduler: EscalationScheduler) -> Self {
        Self {
            current_page: 1,
            total_pages,
            loading: false,
            phases: HashMap::new(),
            cache,
            scheduler,
            ledger: FailureLedger::new(),
            preload: PreloadPolicy::default(),
            initial_load_delay: DEFAULT_INITIAL_LOAD_DELAY,
        }
    }

    #[must_use]
    pub fn from_settings(total_pages: u32, settings: &Settings) -> Self {
        Self::new(
            total_pages,
            TieredPageCache::new(settings.page_budget),
            EscalationScheduler::new(settings.escalation_policy()),
        )
        .with_preload(settings.preload_policy())
        .with_initial_load_delay(settings.initial_load_delay())
    }

    #[must_use]
    pub fn with_preload(mut self, policy: PreloadPolicy) -> Self {
        self.preload = policy;
        self
    }

    #[must_use]
    pub fn with_initial_load_delay(mut self, delay: Duration) -> Self {
        self.initial_load_delay = delay;
        self
    }

    /// Apply a command and return resulting effects
    #[must_use]
    pub fn apply(&mut self, cmd: Command) -> Vec<Effect> {
        match cmd {
            Command::Start => vec![Effect::Schedule {
                delay: self.initial_load_delay,
                timer: Timer::InitialLoad,
            }],

            Command::GoToPage(page) => self.go_to_page(page),

            Command::RetryCurrentPage => self.retry_current_page(),

            Command::RasterFinished(response) => {
                let effects =
                    self.scheduler
                        .on_response(response, &mut self.cache, &mut self.ledger);
                self.observe(effects)
            }

            Command::TimerFired(timer) => self.on_timer(timer),
        }
    }

    /// Best available image for the current page, or why there is none
    #[must_use]
    pub fn current_display(&self) -> PageView {
        let page = self.current_page;
        if self.ledger.is_failed(page) {
            return PageView::Failed(FailedPage { page });
        }

        match self.cache.peek(page) {
            Some(entry) => PageView::Ready(DisplayImage {
                page,
                image: Arc::clone(&entry.image),
                tier: entry.tier,
                tier_label: entry.tier.label(),
                is_top_tier: entry.tier >= self.scheduler.policy().top_tier,
            }),
            None => PageView::Pending,
        }
    }

    #[must_use]
    pub fn current_page(&self) -> u32 {
        self.current_page
    }

    #[must_use]
    pub fn total_pages(&self) -> u32 {
        self.total_pages
    }

    #[must_use]
    pub fn is_loading_current_page(&self) -> bool {
        self.loading
    }

    #[must_use]
    pub fn is_failed_current_page(&self) -> bool {
        self.ledger.is_failed(self.current_page)
    }

    /// Something is shown for the current page and a better tier is on its way
    #[must_use]
    pub fn is_enhancing(&self) -> bool {
        let display = self.current_display();
        matches!(display, PageView::Ready(_))
            && !display.is_top_tier()
            && self
                .scheduler
                .run_state(self.current_page)
                .is_some_and(|state| state.mode == RunMode::Escalate)
    }

    #[must_use]
    pub fn phase(&self, page: u32) -> PagePhase {
        self.phases
            .get(&page)
            .copied()
            .unwrap_or(PagePhase::Unrequested)
    }

    #[must_use]
    pub fn cache(&self) -> &TieredPageCache {
        &self.cache
    }

    #[must_use]
    pub fn ledger(&self) -> &FailureLedger {
        &self.ledger
    }

    #[must_use]
    pub fn scheduler(&self) -> &EscalationScheduler {
        &self.scheduler
    }

    /// Cancel all in-flight work
    pub fn cancel_all(&mut self) {
        self.scheduler.cancel_all();
    }

    fn go_to_page(&mut self, page: u32) -> Vec<Effect> {
        if self.total_pages == 0 {
            return Vec::new();
        }

        let target = page.clamp(1, self.total_pages);
        if target != self.current_page {
            debug!("Navigating from page {} to {target}", self.current_page);
            for stale in self.scheduler.supersede_all_except(target) {
                if self.phase(stale) == PagePhase::Loading {
                    self.set_phase(stale, PagePhase::Unrequested);
                }
            }
            self.current_page = target;
        }
        self.cache.pin(target);

        if self.ledger.is_failed(target) {
            self.loading = false;
            return Vec::new();
        }

        if self.cache.get(target).is_some() {
            self.loading = false;
        } else {
            self.loading = true;
            self.set_phase(target, PagePhase::Loading);
        }

        self.scheduler
            .begin(target, RunMode::Escalate, &self.cache, &self.ledger)
    }

    fn retry_current_page(&mut self) -> Vec<Effect> {
        if self.total_pages == 0 {
            return Vec::new();
        }

        let page = self.current_page;
        info!("Retrying page {page}");
        self.ledger.clear(page);
        self.cache.purge(page);
        self.scheduler.supersede(page);
        self.loading = true;
        self.set_phase(page, PagePhase::Loading);

        self.scheduler
            .begin(page, RunMode::Escalate, &self.cache, &self.ledger)
    }

    fn on_timer(&mut self, timer: Timer) -> Vec<Effect> {
        match timer {
            Timer::InitialLoad => self.go_to_page(self.current_page),

            Timer::DropLowerTiers { page, kept } => {
                if self.cache.has(page, kept) {
                    let dropped = self.cache.drop_below(page, kept);
                    if dropped > 0 {
                        debug!("Dropped {dropped} tier(s) of page {page} below {kept}");
                    }
                }
                Vec::new()
            }

            Timer::Preload { page, origin } => self.preload(page, origin),

            Timer::StartAttempt { .. } | Timer::AttemptDeadline { .. } => {
                let effects = self
                    .scheduler
                    .on_timer(&timer, &mut self.cache, &mut self.ledger);
                self.observe(effects)
            }
        }
    }

    fn preload(&mut self, page: u32, origin: u32) -> Vec<Effect> {
        if origin != self.current_page || page == self.current_page {
            return Vec::new();
        }

        if self.scheduler.has_attempt_in_flight(self.current_page) {
            return vec![Effect::Schedule {
                delay: self.preload.stagger,
                timer: Timer::Preload { page, origin },
            }];
        }

        self.scheduler
            .begin(page, RunMode::PreviewOnly, &self.cache, &self.ledger)
    }

    fn schedule_preloads(&self, origin: u32) -> Vec<Effect> {
        if !self.preload.enabled || self.total_pages >= self.preload.max_document_pages {
            return Vec::new();
        }

        (1..=self.preload.ahead)
            .map(|offset| (offset, origin.saturating_add(offset)))
            .take_while(|(_, page)| *page <= self.total_pages)
            .map(|(offset, page)| Effect::Schedule {
                delay: self.preload.stagger * offset,
                timer: Timer::Preload { page, origin },
            })
            .collect()
    }

    /// Track page phases from scheduler notifications
    fn observe(&mut self, effects: Vec<Effect>) -> Vec<Effect> {
        let mut out = Vec::with_capacity(effects.len());
        // Scheduled after the scheduler's own timers so upgrades due at the
        // same instant fire first
        let mut preloads = Vec::new();
        for effect in effects {
            let Effect::Notify(update) = effect else {
                out.push(effect);
                continue;
            };
            out.push(effect);

            match update {
                ViewerUpdate::PageDisplayed { page, tier } => {
                    self.set_phase(page, PagePhase::Displaying(tier));
                    if page == self.current_page {
                        if self.loading {
                            self.loading = false;
                            out.push(Effect::Notify(ViewerUpdate::LoadingFinished { page }));
                        }
                        if tier == Tier::LOWEST {
                            preloads = self.schedule_preloads(page);
                        }
                    }
                }

                ViewerUpdate::PageFailed { page } => {
                    self.set_phase(page, PagePhase::Failed);
                    if page == self.current_page {
                        self.loading = false;
                    }
                }

                ViewerUpdate::PageEvicted { page } => {
                    self.set_phase(page, PagePhase::Unrequested);
                }

                ViewerUpdate::LoadingFinished { .. } => {}
            }
        }
        out.extend(preloads);
        out
    }

    fn set_phase(&mut self, page: u32, phase: PagePhase) {
        let previous = self.phase(page);
        if previous == phase {
            return;
        }
        debug!("Page {page}: {previous:?} -> {phase:?}");
        if phase == PagePhase::Unrequested {
            self.phases.remove(&page);
        } else {
            self.phases.insert(page, phase);
        }
    }
}
