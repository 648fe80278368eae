//! Viewer service - drives the viewer state with worker threads and timers

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use flume::{Receiver, RecvTimeoutError, SendError, Sender};
use log::{debug, info, warn};

use super::request::{RasterFault, RasterRequest, RasterResponse};
use super::state::{Command, Effect, PageView, ViewerState, ViewerUpdate};
use super::timer::TimerQueue;
use super::token::CancelToken;
use super::types::{DocumentId, DocumentMetadata, DocumentSource, Rasterizer};
use super::worker::raster_worker;
use crate::error::ViewerError;
use crate::settings::Settings;

/// Default number of raster worker threads
pub const DEFAULT_WORKERS: usize = 2;

/// Owns one open document: the viewer state, the timer queue and the
/// raster worker pool.
///
/// All state changes happen on the thread that owns the service, inside
/// [`ViewerService::poll`], [`ViewerService::wait`] or one of the
/// navigation calls. Workers only ever see jobs and send back responses.
pub struct ViewerService {
    state: ViewerState,
    timers: TimerQueue,
    request_tx: Sender<RasterRequest>,
    response_rx: Receiver<RasterResponse>,
    num_workers: usize,
    document: DocumentMetadata,
    /// Commands produced while executing effects, applied in order
    pending: VecDeque<Command>,
    updates: Vec<ViewerUpdate>,
}

impl ViewerService {
    /// Resolve `id` through `source` and open the document.
    ///
    /// Metadata errors are fatal and returned once; nothing is started.
    /// Cancelling `cancel` abandons the lookup with `SourceFault::Cancelled`.
    pub fn open(
        id: &DocumentId,
        source: &dyn DocumentSource,
        rasterizer: Arc<dyn Rasterizer>,
        settings: &Settings,
        cancel: &CancelToken,
    ) -> Result<Self, ViewerError> {
        let metadata = source.metadata(id, cancel)?;
        info!(
            "Opened document {id} at {} with {} pages",
            metadata.locator, metadata.total_pages
        );
        Self::with_document(metadata, rasterizer, settings)
    }

    /// Start viewing an already resolved document
    pub fn with_document(
        document: DocumentMetadata,
        rasterizer: Arc<dyn Rasterizer>,
        settings: &Settings,
    ) -> Result<Self, ViewerError> {
        if document.total_pages == 0 {
            return Err(ViewerError::EmptyDocument);
        }

        // flume gives MPMC channels: all workers pull from one request queue
        let (request_tx, request_rx) = flume::unbounded();
        let (response_tx, response_rx) = flume::unbounded();

        let num_workers = settings.workers.max(1);
        for i in 0..num_workers {
            let locator = document.locator.clone();
            let rasterizer = Arc::clone(&rasterizer);
            let rx = request_rx.clone();
            let tx = response_tx.clone();

            thread::Builder::new()
                .name(format!("pagelift-raster-{i}"))
                .spawn(move || raster_worker(locator, rasterizer.as_ref(), rx, tx))?;
        }

        let state = ViewerState::from_settings(document.total_pages, settings);
        let mut service = Self {
            state,
            timers: TimerQueue::new(),
            request_tx,
            response_rx,
            num_workers,
            document,
            pending: VecDeque::new(),
            updates: Vec::new(),
        };
        service.apply_command(Command::Start);
        Ok(service)
    }

    #[must_use]
    pub fn document(&self) -> &DocumentMetadata {
        &self.document
    }

    #[must_use]
    pub fn state(&self) -> &ViewerState {
        &self.state
    }

    pub fn go_to_page(&mut self, page: u32) {
        self.apply_command(Command::GoToPage(page));
    }

    pub fn retry_current_page(&mut self) {
        self.apply_command(Command::RetryCurrentPage);
    }

    #[must_use]
    pub fn current_page(&self) -> u32 {
        self.state.current_page()
    }

    #[must_use]
    pub fn total_pages(&self) -> u32 {
        self.state.total_pages()
    }

    #[must_use]
    pub fn current_display(&self) -> PageView {
        self.state.current_display()
    }

    #[must_use]
    pub fn is_loading_current_page(&self) -> bool {
        self.state.is_loading_current_page()
    }

    #[must_use]
    pub fn is_failed_current_page(&self) -> bool {
        self.state.is_failed_current_page()
    }

    #[must_use]
    pub fn is_enhancing(&self) -> bool {
        self.state.is_enhancing()
    }

    /// Apply a command to the viewer state
    pub fn apply_command(&mut self, cmd: Command) {
        self.pending.push_back(cmd);
        while let Some(cmd) = self.pending.pop_front() {
            let effects = self.state.apply(cmd);
            self.execute_effects(effects);
        }
    }

    fn execute_effects(&mut self, effects: Vec<Effect>) {
        let now = Instant::now();
        for effect in effects {
            match effect {
                Effect::Rasterize(job) => {
                    if let Err(SendError(RasterRequest::Job(job))) =
                        self.request_tx.send(RasterRequest::Job(job))
                    {
                        warn!("No raster worker for page {} {}", job.page, job.tier);
                        self.pending
                            .push_back(Command::RasterFinished(RasterResponse::Finished {
                                id: job.id,
                                page: job.page,
                                tier: job.tier,
                                output: Err(RasterFault::WorkerGone),
                            }));
                    }
                }

                Effect::Schedule { delay, timer } => {
                    self.timers.schedule(now, delay, timer);
                }

                Effect::Notify(update) => {
                    self.updates.push(update);
                }
            }
        }
    }

    /// Process whatever is ready right now and return the updates since
    /// the last call
    pub fn poll(&mut self) -> Vec<ViewerUpdate> {
        self.step(Instant::now());
        self.take_updates()
    }

    /// Block until a response arrives, a timer is due or `timeout`
    /// elapses, then process everything ready
    pub fn wait(&mut self, timeout: Duration) -> Vec<ViewerUpdate> {
        self.step(Instant::now() + timeout);
        self.take_updates()
    }

    /// Keep processing until `done` holds or `timeout` elapses.
    ///
    /// Returns whether `done` was reached. Updates stay queued for
    /// [`ViewerService::take_updates`].
    pub fn run_until(
        &mut self,
        timeout: Duration,
        mut done: impl FnMut(&ViewerState) -> bool,
    ) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if done(&self.state) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            self.step(deadline);
        }
    }

    /// Updates produced since the last call
    pub fn take_updates(&mut self) -> Vec<ViewerUpdate> {
        std::mem::take(&mut self.updates)
    }

    fn step(&mut self, until: Instant) {
        let wake = self
            .timers
            .next_deadline()
            .map_or(until, |next| next.min(until));

        match self.response_rx.recv_deadline(wake) {
            Ok(response) => self.apply_command(Command::RasterFinished(response)),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                let now = Instant::now();
                if wake > now {
                    thread::sleep(wake - now);
                }
            }
        }

        while let Ok(response) = self.response_rx.try_recv() {
            self.apply_command(Command::RasterFinished(response));
        }

        for timer in self.timers.pop_due(Instant::now()) {
            self.apply_command(Command::TimerFired(timer));
        }
    }

    /// Cancel all work and stop the workers
    pub fn shutdown(&mut self) {
        self.state.cancel_all();
        self.timers.clear();
        self.pending.clear();
        for _ in 0..self.num_workers {
            let _ = self.request_tx.send(RasterRequest::Shutdown);
        }
        debug!("Viewer service for {} shut down", self.document.locator);
    }
}

impl Drop for ViewerService {
    fn drop(&mut self) {
        self.shutdown();
    }
}
