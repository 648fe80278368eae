//! Progressive page viewer engine

mod cache;
mod ledger;
mod request;
mod scheduler;
mod service;
mod state;
mod tier;
mod timer;
mod token;
mod types;
mod worker;

pub use cache::{CacheEntry, DEFAULT_PAGE_BUDGET, TieredPageCache};
pub use ledger::FailureLedger;
pub use request::{RasterFault, RasterJob, RasterRequest, RasterResponse};
pub use scheduler::{EscalationPolicy, EscalationScheduler, PageLoadState, RunMode};
pub use service::{DEFAULT_WORKERS, ViewerService};
pub use state::{
    Command, DEFAULT_INITIAL_LOAD_DELAY, DisplayImage, Effect, FailedPage, PagePhase, PageView,
    PreloadPolicy, ViewerState, ViewerUpdate,
};
pub use tier::Tier;
pub use timer::{Timer, TimerQueue};
pub use token::{CancelToken, JobId, RunId};
pub use types::*;
pub use worker::raster_worker;
