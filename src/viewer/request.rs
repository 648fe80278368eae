//! Rasterizer job and response types

use super::tier::Tier;
use super::token::{CancelToken, JobId};
use super::types::RasterOutput;

/// One rasterizer call: a single attempt at a single tier of a page
#[derive(Clone, Debug, PartialEq)]
pub struct RasterJob {
    pub id: JobId,
    /// 1-based page number
    pub page: u32,
    pub tier: Tier,
    pub scale: f32,
    pub fast_mode: bool,
    /// Per-attempt token, child of the escalation run's token
    pub cancel: CancelToken,
}

/// Request sent to raster workers
#[derive(Debug)]
pub enum RasterRequest {
    Job(RasterJob),

    /// Shutdown the worker
    Shutdown,
}

/// Errors from a single rasterizer attempt
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RasterFault {
    #[error("rasterizer: {detail}")]
    Render { detail: String },

    #[error("attempt timed out")]
    Timeout,

    #[error("attempt was cancelled")]
    Cancelled,

    #[error("no raster worker is running")]
    WorkerGone,
}

impl RasterFault {
    pub fn render(msg: impl Into<String>) -> Self {
        Self::Render { detail: msg.into() }
    }
}

/// Response from raster workers
#[derive(Clone, Debug)]
pub enum RasterResponse {
    Finished {
        id: JobId,
        page: u32,
        tier: Tier,
        output: Result<RasterOutput, RasterFault>,
    },

    /// The job's token was cancelled before the worker picked it up
    Cancelled { id: JobId, page: u32, tier: Tier },
}

impl RasterResponse {
    #[must_use]
    pub fn id(&self) -> JobId {
        match self {
            Self::Finished { id, .. } | Self::Cancelled { id, .. } => *id,
        }
    }
}
