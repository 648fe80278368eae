use crate::viewer::SourceFault;

/// Errors that stop a document from being viewed at all.
///
/// Per-page rasterizer failures never surface here; they are retried and
/// end up in the failure ledger.
#[derive(Debug, thiserror::Error)]
pub enum ViewerError {
    #[error(transparent)]
    Metadata(#[from] SourceFault),

    #[error("document has no pages")]
    EmptyDocument,

    #[error("failed to start raster worker: {0}")]
    Io(#[from] std::io::Error),
}
