//! Collaborator contracts and the payloads that cross them

use std::fmt;

use super::request::RasterFault;
use super::token::CancelToken;

/// Identifier the caller uses to name a document
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DocumentId(pub String);

impl DocumentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where the rasterizer reads the document bytes from (path or URL)
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DocumentLocator(pub String);

impl fmt::Display for DocumentLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Resolved document: where it lives and how many pages it has
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DocumentMetadata {
    pub locator: DocumentLocator,
    pub total_pages: u32,
}

/// Why a document could not be opened. Fatal for the whole document.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum SourceFault {
    #[error("document not found or access denied")]
    NotFound,

    #[error("you do not have access to this document")]
    AccessDenied,

    #[error("document file is not available")]
    MissingFile,

    #[error("failed to read document metadata: {0}")]
    Metadata(String),

    #[error("metadata request was cancelled")]
    Cancelled,
}

/// Raw rasterized page image.
///
/// RGB pixel data, 3 bytes per pixel, row-major without padding.
#[derive(Clone, PartialEq, Eq)]
pub struct ImagePayload {
    pub pixels: Vec<u8>,
    pub width_px: u32,
    pub height_px: u32,
}

impl ImagePayload {
    #[must_use]
    pub fn byte_len(&self) -> usize {
        self.pixels.len()
    }
}

impl fmt::Debug for ImagePayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImagePayload")
            .field("width_px", &self.width_px)
            .field("height_px", &self.height_px)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}

/// Successful rasterizer result
#[derive(Clone, Debug)]
pub struct RasterOutput {
    pub image: ImagePayload,
    /// The rasterizer took its fast, low fidelity path
    pub is_preview: bool,
}

/// Resolves document identifiers, enforcing access control.
pub trait DocumentSource: Send + Sync {
    fn metadata(
        &self,
        id: &DocumentId,
        cancel: &CancelToken,
    ) -> Result<DocumentMetadata, SourceFault>;
}

/// Page rasterizer.
///
/// Called from worker threads. Implementations should poll `cancel`
/// between expensive steps and return [`RasterFault::Cancelled`] once it
/// trips; a result produced after cancellation is discarded anyway.
pub trait Rasterizer: Send + Sync {
    /// Render 1-based `page` at `scale`. `fast_mode` asks for the cheapest
    /// render path.
    fn rasterize_page(
        &self,
        locator: &DocumentLocator,
        page: u32,
        scale: f32,
        cancel: &CancelToken,
        fast_mode: bool,
    ) -> Result<RasterOutput, RasterFault>;
}
