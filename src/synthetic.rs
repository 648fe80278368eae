//! In-process document source and rasterizer that need no document file
//!
//! Used by the demo binary (`--synthetic`) and by tests that want real
//! threads and real sleeps without a PDF backend.

use std::collections::HashSet;
use std::thread;
use std::time::{Duration, Instant};

use log::trace;

use crate::viewer::{
    CancelToken, DocumentId, DocumentLocator, DocumentMetadata, DocumentSource, ImagePayload,
    RasterFault, RasterOutput, Rasterizer, SourceFault,
};

/// Page size in pixels at scale 1.0 (US letter at roughly 10 dpi)
const BASE_WIDTH: f32 = 85.0;
const BASE_HEIGHT: f32 = 110.0;

const CANCEL_POLL: Duration = Duration::from_millis(5);

/// Document source reporting a fixed page count for any non-empty id
#[derive(Clone, Debug)]
pub struct SyntheticSource {
    total_pages: u32,
}

impl SyntheticSource {
    #[must_use]
    pub fn new(total_pages: u32) -> Self {
        Self { total_pages }
    }
}

impl DocumentSource for SyntheticSource {
    fn metadata(
        &self,
        id: &DocumentId,
        cancel: &CancelToken,
    ) -> Result<DocumentMetadata, SourceFault> {
        if cancel.is_cancelled() {
            return Err(SourceFault::Cancelled);
        }
        if id.0.is_empty() {
            return Err(SourceFault::NotFound);
        }
        Ok(DocumentMetadata {
            locator: DocumentLocator(format!("synthetic://{id}")),
            total_pages: self.total_pages,
        })
    }
}

/// Rasterizer that sleeps in proportion to the scale and paints a flat
/// page image
#[derive(Clone, Debug)]
pub struct SyntheticRasterizer {
    /// Render time at scale 1.0 outside fast mode
    latency: Duration,
    failing_pages: HashSet<u32>,
}

impl SyntheticRasterizer {
    #[must_use]
    pub fn new(latency: Duration) -> Self {
        Self {
            latency,
            failing_pages: HashSet::new(),
        }
    }

    /// Make every render of `page` fail
    #[must_use]
    pub fn failing_page(mut self, page: u32) -> Self {
        self.failing_pages.insert(page);
        self
    }

    fn render_time(&self, scale: f32, fast_mode: bool) -> Duration {
        let time = self.latency.mul_f32(scale.max(0.0));
        if fast_mode { time / 2 } else { time }
    }
}

impl Rasterizer for SyntheticRasterizer {
    fn rasterize_page(
        &self,
        _locator: &DocumentLocator,
        page: u32,
        scale: f32,
        cancel: &CancelToken,
        fast_mode: bool,
    ) -> Result<RasterOutput, RasterFault> {
        let deadline = Instant::now() + self.render_time(scale, fast_mode);
        loop {
            if cancel.is_cancelled() {
                trace!("Synthetic render of page {page} at {scale}x cancelled");
                return Err(RasterFault::Cancelled);
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep(CANCEL_POLL.min(deadline - now));
        }

        if self.failing_pages.contains(&page) {
            return Err(RasterFault::render(format!(
                "synthetic failure for page {page}"
            )));
        }

        Ok(RasterOutput {
            image: paint_page(page, scale),
            is_preview: fast_mode,
        })
    }
}

#[expect(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    reason = "Page sizes are small positive values"
)]
fn paint_page(page: u32, scale: f32) -> ImagePayload {
    let width_px = (BASE_WIDTH * scale).round().max(1.0) as u32;
    let height_px = (BASE_HEIGHT * scale).round().max(1.0) as u32;
    let shade = (page.wrapping_mul(37) % 200) as u8 + 40;
    let pixels = [shade, 255 - shade, 200]
        .repeat((width_px * height_px) as usize);

    ImagePayload {
        pixels,
        width_px,
        height_px,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn locator() -> DocumentLocator {
        DocumentLocator("synthetic://test".to_string())
    }

    #[test]
    fn image_size_follows_scale() {
        let rasterizer = SyntheticRasterizer::new(Duration::ZERO);
        let cancel = CancelToken::new();

        let preview = rasterizer
            .rasterize_page(&locator(), 1, 1.0, &cancel, true)
            .unwrap();
        let final_ = rasterizer
            .rasterize_page(&locator(), 1, 4.0, &cancel, false)
            .unwrap();

        assert!(preview.is_preview);
        assert_eq!((preview.image.width_px, preview.image.height_px), (85, 110));
        assert_eq!((final_.image.width_px, final_.image.height_px), (340, 440));
        assert_eq!(final_.image.byte_len(), 340 * 440 * 3);
    }

    #[test]
    fn cancelled_render_stops_early() {
        let rasterizer = SyntheticRasterizer::new(Duration::from_secs(10));
        let cancel = CancelToken::new();
        cancel.cancel();

        let started = Instant::now();
        let result = rasterizer.rasterize_page(&locator(), 1, 4.0, &cancel, false);
        assert_eq!(result.unwrap_err(), RasterFault::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn failing_page_fails() {
        let rasterizer = SyntheticRasterizer::new(Duration::ZERO).failing_page(7);
        let cancel = CancelToken::new();
        assert!(matches!(
            rasterizer.rasterize_page(&locator(), 7, 1.0, &cancel, true),
            Err(RasterFault::Render { .. })
        ));
        assert!(rasterizer.rasterize_page(&locator(), 8, 1.0, &cancel, true).is_ok());
    }

    #[test]
    fn source_rejects_empty_id() {
        let source = SyntheticSource::new(12);
        let cancel = CancelToken::new();

        let metadata = source.metadata(&DocumentId::new("doc"), &cancel).unwrap();
        assert_eq!(metadata.total_pages, 12);
        assert_eq!(
            source.metadata(&DocumentId::new(""), &cancel),
            Err(SourceFault::NotFound)
        );
    }
}
