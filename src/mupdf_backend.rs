//! MuPDF-backed document source and rasterizer (feature `pdf`)

use std::cell::RefCell;
use std::fs::File;
use std::io::ErrorKind;
use std::path::Path;

use log::{debug, warn};
use mupdf::{Colorspace, Document, Matrix, Pixmap};

use crate::viewer::{
    CancelToken, DocumentId, DocumentLocator, DocumentMetadata, DocumentSource, ImagePayload,
    RasterFault, RasterOutput, Rasterizer, SourceFault,
};

thread_local! {
    // MuPDF documents cannot cross threads, so each raster worker keeps
    // its own handle to the last document it rendered.
    static OPEN_DOCUMENT: RefCell<Option<(DocumentLocator, Document)>> = const { RefCell::new(None) };
}

/// Treats document ids as file system paths
#[derive(Clone, Copy, Debug, Default)]
pub struct MupdfSource;

impl DocumentSource for MupdfSource {
    fn metadata(
        &self,
        id: &DocumentId,
        cancel: &CancelToken,
    ) -> Result<DocumentMetadata, SourceFault> {
        let path = Path::new(&id.0);
        if let Err(e) = File::open(path) {
            return Err(match e.kind() {
                ErrorKind::NotFound => SourceFault::NotFound,
                ErrorKind::PermissionDenied => SourceFault::AccessDenied,
                _ => SourceFault::Metadata(e.to_string()),
            });
        }
        if !path.is_file() {
            return Err(SourceFault::MissingFile);
        }
        if cancel.is_cancelled() {
            return Err(SourceFault::Cancelled);
        }

        let doc = Document::open(path.to_string_lossy().as_ref())
            .map_err(|e| SourceFault::Metadata(e.to_string()))?;
        let page_count = doc
            .page_count()
            .map_err(|e| SourceFault::Metadata(e.to_string()))?;

        Ok(DocumentMetadata {
            locator: DocumentLocator(path.to_string_lossy().into_owned()),
            total_pages: u32::try_from(page_count).unwrap_or(0),
        })
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct MupdfRasterizer;

impl Rasterizer for MupdfRasterizer {
    fn rasterize_page(
        &self,
        locator: &DocumentLocator,
        page: u32,
        scale: f32,
        cancel: &CancelToken,
        fast_mode: bool,
    ) -> Result<RasterOutput, RasterFault> {
        OPEN_DOCUMENT.with_borrow_mut(|open| {
            if open.as_ref().is_none_or(|(loaded, _)| loaded != locator) {
                debug!("Opening {locator} on {:?}", std::thread::current().name());
                let doc = Document::open(&locator.0)
                    .map_err(|e| RasterFault::render(e.to_string()))?;
                *open = Some((locator.clone(), doc));
            }
            let Some((_, doc)) = open.as_ref() else {
                return Err(RasterFault::WorkerGone);
            };

            if cancel.is_cancelled() {
                return Err(RasterFault::Cancelled);
            }

            let index = i32::try_from(page.saturating_sub(1))
                .map_err(|_| RasterFault::render(format!("page {page} out of range")))?;
            let loaded = doc
                .load_page(index)
                .map_err(|e| RasterFault::render(e.to_string()))?;

            if cancel.is_cancelled() {
                return Err(RasterFault::Cancelled);
            }

            let pixmap = loaded
                .to_pixmap(
                    &Matrix::new_scale(scale, scale),
                    &Colorspace::device_rgb(),
                    false,
                    false,
                )
                .map_err(|e| RasterFault::render(e.to_string()))?;

            Ok(RasterOutput {
                image: ImagePayload {
                    pixels: pixmap_to_rgb(&pixmap)?,
                    width_px: pixmap.width(),
                    height_px: pixmap.height(),
                },
                is_preview: fast_mode,
            })
        })
    }
}

fn pixmap_to_rgb(pixmap: &Pixmap) -> Result<Vec<u8>, RasterFault> {
    let n = pixmap.n() as usize;
    if n < 3 {
        warn!("Pixmap has {n} channels, expected RGB");
        return Err(RasterFault::render(format!(
            "Unsupported pixmap format: {n} channels"
        )));
    }

    let width = pixmap.width() as usize;
    let height = pixmap.height() as usize;
    let stride = pixmap.stride() as usize;
    let samples = pixmap.samples();
    let row_bytes = width * n;
    if samples.len() < stride.saturating_mul(height) || row_bytes > stride {
        return Err(RasterFault::render("Pixmap buffer size mismatch"));
    }

    let mut out = Vec::with_capacity(width * height * 3);
    for row in samples.chunks(stride).take(height) {
        let row = &row[..row_bytes];
        if n == 3 {
            out.extend_from_slice(row);
        } else {
            out.extend(row.chunks_exact(n).flat_map(|px| px[..3].iter().copied()));
        }
    }
    Ok(out)
}
