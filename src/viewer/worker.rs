//! Raster worker - runs in separate thread(s)

use flume::{Receiver, Sender};
use log::debug;

use super::request::{RasterJob, RasterRequest, RasterResponse};
use super::types::{DocumentLocator, Rasterizer};

/// Main worker function - runs in a dedicated thread
#[expect(
    clippy::needless_pass_by_value,
    reason = "Values moved into thread, need ownership"
)]
pub fn raster_worker(
    locator: DocumentLocator,
    rasterizer: &dyn Rasterizer,
    requests: Receiver<RasterRequest>,
    responses: Sender<RasterResponse>,
) {
    for request in requests {
        match request {
            RasterRequest::Job(job) => {
                let response = handle_job(&locator, rasterizer, job);
                if responses.send(response).is_err() {
                    break;
                }
            }

            RasterRequest::Shutdown => break,
        }
    }
    debug!("Raster worker for {locator} exiting");
}

fn handle_job(locator: &DocumentLocator, rasterizer: &dyn Rasterizer, job: RasterJob) -> RasterResponse {
    if job.cancel.is_cancelled() {
        return RasterResponse::Cancelled {
            id: job.id,
            page: job.page,
            tier: job.tier,
        };
    }

    let output = rasterizer.rasterize_page(locator, job.page, job.scale, &job.cancel, job.fast_mode);

    RasterResponse::Finished {
        id: job.id,
        page: job.page,
        tier: job.tier,
        output,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::viewer::request::RasterFault;
    use crate::viewer::tier::Tier;
    use crate::viewer::token::{CancelToken, JobId};
    use crate::viewer::types::{ImagePayload, RasterOutput};

    struct CountingRasterizer {
        calls: AtomicU32,
    }

    impl Rasterizer for CountingRasterizer {
        fn rasterize_page(
            &self,
            _locator: &DocumentLocator,
            page: u32,
            _scale: f32,
            _cancel: &CancelToken,
            fast_mode: bool,
        ) -> Result<RasterOutput, RasterFault> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if page == 13 {
                return Err(RasterFault::render("unlucky page"));
            }
            Ok(RasterOutput {
                image: ImagePayload {
                    pixels: vec![0; 3],
                    width_px: 1,
                    height_px: 1,
                },
                is_preview: fast_mode,
            })
        }
    }

    fn job(id: u64, page: u32) -> RasterJob {
        RasterJob {
            id: JobId::new(id),
            page,
            tier: Tier::Preview,
            scale: Tier::Preview.scale(),
            fast_mode: true,
            cancel: CancelToken::new(),
        }
    }

    #[test]
    fn worker_answers_every_job_in_order() {
        let (request_tx, request_rx) = flume::unbounded();
        let (response_tx, response_rx) = flume::unbounded();
        let rasterizer = CountingRasterizer {
            calls: AtomicU32::new(0),
        };

        let cancelled = job(2, 2);
        cancelled.cancel.cancel();

        request_tx.send(RasterRequest::Job(job(1, 1))).unwrap();
        request_tx.send(RasterRequest::Job(cancelled)).unwrap();
        request_tx.send(RasterRequest::Job(job(3, 13))).unwrap();
        request_tx.send(RasterRequest::Shutdown).unwrap();

        raster_worker(
            DocumentLocator("doc.pdf".to_string()),
            &rasterizer,
            request_rx,
            response_tx,
        );

        let responses: Vec<_> = response_rx.drain().collect();
        assert_eq!(responses.len(), 3);
        assert!(matches!(
            &responses[0],
            RasterResponse::Finished { page: 1, output: Ok(out), .. } if out.is_preview
        ));
        assert!(matches!(responses[1], RasterResponse::Cancelled { page: 2, .. }));
        assert!(matches!(
            &responses[2],
            RasterResponse::Finished { page: 13, output: Err(RasterFault::Render { .. }), .. }
        ));
        // Cancelled job never reached the rasterizer
        assert_eq!(rasterizer.calls.load(Ordering::SeqCst), 2);
    }
}
