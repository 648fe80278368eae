//! End-to-end runs of `ViewerService` with real worker threads.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pagelift::settings::Settings;
use pagelift::synthetic::{SyntheticRasterizer, SyntheticSource};
use pagelift::viewer::{
    CancelToken, DocumentId, DocumentLocator, DocumentMetadata, DocumentSource, ImagePayload,
    PageView, RasterFault, RasterOutput, Rasterizer, SourceFault, Tier, ViewerService,
    ViewerUpdate,
};
use pagelift::ViewerError;

const WAIT: Duration = Duration::from_secs(10);

fn fast_settings() -> Settings {
    let mut settings = Settings::default();
    settings.initial_load_delay_ms = 0;
    settings.escalation.retry_backoff_ms = 5;
    settings.escalation.settle_after_preview_ms = 5;
    settings.escalation.settle_after_medium_ms = 5;
    settings.escalation.settle_after_final_ms = 5;
    settings.escalation.crossfade_ms = 5;
    settings.escalation.attempt_timeout_ms = Some(2_000);
    settings
}

/// Fails the first `failures` calls for a page, then succeeds
struct ScriptedRasterizer {
    failures: HashMap<u32, u32>,
    calls: Mutex<Vec<(u32, Tier)>>,
}

impl ScriptedRasterizer {
    fn new(failures: &[(u32, u32)]) -> Self {
        Self {
            failures: failures.iter().copied().collect(),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn calls_for(&self, page: u32) -> Vec<Tier> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(p, _)| *p == page)
            .map(|(_, tier)| *tier)
            .collect()
    }
}

fn tier_for(scale: f32) -> Tier {
    Tier::ALL
        .into_iter()
        .find(|tier| (tier.scale() - scale).abs() < f32::EPSILON)
        .unwrap()
}

impl Rasterizer for ScriptedRasterizer {
    fn rasterize_page(
        &self,
        _locator: &DocumentLocator,
        page: u32,
        scale: f32,
        _cancel: &CancelToken,
        fast_mode: bool,
    ) -> Result<RasterOutput, RasterFault> {
        let seen = {
            let mut calls = self.calls.lock().unwrap();
            calls.push((page, tier_for(scale)));
            calls.iter().filter(|(p, _)| *p == page).count()
        };
        let failures = self.failures.get(&page).copied().unwrap_or(0);
        if u32::try_from(seen).unwrap() <= failures {
            return Err(RasterFault::render(format!("call {seen} for page {page}")));
        }
        Ok(RasterOutput {
            image: ImagePayload {
                pixels: vec![255; 3],
                width_px: 1,
                height_px: 1,
            },
            is_preview: fast_mode,
        })
    }
}

fn document(total_pages: u32) -> DocumentMetadata {
    DocumentMetadata {
        locator: DocumentLocator("memory://doc".to_string()),
        total_pages,
    }
}

fn reached(service: &mut ViewerService, tier: Tier) -> bool {
    service.run_until(WAIT, |state| state.current_display().tier() == Some(tier))
}

#[test]
fn test_first_page_loads_and_reaches_final() {
    let rasterizer = Arc::new(ScriptedRasterizer::new(&[]));
    let mut service =
        ViewerService::with_document(document(10), rasterizer.clone(), &fast_settings()).unwrap();

    assert_eq!(service.current_page(), 1);
    assert!(reached(&mut service, Tier::Final));
    assert!(service.current_display().is_top_tier());
    assert!(!service.is_loading_current_page());
    assert!(!service.is_enhancing());

    assert_eq!(
        rasterizer.calls_for(1),
        vec![Tier::Preview, Tier::Medium, Tier::Final]
    );

    let updates = service.take_updates();
    assert!(updates.contains(&ViewerUpdate::LoadingFinished { page: 1 }));
    assert!(updates.contains(&ViewerUpdate::PageDisplayed {
        page: 1,
        tier: Tier::Final
    }));

    // Lower tiers are dropped after the cross-fade
    assert!(service.run_until(WAIT, |state| state.cache().tiers(1) == vec![Tier::Final]));
}

#[test]
fn test_transient_failures_are_retried() {
    let rasterizer = Arc::new(ScriptedRasterizer::new(&[(1, 2)]));
    let mut service =
        ViewerService::with_document(document(10), rasterizer.clone(), &fast_settings()).unwrap();

    assert!(reached(&mut service, Tier::Preview));
    assert!(!service.is_failed_current_page());
    assert_eq!(
        rasterizer.calls_for(1)[..3],
        [Tier::Preview, Tier::Preview, Tier::Preview]
    );
}

#[test]
fn test_persistent_failure_shows_indicator_until_retry() {
    let rasterizer = Arc::new(ScriptedRasterizer::new(&[(7, 3)]));
    let mut service =
        ViewerService::with_document(document(10), rasterizer.clone(), &fast_settings()).unwrap();

    service.go_to_page(7);
    assert!(service.run_until(WAIT, |state| state.is_failed_current_page()));
    assert!(matches!(service.current_display(), PageView::Failed(_)));
    assert_eq!(rasterizer.calls_for(7).len(), 3);
    assert!(service.poll().contains(&ViewerUpdate::PageFailed { page: 7 }));

    // Fourth call succeeds
    service.retry_current_page();
    assert!(reached(&mut service, Tier::Preview));
    assert!(!service.is_failed_current_page());
}

#[test]
fn test_navigation_away_keeps_only_target_work() {
    let rasterizer = Arc::new(SyntheticRasterizer::new(Duration::from_millis(20)));
    let mut settings = fast_settings();
    settings.workers = 1;
    let mut service = ViewerService::with_document(document(30), rasterizer, &settings).unwrap();

    for page in 2..=6 {
        service.go_to_page(page);
    }
    assert!(reached(&mut service, Tier::Final));
    assert_eq!(service.current_page(), 6);
    assert_eq!(service.state().scheduler().running_pages(), Vec::<u32>::new());
}

#[test]
fn test_open_surfaces_metadata_errors() {
    struct Denied;

    impl DocumentSource for Denied {
        fn metadata(
            &self,
            _id: &DocumentId,
            _cancel: &CancelToken,
        ) -> Result<DocumentMetadata, SourceFault> {
            Err(SourceFault::AccessDenied)
        }
    }

    let rasterizer = Arc::new(ScriptedRasterizer::new(&[]));
    let result = ViewerService::open(
        &DocumentId::new("secret"),
        &Denied,
        rasterizer.clone(),
        &fast_settings(),
        &CancelToken::new(),
    );
    assert!(matches!(
        result,
        Err(ViewerError::Metadata(SourceFault::AccessDenied))
    ));
    assert!(rasterizer.calls_for(1).is_empty());
}

#[test]
fn test_empty_document_is_rejected() {
    let result = ViewerService::open(
        &DocumentId::new("blank"),
        &SyntheticSource::new(0),
        Arc::new(SyntheticRasterizer::new(Duration::ZERO)),
        &fast_settings(),
        &CancelToken::new(),
    );
    assert!(matches!(result, Err(ViewerError::EmptyDocument)));
}

#[test]
fn test_cancelled_open_starts_nothing() {
    let cancel = CancelToken::new();
    cancel.cancel();

    let rasterizer = Arc::new(ScriptedRasterizer::new(&[]));
    let result = ViewerService::open(
        &DocumentId::new("slow"),
        &SyntheticSource::new(10),
        rasterizer.clone(),
        &fast_settings(),
        &cancel,
    );
    assert!(matches!(
        result,
        Err(ViewerError::Metadata(SourceFault::Cancelled))
    ));
    assert!(rasterizer.calls_for(1).is_empty());
}
