use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use clap::Parser;
use log::info;
use simplelog::{Config, LevelFilter, WriteLogger};

use pagelift::settings::load_settings;
use pagelift::synthetic::{SyntheticRasterizer, SyntheticSource};
use pagelift::viewer::{
    CancelToken, DocumentId, DocumentSource, PageView, Rasterizer, ViewerService,
};

#[derive(Parser)]
#[command(name = "pagelift", version, about)]
struct Args {
    /// PDF to open (requires the `pdf` feature)
    document: Option<PathBuf>,

    /// Use a generated document with this many pages instead of a file
    #[arg(long, value_name = "PAGES", conflicts_with = "document")]
    synthetic: Option<u32>,

    /// Pages to visit in order
    #[arg(long, value_delimiter = ',', default_value = "1")]
    visit: Vec<u32>,

    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, default_value = "pagelift.log")]
    log_file: PathBuf,

    /// off, error, warn, info, debug or trace
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Write the displayed image of each visited page here as PNG
    #[arg(long)]
    dump_dir: Option<PathBuf>,

    /// Synthetic document only: make this page fail to render
    #[arg(long)]
    fail_page: Vec<u32>,

    /// Synthetic document only: render time at 1x scale in milliseconds
    #[arg(long, default_value_t = 40)]
    latency_ms: u64,

    /// How long to wait for each page to settle
    #[arg(long, default_value_t = 30)]
    page_timeout_secs: u64,
}

fn main() -> Result<()> {
    better_panic::install();
    let args = Args::parse();

    let level: LevelFilter = args
        .log_level
        .parse()
        .map_err(|e| anyhow!("invalid --log-level {:?}: {e}", args.log_level))?;
    WriteLogger::init(
        level,
        Config::default(),
        File::create(&args.log_file)
            .with_context(|| format!("creating log file {}", args.log_file.display()))?,
    )?;

    info!("Starting pagelift");
    let settings = load_settings(args.config.as_deref());

    let (id, source, rasterizer) = collaborators(&args)?;
    let mut service = ViewerService::open(
        &id,
        source.as_ref(),
        rasterizer,
        &settings,
        &CancelToken::new(),
    )?;
    println!(
        "Opened {} ({} pages)",
        service.document().locator,
        service.total_pages()
    );

    if let Some(dir) = &args.dump_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating dump directory {}", dir.display()))?;
    }

    let top_tier = settings.escalation_policy().top_tier;
    let timeout = Duration::from_secs(args.page_timeout_secs);
    for &page in &args.visit {
        service.go_to_page(page);
        let settled = service.run_until(timeout, |state| {
            state.is_failed_current_page() || state.current_display().tier() == Some(top_tier)
        });

        for update in service.take_updates() {
            info!("{update:?}");
        }

        let shown = service.current_page();
        match service.current_display() {
            PageView::Ready(display) => {
                println!(
                    "page {shown}: {} {}x{}{}",
                    display.tier_label,
                    display.image.width_px,
                    display.image.height_px,
                    if settled { "" } else { " (still enhancing)" }
                );
                if let Some(dir) = &args.dump_dir {
                    save_png(dir, shown, &display.image)?;
                }
            }
            PageView::Failed(failed) => println!("page {}: failed to render", failed.page),
            PageView::Pending => println!("page {shown}: nothing rendered within {timeout:?}"),
        }
    }

    service.shutdown();
    info!("Shutting down pagelift");
    Ok(())
}

type Collaborators = (DocumentId, Box<dyn DocumentSource>, Arc<dyn Rasterizer>);

fn collaborators(args: &Args) -> Result<Collaborators> {
    if let Some(pages) = args.synthetic {
        let rasterizer = args.fail_page.iter().fold(
            SyntheticRasterizer::new(Duration::from_millis(args.latency_ms)),
            |rasterizer, page| rasterizer.failing_page(*page),
        );
        let source: Box<dyn DocumentSource> = Box::new(SyntheticSource::new(pages));
        let rasterizer: Arc<dyn Rasterizer> = Arc::new(rasterizer);
        return Ok((DocumentId::new("synthetic"), source, rasterizer));
    }

    let Some(path) = &args.document else {
        bail!("either a document path or --synthetic is required");
    };
    pdf_collaborators(path)
}

#[cfg(feature = "pdf")]
fn pdf_collaborators(path: &Path) -> Result<Collaborators> {
    use pagelift::mupdf_backend::{MupdfRasterizer, MupdfSource};

    let source: Box<dyn DocumentSource> = Box::new(MupdfSource);
    let rasterizer: Arc<dyn Rasterizer> = Arc::new(MupdfRasterizer);
    Ok((DocumentId::new(path.to_string_lossy()), source, rasterizer))
}

#[cfg(not(feature = "pdf"))]
fn pdf_collaborators(path: &Path) -> Result<Collaborators> {
    log::error!("Cannot open {}: built without the pdf feature", path.display());
    bail!("opening documents requires building with --features pdf")
}

fn save_png(dir: &Path, page: u32, image: &pagelift::viewer::ImagePayload) -> Result<()> {
    let Some(buffer) =
        image::RgbImage::from_raw(image.width_px, image.height_px, image.pixels.clone())
    else {
        bail!("page {page} image has an unexpected buffer size");
    };
    let path = dir.join(format!("page-{page:04}.png"));
    buffer
        .save(&path)
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}
