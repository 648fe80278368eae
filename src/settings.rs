use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::viewer::{EscalationPolicy, PreloadPolicy, Tier};

pub const CURRENT_VERSION: u32 = 1;
const SETTINGS_FILENAME: &str = "config.yaml";
const APP_NAME: &str = "pagelift";

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("failed to read settings file {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse settings file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("failed to write settings file {path:?}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Whether neighbours of the current page get a preview ahead of time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PreloadMode {
    #[default]
    Disabled,
    /// Preload after the current page's preview, yielding to its upgrades
    Deferred,
}

impl PreloadMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PreloadMode::Disabled => "disabled",
            PreloadMode::Deferred => "deferred",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationSettings {
    #[serde(default = "default_top_tier")]
    pub top_tier: Tier,

    #[serde(default = "default_top_tier")]
    pub satisfied_tier: Tier,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    #[serde(default = "default_settle_after_preview_ms")]
    pub settle_after_preview_ms: u64,

    #[serde(default = "default_settle_after_ms")]
    pub settle_after_medium_ms: u64,

    #[serde(default = "default_settle_after_ms")]
    pub settle_after_final_ms: u64,

    #[serde(default = "default_crossfade_ms")]
    pub crossfade_ms: u64,

    /// `None` disables the per-attempt deadline
    #[serde(default = "default_attempt_timeout_ms")]
    pub attempt_timeout_ms: Option<u64>,
}

fn default_top_tier() -> Tier {
    Tier::Final
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_backoff_ms() -> u64 {
    1200
}

fn default_settle_after_preview_ms() -> u64 {
    500
}

fn default_settle_after_ms() -> u64 {
    2000
}

fn default_crossfade_ms() -> u64 {
    600
}

fn default_attempt_timeout_ms() -> Option<u64> {
    Some(30_000)
}

impl Default for EscalationSettings {
    fn default() -> Self {
        Self {
            top_tier: default_top_tier(),
            satisfied_tier: default_top_tier(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            settle_after_preview_ms: default_settle_after_preview_ms(),
            settle_after_medium_ms: default_settle_after_ms(),
            settle_after_final_ms: default_settle_after_ms(),
            crossfade_ms: default_crossfade_ms(),
            attempt_timeout_ms: default_attempt_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreloadSettings {
    #[serde(default)]
    pub policy: PreloadMode,

    #[serde(default = "default_preload_ahead")]
    pub ahead: u32,

    #[serde(default = "default_preload_stagger_ms")]
    pub stagger_ms: u64,

    #[serde(default = "default_preload_max_document_pages")]
    pub max_document_pages: u32,
}

fn default_preload_ahead() -> u32 {
    3
}

fn default_preload_stagger_ms() -> u64 {
    500
}

fn default_preload_max_document_pages() -> u32 {
    200
}

impl Default for PreloadSettings {
    fn default() -> Self {
        Self {
            policy: PreloadMode::default(),
            ahead: default_preload_ahead(),
            stagger_ms: default_preload_stagger_ms(),
            max_document_pages: default_preload_max_document_pages(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_version")]
    pub version: u32,

    /// Distinct pages kept in the tiered cache
    #[serde(default = "default_page_budget")]
    pub page_budget: usize,

    /// Raster worker threads
    #[serde(default = "default_workers")]
    pub workers: usize,

    #[serde(default = "default_initial_load_delay_ms")]
    pub initial_load_delay_ms: u64,

    #[serde(default)]
    pub escalation: EscalationSettings,

    #[serde(default)]
    pub preload: PreloadSettings,
}

fn default_version() -> u32 {
    CURRENT_VERSION
}

fn default_page_budget() -> usize {
    crate::viewer::DEFAULT_PAGE_BUDGET
}

fn default_workers() -> usize {
    crate::viewer::DEFAULT_WORKERS
}

fn default_initial_load_delay_ms() -> u64 {
    100
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: CURRENT_VERSION,
            page_budget: default_page_budget(),
            workers: default_workers(),
            initial_load_delay_ms: default_initial_load_delay_ms(),
            escalation: EscalationSettings::default(),
            preload: PreloadSettings::default(),
        }
    }
}

impl Settings {
    #[must_use]
    pub fn escalation_policy(&self) -> EscalationPolicy {
        let esc = &self.escalation;
        let settle = Duration::from_millis(esc.settle_after_final_ms);
        EscalationPolicy {
            top_tier: esc.top_tier,
            satisfied_tier: esc.satisfied_tier,
            max_retries: esc.max_retries,
            retry_backoff: Duration::from_millis(esc.retry_backoff_ms),
            settle_after: [
                Duration::from_millis(esc.settle_after_preview_ms),
                Duration::from_millis(esc.settle_after_medium_ms),
                settle,
                settle,
            ],
            crossfade: Duration::from_millis(esc.crossfade_ms),
            attempt_timeout: esc.attempt_timeout_ms.map(Duration::from_millis),
        }
    }

    #[must_use]
    pub fn preload_policy(&self) -> PreloadPolicy {
        PreloadPolicy {
            enabled: self.preload.policy == PreloadMode::Deferred,
            ahead: self.preload.ahead,
            stagger: Duration::from_millis(self.preload.stagger_ms),
            max_document_pages: self.preload.max_document_pages,
        }
    }

    #[must_use]
    pub fn initial_load_delay(&self) -> Duration {
        Duration::from_millis(self.initial_load_delay_ms)
    }

    /// Clamp values that would leave the viewer unable to work
    fn normalize(&mut self) {
        if self.page_budget == 0 {
            warn!("page_budget of 0 is not usable, using 1");
            self.page_budget = 1;
        }
        if self.workers == 0 {
            warn!("workers of 0 is not usable, using 1");
            self.workers = 1;
        }
        if self.escalation.satisfied_tier > self.escalation.top_tier {
            warn!(
                "satisfied_tier {} is above top_tier {}, lowering it",
                self.escalation.satisfied_tier, self.escalation.top_tier
            );
            self.escalation.satisfied_tier = self.escalation.top_tier;
        }
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|config| config.join(APP_NAME).join(SETTINGS_FILENAME))
}

/// Load settings from `explicit` or the default config location.
///
/// A missing file is created with defaults. Unreadable or malformed files
/// are logged and replaced by defaults in memory only.
pub fn load_settings(explicit: Option<&Path>) -> Settings {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => {
            let Some(path) = default_config_path() else {
                warn!("Could not determine config directory, using default settings");
                return Settings::default();
            };
            path
        }
    };

    if !path.exists() {
        info!("Settings file not found, creating with defaults at {path:?}");
        let settings = Settings::default();
        if let Err(e) = save_settings_to_file(&settings, &path) {
            error!("{e}");
        }
        return settings;
    }

    match load_settings_from_path(&path) {
        Ok(settings) => settings,
        Err(e) => {
            error!("{e}");
            Settings::default()
        }
    }
}

pub fn load_settings_from_path(path: &Path) -> Result<Settings, SettingsError> {
    let content = fs::read_to_string(path).map_err(|source| SettingsError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let mut settings =
        serde_yaml::from_str::<Settings>(&content).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
    debug!("Loaded settings from {path:?}");

    if settings.version < CURRENT_VERSION {
        migrate_settings(&mut settings);
        if let Err(e) = save_settings_to_file(&settings, path) {
            error!("{e}");
        }
    }
    settings.normalize();
    Ok(settings)
}

fn migrate_settings(settings: &mut Settings) {
    info!(
        "Migrating settings from v{} to v{}",
        settings.version, CURRENT_VERSION
    );

    // Unversioned files predate per-tier settle delays
    if settings.version == 0 {
        settings.escalation.settle_after_medium_ms = default_settle_after_ms();
        settings.escalation.settle_after_final_ms = default_settle_after_ms();
    }

    settings.version = CURRENT_VERSION;
}

pub fn save_settings_to_file(settings: &Settings, path: &Path) -> Result<(), SettingsError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|source| SettingsError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }
    }

    let content = generate_settings_yaml(settings);
    fs::write(path, content).map_err(|source| SettingsError::Write {
        path: path.to_path_buf(),
        source,
    })?;
    debug!("Saved settings to {path:?}");
    Ok(())
}

fn tier_str(tier: Tier) -> &'static str {
    match tier {
        Tier::Preview => "preview",
        Tier::Medium => "medium",
        Tier::Final => "final",
        Tier::Ultra => "ultra",
    }
}

fn generate_settings_yaml(settings: &Settings) -> String {
    let esc = &settings.escalation;
    let preload = &settings.preload;
    let mut content = String::new();

    content.push_str(&format!("version: {}\n", settings.version));
    content.push_str(&format!("page_budget: {}\n", settings.page_budget));
    content.push_str(&format!("workers: {}\n", settings.workers));
    content.push_str(&format!("initial_load_delay_ms: {}\n", settings.initial_load_delay_ms));
    content.push('\n');

    content.push_str(ESCALATION_TEMPLATE);
    content.push_str("escalation:\n");
    content.push_str(&format!("  top_tier: {}\n", tier_str(esc.top_tier)));
    content.push_str(&format!("  satisfied_tier: {}\n", tier_str(esc.satisfied_tier)));
    content.push_str(&format!("  max_retries: {}\n", esc.max_retries));
    content.push_str(&format!("  retry_backoff_ms: {}\n", esc.retry_backoff_ms));
    content.push_str(&format!("  settle_after_preview_ms: {}\n", esc.settle_after_preview_ms));
    content.push_str(&format!("  settle_after_medium_ms: {}\n", esc.settle_after_medium_ms));
    content.push_str(&format!("  settle_after_final_ms: {}\n", esc.settle_after_final_ms));
    content.push_str(&format!("  crossfade_ms: {}\n", esc.crossfade_ms));
    match esc.attempt_timeout_ms {
        Some(ms) => content.push_str(&format!("  attempt_timeout_ms: {ms}\n")),
        None => content.push_str("  attempt_timeout_ms: null\n"),
    }
    content.push('\n');

    content.push_str(PRELOAD_TEMPLATE);
    content.push_str("preload:\n");
    content.push_str(&format!("  policy: {}\n", preload.policy.as_str()));
    content.push_str(&format!("  ahead: {}\n", preload.ahead));
    content.push_str(&format!("  stagger_ms: {}\n", preload.stagger_ms));
    content.push_str(&format!("  max_document_pages: {}\n", preload.max_document_pages));

    content
}

const ESCALATION_TEMPLATE: &str = r"# ============================================================================
# Quality escalation
# ============================================================================
# Tiers: preview (1x, fast mode), medium (2x), final (4x), ultra (6x).
# A page is walked up to top_tier; revisiting a page cached at
# satisfied_tier or better starts no new work.
# max_retries counts retries after the first failed attempt.
# attempt_timeout_ms: null waits for the rasterizer indefinitely.
";

const PRELOAD_TEMPLATE: &str = r"# ============================================================================
# Preloading
# ============================================================================
# policy: disabled | deferred
# deferred previews the next `ahead` pages once the current page shows,
# staggered by stagger_ms, and only for documents shorter than
# max_document_pages.
";
