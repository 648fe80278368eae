pub mod error;
#[cfg(feature = "pdf")]
pub mod mupdf_backend;
pub mod settings;
pub mod synthetic;
pub mod viewer;

pub use error::ViewerError;
pub use settings::Settings;
pub use viewer::{PageView, Tier, ViewerService, ViewerUpdate};
