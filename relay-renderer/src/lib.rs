//! # relay-renderer
//!
//! Tera-based rendering of human-readable status reports from relay status
//! records.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use relay_core::JobStatus;
//! use relay_renderer::ReportRenderer;
//!
//! fn print_report(status: &JobStatus) {
//!     if let Ok(renderer) = ReportRenderer::new() {
//!         if let Ok(text) = renderer.render_job(status, &["create_workspace"]) {
//!             println!("{text}");
//!         }
//!     }
//! }
//! ```

pub mod context;
pub mod engine;
pub mod error;

pub use context::ReportContext;
pub use engine::ReportRenderer;
pub use error::RenderError;
