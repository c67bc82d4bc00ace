//! Application entry point for the canopy viewer.
//!
//! This binary sets up logging and eframe/egui and delegates all
//! interactive logic and rendering to [`Viewer`] from the `viewer` module.

mod viewer;

use tracing_subscriber::EnvFilter;
use viewer::Viewer;

/// Starts the native eframe application.
///
/// Log output goes to stderr, filtered by `RUST_LOG` (default `info`).
/// Set `RUST_LOG=canopy_core=debug` to see a line per tree-year.
///
/// ### Returns
/// - `Ok(())` if the application runs to completion without errors.
/// - `Err` if the initial simulation cannot be built, or eframe fails to
///   create the native window or event loop.
fn main() -> eframe::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let options = eframe::NativeOptions::default();

    eframe::run_native(
        "Canopy",
        options,
        Box::new(|_cc| Ok(Box::new(Viewer::new()?))),
    )
}
