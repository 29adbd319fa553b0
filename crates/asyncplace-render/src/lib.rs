//! ASynC Place Render Library
//!
//! Event-driven render loop for the pixel canvas, a CPU raster surface, and
//! derived PNG/SVG exports.

mod export;
mod raster;
mod renderer;

pub use export::{export_png, export_svg, ExportError, MAX_EXPORT_PIXELS};
pub use raster::RasterSurface;
pub use renderer::{render_frame, render_session, FrameStats, RenderContext, Surface};
