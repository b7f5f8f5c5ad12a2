//! Tarpaulin Processing Library
//!
//! Synchronous image work for the resize worker: a header-only size probe, the
//! derivative tier plan and JPEG rendering. Everything here is CPU-bound and is
//! meant to run on a blocking thread.

pub mod error;
pub mod plan;
pub mod probe;
pub mod render;

pub use error::ProcessingError;
pub use plan::{fit_inside, plan_derivatives};
pub use probe::{probe, ImageProbe};
pub use image::DynamicImage;
pub use render::{
    DerivativeRenderer, RenderedDerivative, DEFAULT_JPEG_QUALITY, DERIVATIVE_CONTENT_TYPE,
};
