//! Which derivatives an image gets, and at what size.

use crate::probe::ImageProbe;
use tarpaulin_core::DerivativeTier;

/// Tiers to produce for an image, in processing order.
///
/// PNG sources get an `Original` re-encode first. A size tier applies only when
/// the width or the height exceeds its bound.
pub fn plan_derivatives(probe: &ImageProbe, is_png: bool) -> Vec<DerivativeTier> {
    let mut tiers = Vec::with_capacity(DerivativeTier::SIZE_TIERS.len() + 1);
    if is_png {
        tiers.push(DerivativeTier::Original);
    }
    tiers.extend(DerivativeTier::SIZE_TIERS.iter().copied().filter(|tier| {
        tier.bound()
            .is_some_and(|bound| probe.width > bound || probe.height > bound)
    }));
    tiers
}

/// Largest size with the same aspect ratio that fits in a `bound`×`bound` box.
/// Never upscales; each side is at least 1.
pub fn fit_inside(width: u32, height: u32, bound: u32) -> (u32, u32) {
    let longer = width.max(height);
    if longer <= bound || longer == 0 {
        return (width, height);
    }
    let scale = bound as f64 / longer as f64;
    let scaled = |side: u32| ((side as f64 * scale).round() as u32).clamp(1, bound);
    (scaled(width), scaled(height))
}
