//! Perceptual brightness of a single pixel.

/// Perceived brightness of an RGB pixel as a percentage.
///
/// Uses the HSP color model's weighted quadratic mean, which tracks human
/// brightness perception much closer than a plain channel average:
///
/// ```text
/// L = sqrt(0.241 r^2 + 0.691 g^2 + 0.068 b^2) / 255 * 100
/// ```
///
/// Channels are widened to `f64` before squaring so no intermediate
/// overflows or loses precision.
#[must_use]
pub fn luma_percent(r: u8, g: u8, b: u8) -> u8 {
    let r = f64::from(r);
    let g = f64::from(g);
    let b = f64::from(b);

    let perceived = (0.241 * r * r + 0.691 * g * g + 0.068 * b * b).sqrt();
    (perceived / 255.0 * 100.0).round() as u8
}

#[cfg(test)]
mod tests {
    use super::luma_percent;

    #[test]
    fn black_is_zero() {
        assert_eq!(luma_percent(0, 0, 0), 0);
    }

    #[test]
    fn white_is_full() {
        // The HSP weights sum to 1.0, so pure white lands exactly on 100.
        assert_eq!(luma_percent(255, 255, 255), 100);
    }

    #[test]
    fn green_dominates_perception() {
        let g = luma_percent(0, 255, 0);
        let r = luma_percent(255, 0, 0);
        let b = luma_percent(0, 0, 255);
        assert!(g > r);
        assert!(r > b);
    }

    #[test]
    fn mid_gray() {
        // sqrt(128^2) / 255 * 100 = 50.19... -> 50
        assert_eq!(luma_percent(128, 128, 128), 50);
    }
}
