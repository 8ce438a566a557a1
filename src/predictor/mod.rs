//! Backlight prediction from recorded preferences.
//!
//! A query `(lux, luma)` is answered from its three nearest recorded points
//! under a normalized Euclidean metric, by intersecting the vertical line
//! at the query with the plane those three points span in
//! `(lux, luma, backlight)` space. The plane acts as a local linear model
//! of the user's preference surface; the lux axis is rescaled so the full
//! observed lux range spans the same numeric extent as the 0..100 luma
//! axis, making comparable deltas on either axis contribute equally.

use crate::store::{DataPoint, PreferenceStore};

/// Predict the backlight percentage for the current conditions.
///
/// Returns `None` when the store is empty (the controller never asks in
/// that state); otherwise the result is always in `1..=100`. With fewer
/// than three recorded points, or when the neighbor plane is degenerate or
/// vertical, the nearest neighbor's own backlight is returned instead.
#[must_use]
pub fn predict(store: &PreferenceStore, lux: u32, luma: u8) -> Option<u8> {
    let lux = lux.min(store.max_seen_lux());

    match nearest_three(store, lux, luma) {
        [Some(n1), Some(n2), Some(n3)] => {
            let height = plane_height(n1, n2, n3, f64::from(lux), f64::from(luma))
                .unwrap_or_else(|| f64::from(n1.backlight));
            Some(height.round().clamp(1.0, 100.0) as u8)
        }
        [Some(n1), _, _] => Some(n1.backlight),
        _ => None,
    }
}

/// The three closest points to `(lux, luma)`, nearest first.
///
/// Distance ties keep the earlier-seen point in the earlier slot.
fn nearest_three(store: &PreferenceStore, lux: u32, luma: u8) -> [Option<&DataPoint>; 3] {
    let max_seen = f64::from(store.max_seen_lux());
    let mut nearest: [Option<(f64, &DataPoint)>; 3] = [None; 3];

    for point in store.points() {
        let dl = (f64::from(lux) - f64::from(point.lux)) * 100.0 / max_seen;
        let dm = f64::from(luma) - f64::from(point.luma);
        let distance = (dl * dl + dm * dm).sqrt();

        for slot in 0..nearest.len() {
            if nearest[slot].map_or(true, |(best, _)| distance < best) {
                for vacated in (slot + 1..nearest.len()).rev() {
                    nearest[vacated] = nearest[vacated - 1];
                }
                nearest[slot] = Some((distance, point));
                break;
            }
        }
    }

    nearest.map(|entry| entry.map(|(_, point)| point))
}

/// Height of the plane through `p1..p3` above the query `(x, y)`.
///
/// `None` when the three points are collinear or their plane contains the
/// vertical direction, in which case no single height exists.
fn plane_height(p1: &DataPoint, p2: &DataPoint, p3: &DataPoint, x: f64, y: f64) -> Option<f64> {
    let a = as_vec3(p1);
    let b = as_vec3(p2);
    let c = as_vec3(p3);

    let u = [b[0] - a[0], b[1] - a[1], b[2] - a[2]];
    let v = [c[0] - a[0], c[1] - a[1], c[2] - a[2]];
    let normal = [
        u[1] * v[2] - u[2] * v[1],
        u[2] * v[0] - u[0] * v[2],
        u[0] * v[1] - u[1] * v[0],
    ];

    let length = (normal[0] * normal[0] + normal[1] * normal[1] + normal[2] * normal[2]).sqrt();
    if length == 0.0 {
        return None;
    }
    let normal = [normal[0] / length, normal[1] / length, normal[2] / length];

    // The query line runs along (0, 0, 1); a normal orthogonal to it means
    // the line is parallel to the plane.
    if normal[2].abs() <= f64::EPSILON {
        return None;
    }

    Some(a[2] - (normal[0] * (x - a[0]) + normal[1] * (y - a[1])) / normal[2])
}

fn as_vec3(p: &DataPoint) -> [f64; 3] {
    [
        f64::from(p.lux),
        f64::from(p.luma),
        f64::from(p.backlight),
    ]
}
