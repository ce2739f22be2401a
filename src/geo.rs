//! Position, distance, and heading math shared across tracks, rules, and
//! recognition. Distances use a local equirectangular projection rather
//! than a true ellipsoidal model; fine for the scales this system operates
//! at and much cheaper than full geodesics.

use serde::{Deserialize, Serialize};

/// Longitude/latitude in degrees, altitude in metres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPosition {
    pub lon: f64,
    pub lat: f64,
    pub alt: f64,
}

impl GeoPosition {
    pub fn new(lon: f64, lat: f64, alt: f64) -> Self {
        Self { lon, lat, alt }
    }

    /// Equirectangular-projected horizontal distance in metres, using
    /// `self`'s latitude as the reference parallel.
    pub fn horizontal_distance(&self, other: &GeoPosition) -> f64 {
        let lat_ref = self.lat.to_radians();
        let dx = (other.lon - self.lon) * 111_320.0 * lat_ref.cos();
        let dy = (other.lat - self.lat) * 110_540.0;
        (dx * dx + dy * dy).sqrt()
    }

    pub fn vertical_distance(&self, other: &GeoPosition) -> f64 {
        (other.alt - self.alt).abs()
    }

    /// Projects to local planar (x, y) metres around a reference latitude,
    /// for bounding-box and coverage-area math.
    pub fn project(&self, lat_ref: f64) -> (f64, f64) {
        let x = self.lon * 111_320.0 * lat_ref.to_radians().cos();
        let y = self.lat * 110_540.0;
        (x, y)
    }
}

/// Altitude layer tags, metres.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AltitudeLayer {
    UltraLow,
    Low,
    Medium,
    High,
    VeryHigh,
}

impl AltitudeLayer {
    pub fn of(altitude_m: f64) -> Self {
        if altitude_m < 1000.0 {
            AltitudeLayer::UltraLow
        } else if altitude_m < 3000.0 {
            AltitudeLayer::Low
        } else if altitude_m < 7000.0 {
            AltitudeLayer::Medium
        } else if altitude_m < 12000.0 {
            AltitudeLayer::High
        } else {
            AltitudeLayer::VeryHigh
        }
    }
}

/// Signed angular difference `to - from`, normalised to (-180, 180].
pub fn heading_delta(from: f64, to: f64) -> f64 {
    let mut diff = (to - from) % 360.0;
    if diff <= -180.0 {
        diff += 360.0;
    } else if diff > 180.0 {
        diff -= 360.0;
    }
    diff
}

/// Shortest-arc interpolation between two headings, fraction `f` in [0, 1].
/// Always returns a value in [0, 360).
pub fn heading_interp(h1: f64, h2: f64, f: f64) -> f64 {
    let diff = heading_delta(h1, h2);
    let mut result = (h1 + diff * f) % 360.0;
    if result < 0.0 {
        result += 360.0;
    }
    result
}

/// Circular mean and standard deviation of a set of headings (degrees),
/// via the resultant-vector method. Returns (mean_degrees, std_degrees).
pub fn circular_mean_std(headings_deg: &[f64]) -> (f64, f64) {
    if headings_deg.is_empty() {
        return (0.0, 0.0);
    }
    let n = headings_deg.len() as f64;
    let (sum_sin, sum_cos) = headings_deg.iter().fold((0.0, 0.0), |(s, c), h| {
        let rad = h.to_radians();
        (s + rad.sin(), c + rad.cos())
    });
    let mean_rad = sum_sin.atan2(sum_cos);
    let mut mean_deg = mean_rad.to_degrees();
    if mean_deg < 0.0 {
        mean_deg += 360.0;
    }
    let r = ((sum_sin * sum_sin + sum_cos * sum_cos).sqrt() / n).min(1.0);
    let std_rad = (-2.0 * r.max(1e-10).ln()).sqrt();
    (mean_deg, std_rad.to_degrees())
}

/// Linear mean and sample standard deviation.
pub fn linear_mean_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    if values.len() < 2 {
        return (mean, 0.0);
    }
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    (mean, variance.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn horizontal_distance_is_zero_for_identical_points() {
        let p = GeoPosition::new(116.4, 39.9, 5000.0);
        assert_eq!(p.horizontal_distance(&p), 0.0);
    }

    #[test]
    fn heading_delta_wraps_through_zero() {
        assert_eq!(heading_delta(350.0, 10.0), 20.0);
        assert_eq!(heading_delta(10.0, 350.0), -20.0);
    }

    #[test]
    fn heading_interp_crosses_zero_shortest_arc() {
        let mid = heading_interp(350.0, 10.0, 0.5);
        assert!((mid - 0.0).abs() < 1e-9 || (mid - 360.0).abs() < 1e-9);
    }

    #[test]
    fn heading_interp_always_in_range() {
        for f in [0.0, 0.25, 0.5, 0.75, 1.0] {
            let h = heading_interp(10.0, 200.0, f);
            assert!((0.0..360.0).contains(&h), "h={h} out of range");
        }
    }

    #[test]
    fn altitude_layer_boundaries() {
        assert_eq!(AltitudeLayer::of(999.0), AltitudeLayer::UltraLow);
        assert_eq!(AltitudeLayer::of(1000.0), AltitudeLayer::Low);
        assert_eq!(AltitudeLayer::of(12000.0), AltitudeLayer::VeryHigh);
    }

    #[test]
    fn circular_mean_of_north_south_split_has_high_std() {
        let (_, std) = circular_mean_std(&[0.0, 180.0]);
        assert!(std > 50.0);
    }

    #[test]
    fn circular_mean_of_tight_cluster_has_low_std() {
        let (mean, std) = circular_mean_std(&[88.0, 90.0, 92.0]);
        assert!((mean - 90.0).abs() < 1.0);
        assert!(std < 5.0);
    }
}
