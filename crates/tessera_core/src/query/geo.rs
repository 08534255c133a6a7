//! Geospatial regions for `geoWithin`.
//!
//! Points are `[longitude, latitude]` in degrees on a sphere. Circles
//! measure their radius as a central angle in radians; use
//! [`km_to_radians`] or [`mi_to_radians`] to convert distances.

use std::f64::consts::PI;
use std::fmt;

const EARTH_RADIUS_KM: f64 = 6378.1;
const EARTH_RADIUS_MI: f64 = 3963.2;

/// Converts kilometers along the surface into radians.
#[must_use]
pub fn km_to_radians(km: f64) -> f64 {
    km / EARTH_RADIUS_KM
}

/// Converts miles along the surface into radians.
#[must_use]
pub fn mi_to_radians(mi: f64) -> f64 {
    mi / EARTH_RADIUS_MI
}

/// A point in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPoint {
    /// Longitude, `-180..=180`.
    pub longitude: f64,
    /// Latitude, `-90..=90`.
    pub latitude: f64,
    /// Ignored by containment tests.
    pub altitude: Option<f64>,
}

impl GeoPoint {
    /// A point without altitude.
    #[must_use]
    pub const fn new(longitude: f64, latitude: f64) -> Self {
        Self {
            longitude,
            latitude,
            altitude: None,
        }
    }

    /// Whether longitude and latitude are within range.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.longitude.is_finite()
            && self.latitude.is_finite()
            && (-180.0..=180.0).contains(&self.longitude)
            && (-90.0..=90.0).contains(&self.latitude)
    }

    fn check(&self) -> Result<(), String> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(format!(
                "Longitude/latitude is out of bounds, lng: {} lat: {}",
                self.longitude, self.latitude
            ))
        }
    }

    fn unit(&self) -> Vec3 {
        let (lat, lng) = (self.latitude.to_radians(), self.longitude.to_radians());
        Vec3(lat.cos() * lng.cos(), lat.cos() * lng.sin(), lat.sin())
    }

    fn same_position(&self, other: &GeoPoint) -> bool {
        self.longitude == other.longitude && self.latitude == other.latitude
    }

    /// `[lat, lng]` as used in edge-crossing messages.
    fn degrees_label(&self) -> String {
        format!("[{:.7}, {:.7}]", self.latitude, self.longitude)
    }
}

impl From<[f64; 2]> for GeoPoint {
    fn from([longitude, latitude]: [f64; 2]) -> Self {
        Self::new(longitude, latitude)
    }
}

impl fmt::Display for GeoPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.altitude {
            Some(alt) => write!(f, "GeoPoint([{}, {}, {}])", self.longitude, self.latitude, alt),
            None => write!(f, "GeoPoint([{}, {}])", self.longitude, self.latitude),
        }
    }
}

/// A region a point can be tested against.
#[derive(Debug, Clone, PartialEq)]
pub enum GeoRegion {
    /// All points within `distance` radians of `center`.
    Circle {
        /// Center.
        center: GeoPoint,
        /// Radius in radians.
        distance: f64,
    },
    /// A latitude/longitude rectangle.
    Box {
        /// South-west corner.
        bottom_left: GeoPoint,
        /// North-east corner.
        top_right: GeoPoint,
    },
    /// A polygon with optional holes. Every ring must be closed (first
    /// vertex repeated at the end).
    Polygon {
        /// Outer boundary.
        outer_ring: Vec<GeoPoint>,
        /// Areas excluded from the polygon.
        holes: Vec<Vec<GeoPoint>>,
    },
}

impl GeoRegion {
    /// A circle around `[lng, lat]`.
    #[must_use]
    pub fn circle(center: impl Into<GeoPoint>, distance: f64) -> Self {
        Self::Circle {
            center: center.into(),
            distance,
        }
    }

    /// A box from its south-west and north-east corners.
    #[must_use]
    pub fn rect(bottom_left: impl Into<GeoPoint>, top_right: impl Into<GeoPoint>) -> Self {
        Self::Box {
            bottom_left: bottom_left.into(),
            top_right: top_right.into(),
        }
    }

    /// A polygon without holes.
    #[must_use]
    pub fn polygon(outer_ring: Vec<GeoPoint>) -> Self {
        Self::Polygon {
            outer_ring,
            holes: Vec::new(),
        }
    }

    /// Checks the region, returning the reason it is unusable.
    pub(crate) fn validate(&self) -> Result<(), String> {
        match self {
            GeoRegion::Circle { center, distance } => {
                center.check()?;
                if distance.is_nan() || *distance < 0.0 {
                    return Err("The radius of a circle must be a non-negative number".into());
                }
                Ok(())
            }
            GeoRegion::Box {
                bottom_left,
                top_right,
            } => {
                bottom_left.check()?;
                top_right.check()
            }
            GeoRegion::Polygon { outer_ring, holes } => {
                for (i, ring) in std::iter::once(outer_ring).chain(holes).enumerate() {
                    validate_ring(i, ring)?;
                }
                Ok(())
            }
        }
    }

    /// Whether `point` lies inside the region. Invalid points never match.
    #[must_use]
    pub fn contains(&self, point: &GeoPoint) -> bool {
        if !point.is_valid() {
            return false;
        }
        match self {
            GeoRegion::Circle { center, distance } => {
                central_angle(center, point) <= *distance
            }
            GeoRegion::Box {
                bottom_left,
                top_right,
            } => {
                let lat_ok = (bottom_left.latitude..=top_right.latitude).contains(&point.latitude);
                let lng_ok = if bottom_left.longitude <= top_right.longitude {
                    (bottom_left.longitude..=top_right.longitude).contains(&point.longitude)
                } else {
                    // Crosses the antimeridian.
                    point.longitude >= bottom_left.longitude || point.longitude <= top_right.longitude
                };
                lat_ok && lng_ok
            }
            GeoRegion::Polygon { outer_ring, holes } => {
                ring_contains(outer_ring, point) && !holes.iter().any(|h| ring_contains(h, point))
            }
        }
    }
}

fn validate_ring(index: usize, ring: &[GeoPoint]) -> Result<(), String> {
    for p in ring {
        p.check()?;
    }
    let (Some(first), Some(last)) = (ring.first(), ring.last()) else {
        return Err(format!("Ring {index} is not valid: 'Ring is empty"));
    };
    if !first.same_position(last) {
        return Err(format!(
            "Ring is not closed, first vertex '{first}' does not equal last vertex '{last}"
        ));
    }
    if ring.len() < 4 {
        return Err(format!(
            "Ring {index} is not valid: 'Loop must have at least 3 different vertices"
        ));
    }
    let edges = ring.len() - 1;
    for i in 0..edges {
        for j in i + 2..edges {
            // The first and last edges share the closing vertex.
            if i == 0 && j == edges - 1 {
                continue;
            }
            let (a0, a1) = (&ring[i], &ring[i + 1]);
            let (b0, b1) = (&ring[j], &ring[j + 1]);
            if arcs_cross(a0, a1, b0, b1) {
                return Err(format!(
                    "Ring {index} is not valid: 'Edges {i} and {j} cross. Edge locations in degrees: {}-{} and {}-{}",
                    a0.degrees_label(),
                    a1.degrees_label(),
                    b0.degrees_label(),
                    b1.degrees_label()
                ));
            }
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy)]
struct Vec3(f64, f64, f64);

impl Vec3 {
    fn dot(self, o: Vec3) -> f64 {
        self.0 * o.0 + self.1 * o.1 + self.2 * o.2
    }

    fn cross(self, o: Vec3) -> Vec3 {
        Vec3(
            self.1 * o.2 - self.2 * o.1,
            self.2 * o.0 - self.0 * o.2,
            self.0 * o.1 - self.1 * o.0,
        )
    }

    fn scale(self, k: f64) -> Vec3 {
        Vec3(self.0 * k, self.1 * k, self.2 * k)
    }

    fn sub(self, o: Vec3) -> Vec3 {
        Vec3(self.0 - o.0, self.1 - o.1, self.2 - o.2)
    }

    fn norm(self) -> f64 {
        self.dot(self).sqrt()
    }
}

/// Great-circle distance in radians (haversine).
fn central_angle(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let (lat1, lat2) = (a.latitude.to_radians(), b.latitude.to_radians());
    let dlat = lat2 - lat1;
    let dlng = (b.longitude - a.longitude).to_radians();
    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);
    2.0 * h.sqrt().min(1.0).asin()
}

/// Whether `q` lies on the minor arc `a0`-`a1` whose plane normal is `n`.
fn on_arc(a0: Vec3, a1: Vec3, n: Vec3, q: Vec3) -> bool {
    a0.cross(q).dot(n) >= 0.0 && q.cross(a1).dot(n) >= 0.0
}

/// Whether two great-circle edges intersect at a point interior to both.
fn arcs_cross(a0: &GeoPoint, a1: &GeoPoint, b0: &GeoPoint, b1: &GeoPoint) -> bool {
    let (a0, a1, b0, b1) = (a0.unit(), a1.unit(), b0.unit(), b1.unit());
    let na = a0.cross(a1);
    let nb = b0.cross(b1);
    let (s0, s1) = (na.dot(b0), na.dot(b1));
    let (t0, t1) = (nb.dot(a0), nb.dot(a1));
    if s0 * s1 >= 0.0 || t0 * t1 >= 0.0 {
        return false;
    }
    let p = na.cross(nb);
    if p.norm() == 0.0 {
        return false;
    }
    [p, p.scale(-1.0)]
        .into_iter()
        .any(|q| on_arc(a0, a1, na, q) && on_arc(b0, b1, nb, q))
}

/// Winding test on the sphere: the signed angles subtended at `point` by
/// each edge sum to ±2π inside the ring and to 0 outside.
fn ring_contains(ring: &[GeoPoint], point: &GeoPoint) -> bool {
    let p = point.unit();
    let tangent = |v: Vec3| v.sub(p.scale(v.dot(p)));
    let mut total = 0.0;
    for pair in ring.windows(2) {
        let (a, b) = (pair[0].unit(), pair[1].unit());
        if (a.sub(p)).norm() < 1e-12 || (b.sub(p)).norm() < 1e-12 {
            // On a vertex.
            return true;
        }
        let (ta, tb) = (tangent(a), tangent(b));
        total += ta.cross(tb).dot(p).atan2(ta.dot(tb));
    }
    total.abs() > PI
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pt(lng: f64, lat: f64) -> GeoPoint {
        GeoPoint::new(lng, lat)
    }

    fn ring(points: &[[f64; 2]]) -> Vec<GeoPoint> {
        points.iter().map(|&p| GeoPoint::from(p)).collect()
    }

    #[test]
    fn circle_uses_radians() {
        let circle = GeoRegion::circle([0.0, 0.0], 0.001);
        assert!(circle.contains(&pt(0.0, 0.0)));
        assert!(!circle.contains(&pt(1.0, 1.0)));
        let wide = GeoRegion::circle([2.34, -4.6], 1.5);
        assert!(wide.contains(&pt(40.0, 30.0)));
        assert!(km_to_radians(6378.1) - 1.0 < 1e-12);
        assert!(mi_to_radians(3963.2) - 1.0 < 1e-12);
    }

    #[test]
    fn box_bounds_are_inclusive() {
        let region = GeoRegion::rect([-1.0, -1.0], [1.0, 1.0]);
        assert!(region.contains(&pt(1.0, 1.0)));
        assert!(region.contains(&pt(0.0, 0.0)));
        assert!(!region.contains(&pt(1.5, 0.0)));
    }

    #[test]
    fn polygon_with_hole_in_either_orientation() {
        let outer = ring(&[[-44.0, -44.0], [44.0, -44.0], [44.0, 44.0], [-44.0, 44.0], [-44.0, -44.0]]);
        let hole = ring(&[[-1.0, -1.0], [-1.0, 1.0], [1.0, 1.0], [1.0, -1.0], [-1.0, -1.0]]);
        let region = GeoRegion::Polygon {
            outer_ring: outer.clone(),
            holes: vec![hole],
        };
        region.validate().unwrap();
        assert!(region.contains(&pt(10.0, 10.0)));
        assert!(!region.contains(&pt(0.0, 0.0)));
        assert!(!region.contains(&pt(60.0, 0.0)));

        let reversed: Vec<GeoPoint> = outer.into_iter().rev().collect();
        assert!(GeoRegion::polygon(reversed).contains(&pt(10.0, 10.0)));
    }

    #[test]
    fn invalid_points_never_match() {
        let region = GeoRegion::rect([-180.0, -90.0], [180.0, 90.0]);
        assert!(!region.contains(&pt(2129.01, 89.9)));
    }

    #[test]
    fn validation_messages() {
        assert_eq!(
            GeoRegion::circle([-32.34, -25.0], -1.5).validate().unwrap_err(),
            "The radius of a circle must be a non-negative number"
        );
        assert_eq!(
            GeoRegion::circle([-200.0, 200.0], 1.5).validate().unwrap_err(),
            "Longitude/latitude is out of bounds, lng: -200 lat: 200"
        );
        let open = GeoRegion::polygon(ring(&[[50.0, -50.0], [55.0, 55.0], [-50.0, 50.0], [70.0, -25.0]]));
        assert_eq!(
            open.validate().unwrap_err(),
            "Ring is not closed, first vertex 'GeoPoint([50, -50])' does not equal last vertex 'GeoPoint([70, -25])"
        );
        let crossing = GeoRegion::polygon(ring(&[
            [50.0, -50.0],
            [55.0, 55.0],
            [-50.0, 50.0],
            [70.0, -25.0],
            [50.0, -50.0],
        ]));
        assert_eq!(
            crossing.validate().unwrap_err(),
            "Ring 0 is not valid: 'Edges 0 and 2 cross. Edge locations in degrees: [-50.0000000, 50.0000000]-[55.0000000, 55.0000000] and [50.0000000, -50.0000000]-[-25.0000000, 70.0000000]"
        );
    }
}
