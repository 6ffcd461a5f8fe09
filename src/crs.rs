//! Coordinate reference systems used by flights.
//!
//! Frames are captured in a projected grid (GDA94 / MGA or
//! WGS84 / UTM zones) while every persisted geometry lives
//! in geographic coordinates (EPSG:4326, `x` = longitude,
//! `y` = latitude). Only the transverse mercator grids the
//! cameras actually emit are supported; GDA94 and WGS84
//! are treated as the same datum (they differ by about a
//! metre, far below a frame's footprint).
//!
//! The projection follows the series expansion in Snyder,
//! *Map Projections: A Working Manual* (USGS 1395), §8.
use anyhow::{bail, Result};
use geo::{Coord, LineString, MapCoords, Polygon};

/// GRS80 semi-major axis (m).
const SEMI_MAJOR: f64 = 6_378_137.0;
/// GRS80 inverse flattening.
const INVERSE_FLATTENING: f64 = 298.257_222_101;

const SCALE_FACTOR: f64 = 0.9996;
const FALSE_EASTING: f64 = 500_000.0;
const FALSE_NORTHING_SOUTH: f64 = 10_000_000.0;

/// EPSG code of the CRS all output geometries are stored in.
pub const OUTPUT_EPSG: u32 = 4326;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Hemisphere {
    North,
    South,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Crs {
    /// Latitude / longitude in degrees.
    Geographic { epsg: u32 },
    /// Transverse mercator zone of width 6°.
    Utm {
        epsg: u32,
        zone: u8,
        hemisphere: Hemisphere,
    },
}

impl Crs {
    pub fn from_epsg(epsg: u32) -> Result<Self> {
        Ok(match epsg {
            4326 | 4283 | 7844 => Crs::Geographic { epsg },
            28348..=28358 => Crs::Utm {
                epsg,
                zone: (epsg - 28300) as u8,
                hemisphere: Hemisphere::South,
            },
            32701..=32760 => Crs::Utm {
                epsg,
                zone: (epsg - 32700) as u8,
                hemisphere: Hemisphere::South,
            },
            32601..=32660 => Crs::Utm {
                epsg,
                zone: (epsg - 32600) as u8,
                hemisphere: Hemisphere::North,
            },
            _ => bail!("unsupported source CRS: EPSG:{}", epsg),
        })
    }

    pub fn epsg(&self) -> u32 {
        match *self {
            Crs::Geographic { epsg } | Crs::Utm { epsg, .. } => epsg,
        }
    }

    /// Convert a coordinate of this CRS to longitude / latitude.
    pub fn to_geographic(&self, c: Coord<f64>) -> Coord<f64> {
        match *self {
            Crs::Geographic { .. } => c,
            Crs::Utm {
                zone, hemisphere, ..
            } => TransverseMercator::zone(zone, hemisphere).inverse(c),
        }
    }

    /// Convert longitude / latitude to this CRS.
    pub fn from_geographic(&self, c: Coord<f64>) -> Coord<f64> {
        match *self {
            Crs::Geographic { .. } => c,
            Crs::Utm {
                zone, hemisphere, ..
            } => TransverseMercator::zone(zone, hemisphere).forward(c),
        }
    }

    pub fn polygon_to_geographic(&self, poly: &Polygon<f64>) -> Polygon<f64> {
        poly.map_coords(|c| self.to_geographic(c))
    }

    pub fn line_to_geographic(&self, line: &LineString<f64>) -> LineString<f64> {
        line.map_coords(|c| self.to_geographic(c))
    }
}

struct TransverseMercator {
    central_meridian: f64,
    false_northing: f64,
    e2: f64,
    ep2: f64,
}

impl TransverseMercator {
    fn zone(zone: u8, hemisphere: Hemisphere) -> Self {
        let f = 1. / INVERSE_FLATTENING;
        let e2 = f * (2. - f);
        TransverseMercator {
            central_meridian: (-183. + 6. * zone as f64).to_radians(),
            false_northing: match hemisphere {
                Hemisphere::North => 0.,
                Hemisphere::South => FALSE_NORTHING_SOUTH,
            },
            e2,
            ep2: e2 / (1. - e2),
        }
    }

    // M: distance along the meridian from the equator to `phi`
    fn meridian_arc(&self, phi: f64) -> f64 {
        let e2 = self.e2;
        let e4 = e2 * e2;
        let e6 = e4 * e2;
        SEMI_MAJOR
            * ((1. - e2 / 4. - 3. * e4 / 64. - 5. * e6 / 256.) * phi
                - (3. * e2 / 8. + 3. * e4 / 32. + 45. * e6 / 1024.) * (2. * phi).sin()
                + (15. * e4 / 256. + 45. * e6 / 1024.) * (4. * phi).sin()
                - (35. * e6 / 3072.) * (6. * phi).sin())
    }

    fn forward(&self, c: Coord<f64>) -> Coord<f64> {
        let phi = c.y.to_radians();
        let lambda = c.x.to_radians();
        let (sin_phi, cos_phi) = phi.sin_cos();

        let n = SEMI_MAJOR / (1. - self.e2 * sin_phi * sin_phi).sqrt();
        let t = phi.tan().powi(2);
        let cc = self.ep2 * cos_phi * cos_phi;
        let a = (lambda - self.central_meridian) * cos_phi;
        let m = self.meridian_arc(phi);

        let x = SCALE_FACTOR
            * n
            * (a + (1. - t + cc) * a.powi(3) / 6.
                + (5. - 18. * t + t * t + 72. * cc - 58. * self.ep2) * a.powi(5) / 120.);
        let y = SCALE_FACTOR
            * (m + n
                * phi.tan()
                * (a * a / 2.
                    + (5. - t + 9. * cc + 4. * cc * cc) * a.powi(4) / 24.
                    + (61. - 58. * t + t * t + 600. * cc - 330. * self.ep2) * a.powi(6) / 720.));

        Coord {
            x: x + FALSE_EASTING,
            y: y + self.false_northing,
        }
    }

    fn inverse(&self, c: Coord<f64>) -> Coord<f64> {
        let e2 = self.e2;
        let x = c.x - FALSE_EASTING;
        let m = (c.y - self.false_northing) / SCALE_FACTOR;

        let mu = m / (SEMI_MAJOR * (1. - e2 / 4. - 3. * e2 * e2 / 64. - 5. * e2.powi(3) / 256.));
        let e1 = (1. - (1. - e2).sqrt()) / (1. + (1. - e2).sqrt());
        let phi1 = mu
            + (3. * e1 / 2. - 27. * e1.powi(3) / 32.) * (2. * mu).sin()
            + (21. * e1 * e1 / 16. - 55. * e1.powi(4) / 32.) * (4. * mu).sin()
            + (151. * e1.powi(3) / 96.) * (6. * mu).sin()
            + (1097. * e1.powi(4) / 512.) * (8. * mu).sin();

        let (sin1, cos1) = phi1.sin_cos();
        let tan1 = phi1.tan();
        let c1 = self.ep2 * cos1 * cos1;
        let t1 = tan1 * tan1;
        let w = 1. - e2 * sin1 * sin1;
        let n1 = SEMI_MAJOR / w.sqrt();
        let r1 = SEMI_MAJOR * (1. - e2) / w.powf(1.5);
        let d = x / (n1 * SCALE_FACTOR);

        let phi = phi1
            - (n1 * tan1 / r1)
                * (d * d / 2.
                    - (5. + 3. * t1 + 10. * c1 - 4. * c1 * c1 - 9. * self.ep2) * d.powi(4) / 24.
                    + (61. + 90. * t1 + 298. * c1 + 45. * t1 * t1
                        - 252. * self.ep2
                        - 3. * c1 * c1)
                        * d.powi(6)
                        / 720.);
        let lambda = self.central_meridian
            + (d - (1. + 2. * t1 + c1) * d.powi(3) / 6.
                + (5. - 2. * c1 + 28. * t1 - 3. * c1 * c1 + 8. * self.ep2 + 24. * t1 * t1)
                    * d.powi(5)
                    / 120.)
                / cos1;

        Coord {
            x: lambda.to_degrees(),
            y: phi.to_degrees(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_supported_codes() -> Result<()> {
        assert_eq!(
            Crs::from_epsg(28350)?,
            Crs::Utm {
                epsg: 28350,
                zone: 50,
                hemisphere: Hemisphere::South
            }
        );
        assert_eq!(Crs::from_epsg(4283)?, Crs::Geographic { epsg: 4283 });
        assert!(Crs::from_epsg(3857).is_err());
        Ok(())
    }

    #[test]
    fn central_meridian_maps_to_false_easting() -> Result<()> {
        let crs = Crs::from_epsg(28350)?;
        let ll = crs.to_geographic(Coord {
            x: 500_000.,
            y: 6_460_000.,
        });
        assert!((ll.x - 117.).abs() < 1e-9, "lon = {}", ll.x);
        assert!(ll.y < -31. && ll.y > -33., "lat = {}", ll.y);

        let equator = crs.to_geographic(Coord {
            x: 500_000.,
            y: 10_000_000.,
        });
        assert!(equator.y.abs() < 1e-9);
        Ok(())
    }

    #[test]
    fn round_trips_within_zone() -> Result<()> {
        let crs = Crs::from_epsg(28350)?;
        for &(e, n) in &[(391_000., 6_465_000.), (612_345., 6_120_000.), (455_500., 7_000_000.)] {
            let ll = crs.to_geographic(Coord { x: e, y: n });
            let back = crs.from_geographic(ll);
            assert!((back.x - e).abs() < 5e-2, "{} vs {}", back.x, e);
            assert!((back.y - n).abs() < 5e-2, "{} vs {}", back.y, n);
        }
        Ok(())
    }

    #[test]
    fn geographic_is_identity() -> Result<()> {
        let crs = Crs::from_epsg(4326)?;
        let c = Coord { x: 116.1, y: -31.9 };
        assert_eq!(crs.to_geographic(c), c);
        Ok(())
    }
}
