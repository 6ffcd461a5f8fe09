//! Extract placemark polygons from KML boundary files.
//!
//! The mosaicking software writes flat KML: one
//! `Placemark` per candidate region holding a `Polygon` or a
//! `MultiGeometry` of polygons. This is not a general KML
//! reader, only enough of one to recover those rings, so we
//! do not pull in an XML stack for it.
use anyhow::{bail, Context, Result};
use geo::Coord;
use lazy_static::lazy_static;
use regex::Regex;

use crate::boundary::{BoundaryFeature, RawGeometry, RawPolygon};

lazy_static! {
    static ref PLACEMARK: Regex = Regex::new(r"(?s)<Placemark\b[^>]*>(.*?)</Placemark>").unwrap();
    static ref NAME: Regex = Regex::new(r"(?s)<name>\s*(.*?)\s*</name>").unwrap();
    static ref POLYGON: Regex = Regex::new(r"(?s)<Polygon\b[^>]*>(.*?)</Polygon>").unwrap();
    static ref OUTER: Regex = Regex::new(
        r"(?s)<outerBoundaryIs>\s*<LinearRing\b[^>]*>.*?<coordinates>(.*?)</coordinates>"
    )
    .unwrap();
    static ref INNER: Regex = Regex::new(
        r"(?s)<innerBoundaryIs>\s*<LinearRing\b[^>]*>.*?<coordinates>(.*?)</coordinates>"
    )
    .unwrap();
    static ref OTHER_GEOMETRY: Regex =
        Regex::new(r"<(Point|LineString|Model|Track|gx:Track)\b").unwrap();
}

/// Parse every placemark of a KML document. Placemarks
/// that fail to parse are returned as errors in place so the
/// caller can skip them individually.
pub fn parse_placemarks(text: &str) -> Vec<Result<BoundaryFeature>> {
    PLACEMARK
        .captures_iter(text)
        .enumerate()
        .map(|(idx, cap)| {
            let body = &cap[1];
            let name = NAME
                .captures(body)
                .map(|c| c[1].to_string())
                .unwrap_or_else(|| format!("placemark {}", idx + 1));
            parse_geometry(body)
                .with_context(|| format!("placemark `{}`", name))
                .map(|geometry| BoundaryFeature { name, geometry })
        })
        .collect()
}

fn parse_geometry(body: &str) -> Result<RawGeometry> {
    let polygons = POLYGON
        .captures_iter(body)
        .map(|cap| parse_polygon(&cap[1]))
        .collect::<Result<Vec<_>>>()?;

    Ok(match polygons.len() {
        0 => match OTHER_GEOMETRY.captures(body) {
            Some(cap) => RawGeometry::Other(cap[1].to_string()),
            None => RawGeometry::Missing,
        },
        1 => RawGeometry::Polygon(polygons.into_iter().next().unwrap_or_default()),
        _ => RawGeometry::MultiPolygon(polygons),
    })
}

fn parse_polygon(body: &str) -> Result<RawPolygon> {
    let exterior = match OUTER.captures(body) {
        Some(cap) => parse_coordinates(&cap[1])?,
        None => bail!("polygon without outer boundary"),
    };
    let interiors = INNER
        .captures_iter(body)
        .map(|cap| parse_coordinates(&cap[1]))
        .collect::<Result<_>>()?;
    Ok(RawPolygon {
        exterior,
        interiors,
    })
}

/// `lon,lat[,alt]` tuples separated by whitespace.
fn parse_coordinates(text: &str) -> Result<Vec<Coord<f64>>> {
    text.split_whitespace()
        .map(|tuple| {
            let mut parts = tuple.split(',').map(|v| v.parse::<f64>());
            match (parts.next(), parts.next()) {
                (Some(Ok(x)), Some(Ok(y))) => Ok(Coord { x, y }),
                _ => bail!("invalid coordinate tuple `{}`", tuple),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<kml xmlns="http://www.opengis.net/kml/2.2">
<Document>
  <Placemark>
    <name>1</name>
    <Polygon><outerBoundaryIs><LinearRing><coordinates>
      116.0,-32.0,0 116.1,-32.0,0 116.1,-32.1,0 116.0,-32.0,0
    </coordinates></LinearRing></outerBoundaryIs>
    <innerBoundaryIs><LinearRing><coordinates>116.02,-32.02 116.03,-32.02 116.03,-32.03 116.02,-32.02</coordinates></LinearRing></innerBoundaryIs>
    </Polygon>
  </Placemark>
  <Placemark>
    <name>2</name>
    <MultiGeometry>
      <Polygon><outerBoundaryIs><LinearRing><coordinates>0,0 1,0 1,1 0,0</coordinates></LinearRing></outerBoundaryIs></Polygon>
      <Polygon><outerBoundaryIs><LinearRing><coordinates>5,5 6,5 6,6 5,5</coordinates></LinearRing></outerBoundaryIs></Polygon>
    </MultiGeometry>
  </Placemark>
  <Placemark><name>pin</name><Point><coordinates>116.0,-32.0</coordinates></Point></Placemark>
  <Placemark><name>empty</name></Placemark>
  <Placemark><name>broken</name><Polygon><outerBoundaryIs><LinearRing><coordinates>1,x 2,3</coordinates></LinearRing></outerBoundaryIs></Polygon></Placemark>
</Document>
</kml>"#;

    #[test]
    fn parses_placemark_kinds() {
        let features = parse_placemarks(DOC);
        assert_eq!(features.len(), 5);

        match &features[0].as_ref().unwrap().geometry {
            RawGeometry::Polygon(p) => {
                assert_eq!(p.exterior.len(), 4);
                assert_eq!(p.exterior[1], Coord { x: 116.1, y: -32.0 });
                assert_eq!(p.interiors.len(), 1);
            }
            other => panic!("unexpected {:?}", other),
        }
        match &features[1].as_ref().unwrap().geometry {
            RawGeometry::MultiPolygon(ps) => assert_eq!(ps.len(), 2),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(
            features[2].as_ref().unwrap().geometry,
            RawGeometry::Other("Point".to_string())
        );
        assert_eq!(features[3].as_ref().unwrap().geometry, RawGeometry::Missing);
        assert!(features[4].is_err());
    }
}
