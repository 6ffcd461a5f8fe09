use std::path::PathBuf;

use chrono::Utc;
use criterion::*;
use geo::{Coord, MultiPolygon, Rect};
use thermal_flight::{
    boundary::{clean_features, BoundaryFeature, RawGeometry, RawPolygon},
    crs::Crs,
    frame::{Corners, FrameBox, FrameFile},
    hotspot::{detect, worklist},
};

/// A flight line of `count` overlapping frames in MGA zone 50.
fn frame_boxes(count: usize) -> Vec<FrameBox> {
    let crs = Crs::from_epsg(28350).expect("crs");
    (0..count)
        .map(|i| {
            let file =
                FrameFile::with_capture_time(PathBuf::from(format!("{:06}.png", i)), Utc::now())
                    .expect("frame file");
            let x = 391_000. + 250. * i as f64;
            FrameBox::new(&file, &Corners::new(x, 6_465_320., x + 320., 6_465_000.), &crs)
        })
        .collect()
}

/// Small square boundaries scattered along the flight line,
/// every fifth one a bow-tie that needs repair.
fn boundaries(count: usize) -> Vec<BoundaryFeature> {
    (0..count)
        .map(|i| {
            let x = 116.0 + 0.0007 * i as f64;
            let y = -31.9 - 0.0001 * (i % 7) as f64;
            let d = 0.0002;
            let exterior = if i % 5 == 0 {
                vec![(x, y), (x + d, y + d), (x + d, y), (x, y + d), (x, y)]
            } else {
                vec![(x, y), (x + d, y), (x + d, y + d), (x, y + d), (x, y)]
            };
            BoundaryFeature {
                name: format!("{}", i),
                geometry: RawGeometry::Polygon(RawPolygon {
                    exterior: exterior.into_iter().map(|(x, y)| Coord { x, y }).collect(),
                    interiors: vec![],
                }),
            }
        })
        .collect()
}

fn detection(c: &mut Criterion) {
    let boxes = frame_boxes(400);

    c.bench_function("clean_boundaries", |b| {
        b.iter(|| clean_features(boundaries(200).into_iter().map(Ok).collect()))
    });

    let cleaned = clean_features(boundaries(200).into_iter().map(Ok).collect());
    c.bench_function("detect_hotspots", |b| {
        b.iter(|| {
            let hotspots = detect(&cleaned.geometries, &boxes, "20230110_0200").expect("detect");
            worklist(&hotspots)
        })
    });

    let merged: Vec<MultiPolygon<f64>> = (0..50)
        .map(|i| {
            let x = 116.0 + 0.0003 * i as f64;
            MultiPolygon::new(vec![Rect::new(
                Coord { x, y: -31.9 },
                Coord { x: x + 0.0005, y: -31.8995 },
            )
            .to_polygon()])
        })
        .collect();
    c.bench_function("detect_overlapping", |b| {
        b.iter(|| detect(&merged, &boxes, "20230110_0200").expect("detect"))
    });
}

criterion_group! {
    name = detect_bench;
    config = Criterion::default().sample_size(10);
    targets = detection
}

criterion_main!(detect_bench);
