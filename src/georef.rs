//! Read the affine georeferencing of a raster.
//!
//! Frames exported by the camera software are plain PNGs
//! georeferenced by a sidecar file; mosaics and converted
//! frames are GeoTIFFs. The transform is kept in GDAL
//! order: `(ulx, xres, xskew, uly, yskew, yres)`, with the
//! origin at the outer corner of the upper-left pixel.
use std::{
    fs::{read_to_string, File},
    io::BufReader,
    path::{Path, PathBuf},
};

use anyhow::{anyhow, bail, ensure, Context, Result};
use lazy_static::lazy_static;
use regex::Regex;
use tiff::{decoder::Decoder, tags::Tag};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GeoTransform {
    pub ulx: f64,
    pub xres: f64,
    pub xskew: f64,
    pub uly: f64,
    pub yskew: f64,
    pub yres: f64,
}

impl GeoTransform {
    pub fn from_gdal(coeffs: [f64; 6]) -> Self {
        let [ulx, xres, xskew, uly, yskew, yres] = coeffs;
        GeoTransform {
            ulx,
            xres,
            xskew,
            uly,
            yskew,
            yres,
        }
    }

    pub fn to_gdal(&self) -> [f64; 6] {
        [
            self.ulx, self.xres, self.xskew, self.uly, self.yskew, self.yres,
        ]
    }

    /// Locate and read the transform of the raster at `path`.
    ///
    /// GeoTIFF model tags win over sidecars; sidecars are
    /// tried in the order GDAL would use them: `.aux.xml`,
    /// then the world file variants.
    pub fn read_for(path: &Path) -> Result<Self> {
        if is_tiff(path) {
            if let Some(gt) = Self::from_geotiff(path)? {
                return Ok(gt);
            }
        }

        let aux = append_extension(path, "aux.xml");
        if aux.is_file() {
            return Self::from_aux_xml(&read_to_string(&aux)?)
                .with_context(|| format!("parsing {}", aux.display()));
        }

        for candidate in world_file_candidates(path) {
            if candidate.is_file() {
                return Self::from_world_file(&read_to_string(&candidate)?)
                    .with_context(|| format!("parsing {}", candidate.display()));
            }
        }

        bail!("no georeferencing found for {}", path.display())
    }

    /// Parse the `<GeoTransform>` element of a GDAL PAM
    /// (`.aux.xml`) sidecar.
    pub fn from_aux_xml(xml: &str) -> Result<Self> {
        lazy_static! {
            static ref RE: Regex = Regex::new(r"(?s)<GeoTransform>\s*([^<]+?)\s*</GeoTransform>").unwrap();
        }
        let body = RE
            .captures(xml)
            .and_then(|c| c.get(1))
            .ok_or_else(|| anyhow!("no <GeoTransform> element"))?
            .as_str();
        let values = parse_floats(body.split(','))?;
        Ok(Self::from_gdal(six(&values)?))
    }

    /// Parse an ESRI world file. World files reference the
    /// centre of the upper-left pixel, so the origin is
    /// shifted by half a pixel.
    pub fn from_world_file(text: &str) -> Result<Self> {
        let values = parse_floats(text.split_whitespace())?;
        let [a, d, b, e, c, f] = six(&values)?;
        Ok(GeoTransform {
            ulx: c - a / 2. - b / 2.,
            xres: a,
            xskew: b,
            uly: f - d / 2. - e / 2.,
            yskew: d,
            yres: e,
        })
    }

    pub fn to_world_file(&self) -> String {
        let c = self.ulx + self.xres / 2. + self.xskew / 2.;
        let f = self.uly + self.yskew / 2. + self.yres / 2.;
        format!(
            "{}\n{}\n{}\n{}\n{}\n{}\n",
            self.xres, self.yskew, self.xskew, self.yres, c, f
        )
    }

    fn from_geotiff(path: &Path) -> Result<Option<Self>> {
        let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
        let mut decoder = Decoder::new(BufReader::new(file))?;

        if let Some(m) = decoder.find_tag(Tag::ModelTransformationTag)? {
            let m = m.into_f64_vec()?;
            ensure!(m.len() >= 8, "short ModelTransformation tag");
            return Ok(Some(GeoTransform {
                ulx: m[3],
                xres: m[0],
                xskew: m[1],
                uly: m[7],
                yskew: m[4],
                yres: m[5],
            }));
        }

        let scale = decoder.find_tag(Tag::ModelPixelScaleTag)?;
        let tiepoint = decoder.find_tag(Tag::ModelTiepointTag)?;
        match (scale, tiepoint) {
            (Some(scale), Some(tiepoint)) => {
                let scale = scale.into_f64_vec()?;
                let tie = tiepoint.into_f64_vec()?;
                ensure!(scale.len() >= 2, "short ModelPixelScale tag");
                ensure!(tie.len() >= 6, "short ModelTiepoint tag");
                Ok(Some(GeoTransform {
                    ulx: tie[3] - tie[0] * scale[0],
                    xres: scale[0],
                    xskew: 0.,
                    uly: tie[4] + tie[1] * scale[1],
                    yskew: 0.,
                    yres: -scale[1],
                }))
            }
            _ => Ok(None),
        }
    }
}

/// Path of the short-form world file for a raster
/// (`.png` → `.pgw`, `.tif` → `.tfw`).
pub fn world_file_path(raster: &Path) -> PathBuf {
    let ext = extension_lower(raster);
    let mut chars = ext.chars();
    let short = match (chars.next(), chars.last()) {
        (Some(first), Some(last)) => format!("{}{}w", first, last),
        _ => "wld".to_string(),
    };
    raster.with_extension(short)
}

fn world_file_candidates(path: &Path) -> Vec<PathBuf> {
    let ext = extension_lower(path);
    vec![
        world_file_path(path),
        path.with_extension(format!("{}w", ext)),
        path.with_extension("wld"),
    ]
}

fn is_tiff(path: &Path) -> bool {
    matches!(extension_lower(path).as_str(), "tif" | "tiff")
}

fn extension_lower(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_lowercase()
}

fn append_extension(path: &Path, ext: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(ext);
    PathBuf::from(name)
}

fn parse_floats<'a>(parts: impl Iterator<Item = &'a str>) -> Result<Vec<f64>> {
    parts
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<f64>()
                .with_context(|| format!("invalid number `{}`", s))
        })
        .collect()
}

fn six(values: &[f64]) -> Result<[f64; 6]> {
    ensure!(
        values.len() == 6,
        "expected 6 transform coefficients, found {}",
        values.len()
    );
    Ok([values[0], values[1], values[2], values[3], values[4], values[5]])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::write;
    use tiff::encoder::{colortype, TiffEncoder};

    const AUX: &str = r#"<PAMDataset>
  <SRS dataAxisToSRSAxisMapping="1,2">PROJCS["GDA94 / MGA zone 50"]</SRS>
  <GeoTransform>  3.9100000000000000e+05,  5.0000000000000000e-01,  0.0000000000000000e+00,  6.4650000000000000e+06,  0.0000000000000000e+00, -5.0000000000000000e-01</GeoTransform>
</PAMDataset>"#;

    #[test]
    fn aux_xml_and_world_file_agree() -> Result<()> {
        let from_aux = GeoTransform::from_aux_xml(AUX)?;
        assert_eq!(
            from_aux.to_gdal(),
            [391_000., 0.5, 0., 6_465_000., 0., -0.5]
        );

        let from_world = GeoTransform::from_world_file(&from_aux.to_world_file())?;
        assert_eq!(from_world, from_aux);
        Ok(())
    }

    #[test]
    fn world_file_is_pixel_centred() -> Result<()> {
        let gt = GeoTransform::from_world_file("2.0\n0.0\n0.0\n-2.0\n101.0\n199.0\n")?;
        assert_eq!(gt.ulx, 100.);
        assert_eq!(gt.uly, 200.);
        Ok(())
    }

    #[test]
    fn rejects_short_transform() {
        assert!(GeoTransform::from_world_file("1.0\n0.0\n").is_err());
        assert!(GeoTransform::from_aux_xml("<PAMDataset/>").is_err());
    }

    #[test]
    fn finds_sidecars() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let png = dir.path().join("000001.png");
        write(&png, b"")?;
        assert!(GeoTransform::read_for(&png).is_err());

        write(dir.path().join("000001.pgw"), "1\n0\n0\n-1\n10.5\n19.5\n")?;
        assert_eq!(GeoTransform::read_for(&png)?.ulx, 10.);

        write(dir.path().join("000001.png.aux.xml"), AUX)?;
        assert_eq!(GeoTransform::read_for(&png)?.ulx, 391_000.);
        Ok(())
    }

    fn write_geotiff(path: &Path, tags: &[(Tag, &[f64])]) -> Result<()> {
        let mut encoder = TiffEncoder::new(File::create(path)?)?;
        let mut image = encoder.new_image::<colortype::Gray16>(2, 2)?;
        for (tag, values) in tags.iter() {
            image.encoder().write_tag(*tag, *values)?;
        }
        image.write_data(&[0u16; 4])?;
        Ok(())
    }

    #[test]
    fn geotiff_tags_agree_with_world_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let expected = GeoTransform::from_aux_xml(AUX)?;
        let world = GeoTransform::from_world_file(&expected.to_world_file())?;
        assert_eq!(world, expected);

        // tiepoint on pixel (10, 20) rather than the origin
        let tiepoint = dir.path().join("tiepoint.tif");
        write_geotiff(
            &tiepoint,
            &[
                (Tag::ModelPixelScaleTag, &[0.5, 0.5, 0.][..]),
                (Tag::ModelTiepointTag, &[10., 20., 0., 391_005., 6_464_990., 0.][..]),
            ],
        )?;
        assert_eq!(GeoTransform::read_for(&tiepoint)?, world);

        let matrix = dir.path().join("matrix.tif");
        write_geotiff(
            &matrix,
            &[(
                Tag::ModelTransformationTag,
                &[
                    0.5, 0., 0., 391_000., //
                    0., -0.5, 0., 6_465_000., //
                    0., 0., 0., 0., //
                    0., 0., 0., 1.,
                ][..],
            )],
        )?;
        assert_eq!(GeoTransform::read_for(&matrix)?, world);

        // model tags win over a disagreeing sidecar
        write(dir.path().join("matrix.tfw"), "1\n0\n0\n-1\n10.5\n19.5\n")?;
        assert_eq!(GeoTransform::read_for(&matrix)?, world);
        Ok(())
    }

    #[test]
    fn plain_tiff_falls_back_to_world_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let tif = dir.path().join("000001.tif");
        write_geotiff(&tif, &[])?;
        assert!(GeoTransform::read_for(&tif).is_err());

        write(dir.path().join("000001.tfw"), "1\n0\n0\n-1\n10.5\n19.5\n")?;
        assert_eq!(GeoTransform::read_for(&tif)?.to_gdal(), [10., 1., 0., 20., 0., -1.]);
        Ok(())
    }

    #[test]
    fn short_world_file_names() {
        assert_eq!(
            world_file_path(Path::new("a/b.tif")),
            Path::new("a/b.tfw")
        );
        assert_eq!(
            world_file_path(Path::new("a/b.PNG")),
            Path::new("a/b.pgw")
        );
    }
}
