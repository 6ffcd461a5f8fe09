//! Raster outputs: the flight mosaic and converted frames.
//!
//! Both are 16-bit grey TIFFs georeferenced by a `.tfw`
//! world file next to them.
use std::{
    fs::{create_dir_all, write, File},
    io::{BufWriter, Cursor},
    path::{Path, PathBuf},
};

use anyhow::{bail, ensure, Context, Result};
use byteordered::ByteOrdered;
use image::codecs::tiff::TiffEncoder;
use itertools::iproduct;
use ndarray::Array2;
use tracing::debug;

use crate::{
    crs::Crs,
    external::{Converter, MosaicBuilder},
    frame::Frame,
    georef::{world_file_path, GeoTransform},
};

/// Encode a 16-bit grey raster as TIFF.
pub fn write_tiff_u16(path: &Path, data: &Array2<u16>) -> Result<()> {
    let (ht, wid) = data.dim();
    let mut image_buffer = {
        let vec = Vec::with_capacity(2 * ht * wid);
        ByteOrdered::native(Cursor::new(vec))
    };
    for val in data.iter() {
        image_buffer.write_u16(*val)?;
    }

    let image_writer = BufWriter::new(
        File::create(path).with_context(|| format!("creating {}", path.display()))?,
    );
    TiffEncoder::new(image_writer).encode(
        &image_buffer.into_inner().into_inner(),
        wid as u32,
        ht as u32,
        image::ColorType::L16,
    )?;
    Ok(())
}

/// Write the world file georeferencing `raster`.
pub fn write_world_file(raster: &Path, transform: &GeoTransform) -> Result<PathBuf> {
    let path = world_file_path(raster);
    write(&path, transform.to_world_file())
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(path)
}

fn read_grey16(frame: &Frame) -> Result<Array2<u16>> {
    let img = image::open(&frame.file.path)
        .with_context(|| format!("reading raster {}", frame.file.path.display()))?
        .to_luma16();
    let (wid, ht) = img.dimensions();
    Ok(Array2::from_shape_vec((ht as usize, wid as usize), img.into_raw())?)
}

/// Pastes every frame into one north-up canvas.
///
/// The canvas takes the first frame's pixel size; frames are
/// resampled nearest-neighbour and later frames overwrite
/// earlier ones, except where they are nodata (0).
#[derive(Debug, Default, Clone, Copy)]
pub struct GeoMosaic;

impl MosaicBuilder for GeoMosaic {
    fn build(&self, frames: &[Frame], crs: &Crs, output: &Path) -> Result<()> {
        let first = match frames.first() {
            Some(f) => f,
            None => bail!("no frames to mosaic"),
        };
        let xres = first.transform.xres.abs();
        let yres = first.transform.yres.abs();
        ensure!(xres > 0. && yres > 0., "frame {} has a zero pixel size", first.file.name);

        let (mut minx, mut miny, mut maxx, mut maxy) = first.corners().bounds();
        for f in frames.iter().skip(1) {
            let (x0, y0, x1, y1) = f.corners().bounds();
            minx = minx.min(x0);
            miny = miny.min(y0);
            maxx = maxx.max(x1);
            maxy = maxy.max(y1);
        }
        let wid = ((maxx - minx) / xres).ceil() as usize;
        let ht = ((maxy - miny) / yres).ceil() as usize;
        debug!(wid, ht, epsg = crs.epsg(), "mosaic canvas");

        let mut canvas = Array2::<u16>::zeros((ht, wid));
        for f in frames {
            let pixels = read_grey16(f)?;
            let (fht, fwid) = pixels.dim();
            let t = &f.transform;
            let (x0, y0, x1, y1) = f.corners().bounds();
            let cols = ((x0 - minx) / xres).floor() as usize..(((x1 - minx) / xres).ceil() as usize).min(wid);
            let rows = ((maxy - y1) / yres).floor() as usize..(((maxy - y0) / yres).ceil() as usize).min(ht);

            for (row, col) in iproduct!(rows, cols) {
                let x = minx + (col as f64 + 0.5) * xres;
                let y = maxy - (row as f64 + 0.5) * yres;
                let fc = ((x - t.ulx) / t.xres).floor();
                let fr = ((y - t.uly) / t.yres).floor();
                if fc < 0. || fr < 0. || fc >= fwid as f64 || fr >= fht as f64 {
                    continue;
                }
                let val = pixels[(fr as usize, fc as usize)];
                if val != 0 {
                    canvas[(row, col)] = val;
                }
            }
        }

        if let Some(dir) = output.parent() {
            create_dir_all(dir)?;
        }
        write_tiff_u16(output, &canvas)?;
        write_world_file(
            output,
            &GeoTransform::from_gdal([minx, xres, 0., maxy, 0., -yres]),
        )?;
        Ok(())
    }
}

/// Re-encodes a frame as a georeferenced 16-bit TIFF named
/// after the frame identifier.
#[derive(Debug, Default, Clone, Copy)]
pub struct TiffConverter;

impl Converter for TiffConverter {
    fn convert(&self, frame: &Frame, output_dir: &Path) -> Result<PathBuf> {
        create_dir_all(output_dir)
            .with_context(|| format!("creating {}", output_dir.display()))?;
        let output = output_dir.join(format!("{}.tif", frame.file.id));
        write_tiff_u16(&output, &read_grey16(frame)?)?;
        write_world_file(&output, &frame.transform)?;
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameFile;
    use chrono::Utc;
    use image::{ImageBuffer, Luma};

    fn frame(dir: &Path, name: &str, ulx: f64, value: u16) -> Frame {
        let path = dir.join(name);
        ImageBuffer::<Luma<u16>, _>::from_pixel(4, 2, Luma([value]))
            .save(&path)
            .unwrap();
        Frame {
            file: FrameFile::with_capture_time(path, Utc::now()).unwrap(),
            width: 4,
            height: 2,
            transform: GeoTransform::from_gdal([ulx, 1., 0., 10., 0., -1.]),
        }
    }

    #[test]
    fn mosaic_spans_all_frames() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let frames = vec![
            frame(dir.path(), "000001.png", 0., 100),
            frame(dir.path(), "000002.png", 2., 200),
        ];
        let output = dir.path().join("Processed/flight_mosaic.tif");
        GeoMosaic.build(&frames, &Crs::from_epsg(28350)?, &output)?;

        let (wid, ht) = image::image_dimensions(&output)?;
        assert_eq!((wid, ht), (6, 2));
        let img = image::open(&output)?.to_luma16();
        assert_eq!(img.get_pixel(0, 0)[0], 100);
        assert_eq!(img.get_pixel(3, 1)[0], 200);

        let t = GeoTransform::read_for(&output)?;
        assert_eq!(t.to_gdal(), [0., 1., 0., 10., 0., -1.]);
        Ok(())
    }

    #[test]
    fn converts_with_georeferencing() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let f = frame(dir.path(), "000007.png", 391_000., 42);
        let out = TiffConverter.convert(&f, &dir.path().join("images"))?;
        assert_eq!(out.file_name().unwrap(), "000007.tif");
        assert_eq!(image::image_dimensions(&out)?, (4, 2));
        assert_eq!(GeoTransform::read_for(&out)?, f.transform);
        Ok(())
    }
}
