//! Writes small multi-band GeoTIFFs for conversion tests.
//!
//! Produces chunky (interleaved) float32 strips with GeoTIFF georeferencing
//! and optional GDAL band descriptions and nodata.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use tiff::encoder::TiffEncoder;
use tiff::tags::Tag;
use tiff::TiffResult;

const TAG_MODEL_PIXEL_SCALE: u16 = 33550;
const TAG_MODEL_TIEPOINT: u16 = 33922;
const TAG_GEO_KEY_DIRECTORY: u16 = 34735;
const TAG_GDAL_METADATA: u16 = 42112;
const TAG_GDAL_NODATA: u16 = 42113;

/// Builder for a GeoTIFF test file.
#[derive(Debug, Clone)]
pub struct GeoTiffFixture {
    pub width: usize,
    pub height: usize,
    pub epsg: u32,
    /// World coordinates of the top-left corner.
    pub origin: (f64, f64),
    pub pixel_size: (f64, f64),
    pub rows_per_strip: usize,
    pub nodata: Option<f64>,
    pub pixel_is_point: bool,
    pub georeferenced: bool,
    bands: Vec<(Option<String>, Vec<f32>)>,
}

impl GeoTiffFixture {
    /// A WGS84 raster with its top-left corner at (36.0, 0.0) and 0.01 degree pixels.
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            epsg: 4326,
            origin: (36.0, 0.0),
            pixel_size: (0.01, 0.01),
            rows_per_strip: 4,
            nodata: None,
            pixel_is_point: false,
            georeferenced: true,
            bands: Vec::new(),
        }
    }

    pub fn with_band(mut self, description: Option<&str>, data: Vec<f32>) -> Self {
        assert_eq!(data.len(), self.width * self.height, "band size mismatch");
        self.bands.push((description.map(str::to_string), data));
        self
    }

    /// Add a band computed from (col, row).
    pub fn with_band_fn(self, description: Option<&str>, f: impl Fn(usize, usize) -> f32) -> Self {
        let mut data = Vec::with_capacity(self.width * self.height);
        for row in 0..self.height {
            for col in 0..self.width {
                data.push(f(col, row));
            }
        }
        self.with_band(description, data)
    }

    pub fn with_crs(mut self, epsg: u32) -> Self {
        self.epsg = epsg;
        self
    }

    pub fn with_origin(mut self, x: f64, y: f64) -> Self {
        self.origin = (x, y);
        self
    }

    pub fn with_pixel_size(mut self, x: f64, y: f64) -> Self {
        self.pixel_size = (x, y);
        self
    }

    pub fn with_rows_per_strip(mut self, rows: usize) -> Self {
        self.rows_per_strip = rows.max(1);
        self
    }

    pub fn with_nodata(mut self, nodata: f64) -> Self {
        self.nodata = Some(nodata);
        self
    }

    pub fn with_pixel_is_point(mut self) -> Self {
        self.pixel_is_point = true;
        self
    }

    pub fn without_georeferencing(mut self) -> Self {
        self.georeferenced = false;
        self
    }

    pub fn band_count(&self) -> usize {
        self.bands.len()
    }

    pub fn value(&self, band: usize, col: usize, row: usize) -> f32 {
        self.bands[band].1[row * self.width + col]
    }

    /// World coordinates of a pixel center.
    pub fn pixel_center(&self, col: usize, row: usize) -> (f64, f64) {
        (
            self.origin.0 + (col as f64 + 0.5) * self.pixel_size.0,
            self.origin.1 - (row as f64 + 0.5) * self.pixel_size.1,
        )
    }

    /// Write into `dir` under `name` and return the full path.
    pub fn write_in(&self, dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        self.write(&path).expect("Failed to write GeoTIFF fixture");
        path
    }

    pub fn write(&self, path: &Path) -> TiffResult<()> {
        let bands = self.bands.len();
        assert!(bands > 0, "fixture needs at least one band");

        let file = BufWriter::new(File::create(path)?);
        let mut encoder = TiffEncoder::new(file)?;
        let mut dir = encoder.image_directory()?;

        dir.write_tag(Tag::ImageWidth, self.width as u32)?;
        dir.write_tag(Tag::ImageLength, self.height as u32)?;
        dir.write_tag(Tag::BitsPerSample, vec![32u16; bands].as_slice())?;
        dir.write_tag(Tag::Compression, 1u16)?;
        dir.write_tag(Tag::PhotometricInterpretation, 1u16)?;
        dir.write_tag(Tag::SamplesPerPixel, bands as u16)?;
        dir.write_tag(Tag::SampleFormat, vec![3u16; bands].as_slice())?;
        dir.write_tag(Tag::PlanarConfiguration, 1u16)?;
        dir.write_tag(Tag::RowsPerStrip, self.rows_per_strip as u32)?;
        if bands > 1 {
            dir.write_tag(Tag::ExtraSamples, vec![0u16; bands - 1].as_slice())?;
        }

        if self.georeferenced {
            let scale = [self.pixel_size.0, self.pixel_size.1, 0.0];
            dir.write_tag(Tag::Unknown(TAG_MODEL_PIXEL_SCALE), scale.as_slice())?;

            // PixelIsPoint ties pixel (0, 0) to the first pixel center.
            let (x, y) = if self.pixel_is_point {
                self.pixel_center(0, 0)
            } else {
                self.origin
            };
            let tiepoint = [0.0, 0.0, 0.0, x, y, 0.0];
            dir.write_tag(Tag::Unknown(TAG_MODEL_TIEPOINT), tiepoint.as_slice())?;

            let geographic = self.epsg == 4326 || self.epsg == 4269;
            let geokeys: Vec<u16> = vec![
                1, 1, 0, 3,
                1024, 0, 1, if geographic { 2 } else { 1 },
                1025, 0, 1, if self.pixel_is_point { 2 } else { 1 },
                if geographic { 2048 } else { 3072 }, 0, 1, self.epsg as u16,
            ];
            dir.write_tag(Tag::Unknown(TAG_GEO_KEY_DIRECTORY), geokeys.as_slice())?;
        }

        if self.bands.iter().any(|(d, _)| d.is_some()) {
            let mut xml = String::from("<GDALMetadata>");
            for (i, (description, _)) in self.bands.iter().enumerate() {
                if let Some(d) = description {
                    xml.push_str(&format!(
                        "<Item name=\"DESCRIPTION\" sample=\"{}\" role=\"description\">{}</Item>",
                        i, d
                    ));
                }
            }
            xml.push_str("</GDALMetadata>");
            dir.write_tag(Tag::Unknown(TAG_GDAL_METADATA), xml.as_str())?;
        }

        if let Some(nodata) = self.nodata {
            dir.write_tag(Tag::Unknown(TAG_GDAL_NODATA), nodata.to_string().as_str())?;
        }

        let mut offsets = Vec::new();
        let mut byte_counts = Vec::new();
        for strip_start in (0..self.height).step_by(self.rows_per_strip) {
            let strip_end = (strip_start + self.rows_per_strip).min(self.height);
            let mut bytes = Vec::with_capacity((strip_end - strip_start) * self.width * bands * 4);
            for row in strip_start..strip_end {
                for col in 0..self.width {
                    for (_, data) in &self.bands {
                        bytes.extend_from_slice(&data[row * self.width + col].to_le_bytes());
                    }
                }
            }
            let offset = dir.write_data(bytes.as_slice())?;
            offsets.push(offset as u32);
            byte_counts.push(bytes.len() as u32);
        }
        dir.write_tag(Tag::StripOffsets, offsets.as_slice())?;
        dir.write_tag(Tag::StripByteCounts, byte_counts.as_slice())?;

        dir.finish()?;
        Ok(())
    }
}
