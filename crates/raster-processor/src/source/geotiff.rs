//! GeoTIFF source reader.
//!
//! Decodes one band at a time, chunk by chunk, so peak memory is a single
//! band plus one decoded strip or tile regardless of band count.

use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;

use quick_xml::events::Event;
use quick_xml::Reader;
use tiff::decoder::{Decoder, DecodingResult};
use tiff::tags::Tag;
use tracing::{debug, warn};

use crate::error::{RasterError, Result};
use crate::geotransform::GeoTransform;

// GeoTIFF and GDAL private tags
const TAG_MODEL_PIXEL_SCALE: u16 = 33550;
const TAG_MODEL_TIEPOINT: u16 = 33922;
const TAG_MODEL_TRANSFORMATION: u16 = 34264;
const TAG_GEO_KEY_DIRECTORY: u16 = 34735;
const TAG_GDAL_METADATA: u16 = 42112;
const TAG_GDAL_NODATA: u16 = 42113;

// GeoKey ids
const KEY_RASTER_TYPE: u32 = 1025;
const KEY_GEOGRAPHIC_TYPE: u32 = 2048;
const KEY_PROJECTED_CS_TYPE: u32 = 3072;
const RASTER_PIXEL_IS_POINT: u32 = 2;
const USER_DEFINED: u32 = 32767;

/// An opened GeoTIFF with its georeferencing resolved.
pub struct GeoTiffSource {
    decoder: Decoder<BufReader<File>>,
    width: u32,
    height: u32,
    samples_per_pixel: usize,
    /// PlanarConfiguration = 2: each band stored in its own chunks
    separate_planes: bool,
    chunk_width: u32,
    chunk_height: u32,
    geotransform: GeoTransform,
    epsg: u32,
    nodata: Option<f64>,
    band_names: Vec<String>,
    described_bands: usize,
}

impl GeoTiffSource {
    /// Open a GeoTIFF and read its header, georeferencing and band metadata.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .map_err(|e| RasterError::decode(format!("cannot open {}: {}", path.display(), e)))?;
        let mut decoder = Decoder::new(BufReader::new(file))?;

        let (width, height) = decoder.dimensions()?;
        if width == 0 || height == 0 {
            return Err(RasterError::decode("raster has zero width or height"));
        }
        let (chunk_width, chunk_height) = decoder.chunk_dimensions();
        if chunk_width == 0 || chunk_height == 0 {
            return Err(RasterError::decode("raster has zero-sized chunks"));
        }

        let samples_per_pixel = match decoder.find_tag(Tag::SamplesPerPixel)? {
            Some(v) => v.into_u32()? as usize,
            None => 1,
        };
        if samples_per_pixel == 0 {
            return Err(RasterError::decode("SamplesPerPixel is zero"));
        }
        let separate_planes = match decoder.find_tag(Tag::PlanarConfiguration)? {
            Some(v) => v.into_u32()? == 2,
            None => false,
        };

        let geokeys = read_geokeys(&mut decoder)?;
        let mut geotransform = read_geotransform(&mut decoder)?;
        if geokeys
            .iter()
            .any(|&(k, v)| k == KEY_RASTER_TYPE && v == RASTER_PIXEL_IS_POINT)
        {
            // Tie points address pixel centers; shift to the corner convention.
            let c = geotransform.0;
            geotransform = GeoTransform([
                c[0] - 0.5 * (c[1] + c[2]),
                c[1],
                c[2],
                c[3] - 0.5 * (c[4] + c[5]),
                c[4],
                c[5],
            ]);
        }
        geotransform.validate()?;

        let epsg = resolve_epsg(&geokeys)?;
        if epsg != projection::WGS84_EPSG && projection::proj_string(epsg).is_none() {
            return Err(RasterError::Georeference(format!(
                "EPSG:{} is not a supported coordinate system",
                epsg
            )));
        }

        let nodata = tag_string(&mut decoder, TAG_GDAL_NODATA)?
            .and_then(|s| s.trim().trim_end_matches('\0').parse::<f64>().ok());

        let descriptions = match tag_string(&mut decoder, TAG_GDAL_METADATA)? {
            Some(xml) => parse_gdal_band_descriptions(&xml, samples_per_pixel),
            None => vec![None; samples_per_pixel],
        };
        let described_bands = descriptions.iter().filter(|d| d.is_some()).count();
        let band_names = descriptions
            .into_iter()
            .enumerate()
            .map(|(i, d)| d.unwrap_or_else(|| format!("band_{}", i + 1)))
            .collect();

        debug!(
            width = width,
            height = height,
            bands = samples_per_pixel,
            chunk_width = chunk_width,
            chunk_height = chunk_height,
            epsg = epsg,
            "Opened GeoTIFF source"
        );

        Ok(Self {
            decoder,
            width,
            height,
            samples_per_pixel,
            separate_planes,
            chunk_width,
            chunk_height,
            geotransform,
            epsg,
            nodata,
            band_names,
            described_bands,
        })
    }

    pub fn width(&self) -> usize {
        self.width as usize
    }

    pub fn height(&self) -> usize {
        self.height as usize
    }

    pub fn band_count(&self) -> usize {
        self.samples_per_pixel
    }

    /// Band names: source descriptions where present, else `band_{i}` (1-indexed).
    pub fn band_names(&self) -> &[String] {
        &self.band_names
    }

    /// Number of bands whose name came from the source file.
    pub fn described_band_count(&self) -> usize {
        self.described_bands
    }

    pub fn geotransform(&self) -> GeoTransform {
        self.geotransform
    }

    pub fn epsg(&self) -> u32 {
        self.epsg
    }

    pub fn nodata(&self) -> Option<f64> {
        self.nodata
    }

    /// Decode a single band into a row-major `f32` grid. Nodata becomes NaN.
    pub fn read_band(&mut self, band: usize) -> Result<Vec<f32>> {
        if band >= self.samples_per_pixel {
            return Err(RasterError::decode(format!(
                "band {} requested but raster has {} bands",
                band, self.samples_per_pixel
            )));
        }

        let (w, h) = (self.width as usize, self.height as usize);
        let (cw, ch) = (self.chunk_width as usize, self.chunk_height as usize);
        let across = w.div_ceil(cw);
        let down = h.div_ceil(ch);

        let (samples, sample_offset, first_chunk) = if self.separate_planes {
            (1, 0, band * across * down)
        } else {
            (self.samples_per_pixel, band, 0)
        };

        let nodata = self.nodata.map(|v| v as f32);
        let mut out = vec![f32::NAN; w * h];

        for chunk_row in 0..down {
            for chunk_col in 0..across {
                let chunk_index = first_chunk + chunk_row * across + chunk_col;
                let decoded = self.decoder.read_chunk(chunk_index as u32)?;
                let data = decoded_to_f32(decoded)?;

                let col0 = chunk_col * cw;
                let row0 = chunk_row * ch;
                let valid_w = cw.min(w - col0);
                let valid_h = ch.min(h - row0);

                // Edge tiles may come back cropped or padded to the full tile width.
                let stride = if data.len() == valid_w * valid_h * samples {
                    valid_w
                } else {
                    cw
                };
                let needed = ((valid_h - 1) * stride + valid_w) * samples;
                if data.len() < needed {
                    return Err(RasterError::decode(format!(
                        "chunk {} holds {} samples, expected at least {}",
                        chunk_index,
                        data.len(),
                        needed
                    )));
                }

                for r in 0..valid_h {
                    let src_row = r * stride * samples;
                    let dst_row = (row0 + r) * w + col0;
                    for c in 0..valid_w {
                        let v = data[src_row + c * samples + sample_offset];
                        out[dst_row + c] = match nodata {
                            Some(nd) if v == nd => f32::NAN,
                            _ => v,
                        };
                    }
                }
            }
        }

        Ok(out)
    }
}

fn decoded_to_f32(result: DecodingResult) -> Result<Vec<f32>> {
    let values = match result {
        DecodingResult::U8(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::U16(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::U32(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::U64(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::I8(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::I16(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::I32(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::I64(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::F32(v) => v,
        DecodingResult::F64(v) => v.into_iter().map(|x| x as f32).collect(),
        #[allow(unreachable_patterns)]
        _ => return Err(RasterError::decode("unsupported sample format")),
    };
    Ok(values)
}

fn tag_f64_vec<R: Read + Seek>(decoder: &mut Decoder<R>, code: u16) -> Result<Option<Vec<f64>>> {
    match decoder.find_tag(Tag::from_u16_exhaustive(code))? {
        Some(v) => Ok(Some(v.into_f64_vec()?)),
        None => Ok(None),
    }
}

fn tag_string<R: Read + Seek>(decoder: &mut Decoder<R>, code: u16) -> Result<Option<String>> {
    match decoder.find_tag(Tag::from_u16_exhaustive(code))? {
        Some(v) => match v.into_string() {
            Ok(s) => Ok(Some(s)),
            Err(e) => {
                warn!(tag = code, error = %e, "Ignoring non-ASCII TIFF tag");
                Ok(None)
            }
        },
        None => Ok(None),
    }
}

/// (key id, inline value) pairs from the GeoKeyDirectory.
fn read_geokeys<R: Read + Seek>(decoder: &mut Decoder<R>) -> Result<Vec<(u32, u32)>> {
    let directory = match decoder.find_tag(Tag::from_u16_exhaustive(TAG_GEO_KEY_DIRECTORY))? {
        Some(v) => v.into_u32_vec()?,
        None => return Ok(vec![]),
    };
    if directory.len() < 4 {
        return Err(RasterError::Georeference(
            "GeoKeyDirectory header is truncated".to_string(),
        ));
    }

    let count = directory[3] as usize;
    let mut keys = Vec::with_capacity(count);
    for entry in directory[4..].chunks_exact(4).take(count) {
        // Location 0 means the value is stored inline.
        if entry[1] == 0 {
            keys.push((entry[0], entry[3]));
        }
    }
    Ok(keys)
}

fn resolve_epsg(geokeys: &[(u32, u32)]) -> Result<u32> {
    let lookup = |key: u32| geokeys.iter().find(|(k, _)| *k == key).map(|(_, v)| *v);

    match lookup(KEY_PROJECTED_CS_TYPE).or_else(|| lookup(KEY_GEOGRAPHIC_TYPE)) {
        Some(USER_DEFINED) => Err(RasterError::Georeference(
            "user-defined coordinate systems are not supported".to_string(),
        )),
        Some(code) => Ok(code),
        None => {
            warn!("GeoTIFF has no CRS GeoKeys, assuming EPSG:4326");
            Ok(projection::WGS84_EPSG)
        }
    }
}

fn read_geotransform<R: Read + Seek>(decoder: &mut Decoder<R>) -> Result<GeoTransform> {
    if let Some(m) = tag_f64_vec(decoder, TAG_MODEL_TRANSFORMATION)? {
        if m.len() < 16 {
            return Err(RasterError::Georeference(format!(
                "ModelTransformation has {} values, expected 16",
                m.len()
            )));
        }
        return Ok(GeoTransform([m[3], m[0], m[1], m[7], m[4], m[5]]));
    }

    let scale = tag_f64_vec(decoder, TAG_MODEL_PIXEL_SCALE)?;
    let tiepoint = tag_f64_vec(decoder, TAG_MODEL_TIEPOINT)?;
    match (scale, tiepoint) {
        (Some(s), Some(t)) if s.len() >= 2 && t.len() >= 6 => {
            let (i, j, x, y) = (t[0], t[1], t[3], t[4]);
            Ok(GeoTransform::north_up(x - i * s[0], y + j * s[1], s[0], s[1]))
        }
        _ => Err(RasterError::Georeference(
            "missing ModelPixelScale/ModelTiepoint or ModelTransformation".to_string(),
        )),
    }
}

/// Per-band descriptions from a GDAL_METADATA XML document.
///
/// Looks for `<Item name="DESCRIPTION" sample="i" role="description">`.
/// Malformed XML yields no descriptions rather than an error.
pub fn parse_gdal_band_descriptions(xml: &str, band_count: usize) -> Vec<Option<String>> {
    let mut descriptions = vec![None; band_count];
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut buf = Vec::new();
    let mut current_sample: Option<usize> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.name().as_ref() == b"Item" => {
                let mut is_description = false;
                let mut sample = None;
                for attr in e.attributes().flatten() {
                    let value = String::from_utf8_lossy(&attr.value).to_string();
                    match attr.key.as_ref() {
                        b"name" => is_description |= value.eq_ignore_ascii_case("DESCRIPTION"),
                        b"role" => is_description |= value == "description",
                        b"sample" => sample = value.parse::<usize>().ok(),
                        _ => {}
                    }
                }
                current_sample = if is_description { sample } else { None };
            }
            Ok(Event::Text(t)) => {
                if let Some(idx) = current_sample.take() {
                    if let (Ok(text), Some(slot)) = (t.unescape(), descriptions.get_mut(idx)) {
                        let text = text.trim();
                        if !text.is_empty() {
                            *slot = Some(text.to_string());
                        }
                    }
                }
            }
            Ok(Event::End(_)) => current_sample = None,
            Ok(Event::Eof) => break,
            Err(e) => {
                warn!(error = %e, "Malformed GDAL_METADATA, ignoring band descriptions");
                return vec![None; band_count];
            }
            _ => {}
        }
        buf.clear();
    }

    descriptions
}
