//! PNG decoder.
//!
//! Every byte consumed goes through a [`ReadHook`], so the caller gets the
//! input measurements and status flags along with the image. Errors found
//! after the header (and palette) are known become warnings: the rows decoded
//! so far are kept and the rest stay zero-filled.

use std::fmt;
use std::io::Read;

use flate2::read::ZlibDecoder;
use log::debug;

use super::chunk::{chunk_crc, ChunkType};
use super::filter::unfilter_row;
use super::interlace::{merge_pass_row, ADAM7};
use super::{ColorType, Ihdr, PNG_SIGNATURE, PNG_UINT_31_MAX};
use crate::error::{Error, ErrorKind, Result};
use crate::image::{Background, ChunkLocation, Image, SignificantBits, Transparency, UnknownChunk};
use crate::status::RunStatus;
use crate::stream::{ChunkAction, InputSizes, IoLocation, ReadHook};

const MNG_SIGNATURE: [u8; 8] = [0x8A, b'M', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
const JNG_SIGNATURE: [u8; 8] = [0x8B, b'J', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
const IHDR_PREFIX: [u8; 8] = [0, 0, 0, 13, b'I', b'H', b'D', b'R'];

/// Smallest datastream worth trying: IHDR (12+13) plus a tiny IDAT (12+6).
const MIN_DATASTREAM_LEN: usize = 25 + 18;

/// Format an input was recognized as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    /// A PNG file.
    Png,
    /// A PNG datastream without signature.
    PngDatastream,
    /// An animated PNG file.
    Apng,
    /// An animated PNG datastream without signature.
    ApngDatastream,
    /// A portable anymap.
    Pnm,
}

impl fmt::Display for InputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            InputFormat::Png => "PNG",
            InputFormat::PngDatastream => "PNG datastream",
            InputFormat::Apng => "APNG",
            InputFormat::ApngDatastream => "APNG datastream",
            InputFormat::Pnm => "PNM",
        })
    }
}

/// Result of reading an input image.
#[derive(Debug)]
pub struct Decoded {
    /// The image.
    pub image: Image,
    /// Flags discovered while reading.
    pub status: RunStatus,
    /// Input measurements.
    pub sizes: InputSizes,
    /// Recognized format.
    pub format: InputFormat,
    /// Recoverable problems, in the order found.
    pub warnings: Vec<String>,
}

/// Check whether `data` holds a PNG datastream, with or without signature.
///
/// Fails for inputs that look like damaged PNG or like MNG/JNG.
pub fn is_png(data: &[u8]) -> Result<bool> {
    if data.len() <= MIN_DATASTREAM_LEN {
        return Ok(false);
    }
    let has_signature = data[..8] == PNG_SIGNATURE;
    let start = if has_signature { 8 } else { 0 };
    if data[start..start + 8] == IHDR_PREFIX {
        return Ok(true);
    }
    if data[..4] == PNG_SIGNATURE[..4] && matches!(data[4], b'\n' | b'\r') {
        return Err(Error::TextConversionCorruption);
    }
    if data[..8] == MNG_SIGNATURE || data[..8] == JNG_SIGNATURE {
        return Err(Error::UnsupportedMng);
    }
    Ok(false)
}

/// Byte source that reports every tagged read to the hook.
struct Reader<'d> {
    data: &'d [u8],
    pos: usize,
    hook: ReadHook,
}

impl<'d> Reader<'d> {
    fn take(&mut self, location: IoLocation, len: usize) -> Result<&'d [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| Error::malformed("Unexpected end of file"))?;
        let piece = &self.data[self.pos..end];
        self.hook.on_read(self.pos as u64, location, piece)?;
        self.pos = end;
        Ok(piece)
    }
}

/// Decode a PNG datastream starting at offset 0 of `data`.
///
/// `snip` drops APNG chunks instead of keeping them.
pub fn decode_png(data: &[u8], snip: bool) -> Result<Decoded> {
    let mut reader = Reader {
        data,
        pos: 0,
        hook: ReadHook::new(snip),
    };
    let mut image = Image::default();
    let mut idat = Vec::new();

    let chunks = read_chunks(&mut reader, &mut image, &mut idat);
    let complete = chunks.is_ok();
    salvage(chunks, &image, &mut reader.hook)?;
    if complete && reader.pos < data.len() {
        reader.hook.junk("Extraneous data found after IEND");
    }

    if image.rows.is_empty() && !image.allocate_rows() {
        return Err(Error::malformed("Missing IHDR"));
    }
    let ihdr = *image.ihdr()?;
    let pixels = decode_image_data(&ihdr, &idat, &mut image.rows, &mut reader.hook);
    salvage(pixels, &image, &mut reader.hook)?;

    let (status, sizes, warnings) = reader.hook.finish();
    let signed = status.contains(RunStatus::HAS_PNG_SIGNATURE);
    let animated = status.contains(RunStatus::IS_PNG_FILE | RunStatus::HAS_MULTIPLE_IMAGES);
    let format = match (animated, signed) {
        (true, true) => InputFormat::Apng,
        (true, false) => InputFormat::ApngDatastream,
        (false, true) => InputFormat::Png,
        (false, false) => InputFormat::PngDatastream,
    };
    debug!("decoded {format}: {status:?}, {} IDAT bytes", sizes.idat_size);
    Ok(Decoded {
        image,
        status,
        sizes,
        format,
        warnings,
    })
}

/// Downgrade a format error to a warning once the image can be salvaged.
fn salvage(result: Result<()>, image: &Image, hook: &mut ReadHook) -> Result<()> {
    match result {
        Err(err) if err.kind() == ErrorKind::Format && image.has_critical_info() => {
            hook.warn(err.to_string());
            Ok(())
        }
        other => other,
    }
}

fn read_chunks(reader: &mut Reader<'_>, image: &mut Image, idat: &mut Vec<u8>) -> Result<()> {
    if reader.data.len() >= 8 && reader.data[..8] == PNG_SIGNATURE {
        reader.take(IoLocation::Signature, 8)?;
    }

    let mut seen_idat = false;
    let mut idat_done = false;
    loop {
        let header = reader.take(IoLocation::ChunkHeader, 8)?;
        let length = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
        let chunk_type = ChunkType([header[4], header[5], header[6], header[7]]);
        if length > PNG_UINT_31_MAX {
            return Err(Error::malformed("PNG unsigned integer out of range"));
        }
        if !chunk_type.is_well_formed() {
            return Err(Error::malformed(format!("{chunk_type}: invalid chunk type")));
        }
        if image.header.is_none() && chunk_type != ChunkType::IHDR {
            return Err(Error::malformed("Missing IHDR before other chunks"));
        }

        let action = reader.hook.on_chunk_header(length, chunk_type, image)?;
        let payload: &[u8] = if length > 0 {
            reader.take(IoLocation::ChunkData, length as usize)?
        } else {
            &[]
        };
        let crc = reader.take(IoLocation::ChunkCrc, 4)?;
        if u32::from_be_bytes([crc[0], crc[1], crc[2], crc[3]]) != chunk_crc(chunk_type, payload) {
            if chunk_type.is_critical() {
                return Err(Error::malformed(format!("{chunk_type}: CRC error")));
            }
            reader.hook.warn(format!("{chunk_type}: CRC error"));
            continue;
        }

        if seen_idat && chunk_type != ChunkType::IDAT {
            idat_done = true;
        }
        match action {
            ChunkAction::Discard => continue,
            ChunkAction::Keep => {
                let location = if seen_idat {
                    ChunkLocation::AfterIdat
                } else if image.palette.is_some() {
                    ChunkLocation::BeforeIdat
                } else {
                    ChunkLocation::BeforePlte
                };
                image.unknown_chunks.push(UnknownChunk {
                    chunk_type,
                    data: payload.to_vec(),
                    location,
                });
                continue;
            }
            ChunkAction::Decode => {}
        }

        match chunk_type {
            ChunkType::IHDR => {
                if image.header.is_some() {
                    return Err(Error::malformed("Out of place IHDR"));
                }
                image.header = Some(Ihdr::parse(payload)?);
            }
            ChunkType::PLTE => read_palette(image, payload, seen_idat, &mut reader.hook)?,
            ChunkType::IDAT => {
                if idat_done {
                    return Err(Error::malformed("Too many IDATs found"));
                }
                if image.is_palette() && image.palette.is_none() {
                    return Err(Error::malformed("Missing PLTE before IDAT"));
                }
                seen_idat = true;
                idat.extend_from_slice(payload);
            }
            ChunkType::IEND => {
                if !seen_idat {
                    return Err(Error::malformed("Missing IDAT"));
                }
                return Ok(());
            }
            ChunkType::TRNS | ChunkType::BKGD | ChunkType::HIST | ChunkType::SBIT => {
                if let Err(err) = read_ancillary(image, chunk_type, payload) {
                    reader.hook.warn(err.to_string());
                }
            }
            other => {
                return Err(Error::malformed(format!("{other}: unknown critical chunk")));
            }
        }
    }
}

fn read_palette(image: &mut Image, payload: &[u8], seen_idat: bool, hook: &mut ReadHook) -> Result<()> {
    let color_type = image.ihdr()?.color_type;
    if seen_idat {
        return Err(Error::malformed("Invalid PLTE after IDAT"));
    }
    if image.palette.is_some() {
        return Err(Error::malformed("Duplicate PLTE chunk"));
    }
    let valid = !payload.is_empty() && payload.len() % 3 == 0 && payload.len() <= 3 * 256;
    match color_type {
        ColorType::Palette if !valid => Err(Error::malformed("Invalid palette length")),
        ColorType::Gray | ColorType::GrayAlpha => {
            hook.warn("Ignoring PLTE chunk in grayscale PNG");
            Ok(())
        }
        _ if !valid => {
            hook.warn("Invalid palette length");
            Ok(())
        }
        _ => {
            image.palette = Some(payload.chunks_exact(3).map(|c| [c[0], c[1], c[2]]).collect());
            Ok(())
        }
    }
}

fn read_ancillary(image: &mut Image, chunk_type: ChunkType, payload: &[u8]) -> Result<()> {
    let color_type = image.ihdr()?.color_type;
    match chunk_type {
        ChunkType::TRNS => {
            if color_type.has_alpha() {
                return Err(Error::malformed("tRNS: invalid with alpha channel"));
            }
            let transparency = Transparency::from_chunk(color_type, payload)?;
            if let (Transparency::Palette(alpha), Some(palette)) = (&transparency, &image.palette) {
                if alpha.len() > palette.len() {
                    return Err(Error::malformed("tRNS: invalid length"));
                }
            }
            image.transparency = Some(transparency);
        }
        ChunkType::BKGD => image.background = Some(Background::from_chunk(color_type, payload)?),
        ChunkType::SBIT => {
            image.significant_bits = Some(SignificantBits::from_chunk(color_type, payload)?)
        }
        ChunkType::HIST => {
            let entries = image.palette.as_ref().map_or(0, Vec::len);
            if entries == 0 || payload.len() != 2 * entries {
                return Err(Error::malformed("hIST: invalid length"));
            }
            image.histogram = Some(
                payload
                    .chunks_exact(2)
                    .map(|c| u16::from_be_bytes([c[0], c[1]]))
                    .collect(),
            );
        }
        _ => {}
    }
    Ok(())
}

fn inflate_err(err: std::io::Error) -> Error {
    if err.kind() == std::io::ErrorKind::UnexpectedEof {
        Error::malformed("Not enough image data")
    } else {
        Error::malformed(format!("Decompression error: {err}"))
    }
}

/// Inflate, unfilter and deinterlace the IDAT stream into `rows`.
fn decode_image_data(ihdr: &Ihdr, idat: &[u8], rows: &mut [Vec<u8>], hook: &mut ReadHook) -> Result<()> {
    let mut inflater = ZlibDecoder::new(idat);
    let bpp = ihdr.filter_bpp();
    let mut line = vec![0u8; ihdr.row_bytes() + 1];
    let mut prev = vec![0u8; ihdr.row_bytes()];

    if ihdr.is_interlaced() {
        for pass in &ADAM7 {
            let (pw, ph) = pass.dimensions(ihdr.width, ihdr.height);
            if pw == 0 || ph == 0 {
                continue;
            }
            let len = ihdr.row_bytes_for(pw);
            prev[..len].fill(0);
            for py in 0..ph {
                let line = &mut line[..len + 1];
                inflater.read_exact(line).map_err(inflate_err)?;
                let (filter, row) = line.split_at_mut(1);
                unfilter_row(filter[0], row, &prev[..len], bpp)?;
                merge_pass_row(ihdr, rows, pass, py, row);
                prev[..len].copy_from_slice(row);
            }
        }
    } else {
        for row in rows.iter_mut() {
            inflater.read_exact(&mut line).map_err(inflate_err)?;
            let (filter, data) = line.split_at_mut(1);
            unfilter_row(filter[0], data, &prev, bpp)?;
            row.copy_from_slice(data);
            prev.copy_from_slice(data);
        }
    }

    let mut extra = [0u8; 1];
    if matches!(inflater.read(&mut extra), Ok(n) if n > 0) {
        hook.warn("Extra compressed data");
    }
    Ok(())
}
