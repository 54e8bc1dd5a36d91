use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::Path;

use byteorder::{BigEndian, ByteOrder, WriteBytesExt};
use memmap2::Mmap;
use ndarray::Array2;

use crate::consts::{FITS_BLOCK_SIZE, FITS_CARD_SIZE};
use crate::error::{EpochRegError, Result};

/// Cards describing the data layout; rewritten on every write.
const STRUCTURAL_KEYS: [&str; 8] = [
    "SIMPLE", "BITPIX", "NAXIS", "NAXIS1", "NAXIS2", "EXTEND", "BSCALE", "BZERO",
];

/// Value of a FITS header card.
#[derive(Clone, Debug, PartialEq)]
pub enum HeaderValue {
    Str(String),
    Logical(bool),
    Int(i64),
    Float(f64),
}

impl From<&str> for HeaderValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for HeaderValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<bool> for HeaderValue {
    fn from(value: bool) -> Self {
        Self::Logical(value)
    }
}

impl From<i64> for HeaderValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for HeaderValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

/// Keyword/value cards of a primary header, in file order.
/// Commentary cards (`COMMENT`, `HISTORY`, blank) are not kept.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FitsHeader {
    cards: Vec<(String, HeaderValue)>,
}

impl FitsHeader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style `set`.
    pub fn with(mut self, key: &str, value: impl Into<HeaderValue>) -> Self {
        self.set(key, value);
        self
    }

    /// Replace the value of `key`, or append it.
    pub fn set(&mut self, key: &str, value: impl Into<HeaderValue>) {
        let key = key.to_uppercase();
        let value = value.into();
        match self.cards.iter_mut().find(|(k, _)| *k == key) {
            Some(card) => card.1 = value,
            None => self.cards.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&HeaderValue> {
        self.cards
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v)
    }

    /// String form of a value; numbers are rendered as written.
    pub fn get_str(&self, key: &str) -> Option<String> {
        match self.get(key)? {
            HeaderValue::Str(s) => {
                let s = s.trim();
                (!s.is_empty()).then(|| s.to_string())
            }
            HeaderValue::Int(i) => Some(i.to_string()),
            HeaderValue::Float(x) => Some(x.to_string()),
            HeaderValue::Logical(b) => Some(if *b { "T" } else { "F" }.to_string()),
        }
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        match self.get(key)? {
            HeaderValue::Float(x) => Some(*x),
            HeaderValue::Int(i) => Some(*i as f64),
            HeaderValue::Str(s) => s.trim().parse().ok(),
            HeaderValue::Logical(_) => None,
        }
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        match self.get(key)? {
            HeaderValue::Int(i) => Some(*i),
            HeaderValue::Str(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &HeaderValue)> {
        self.cards.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }
}

fn invalid(path: &Path, reason: impl Into<String>) -> EpochRegError {
    EpochRegError::InvalidFits {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

/// Parse the primary header at the start of `bytes`.
///
/// Returns the header and the byte offset of the data unit (the header
/// length rounded up to whole 2880-byte blocks).
pub fn parse_header(bytes: &[u8], path: &Path) -> Result<(FitsHeader, usize)> {
    let mut header = FitsHeader::new();
    for (index, card) in bytes.chunks_exact(FITS_CARD_SIZE).enumerate() {
        if !card.is_ascii() {
            return Err(invalid(path, format!("non-ASCII header card {}", index + 1)));
        }
        // Checked above: every byte is ASCII, so slicing is on char boundaries.
        let text = std::str::from_utf8(card).map_err(|e| invalid(path, e.to_string()))?;
        let keyword = text[..8].trim_end();
        if index == 0 && keyword != "SIMPLE" {
            return Err(invalid(path, "first card is not SIMPLE"));
        }
        if keyword == "END" {
            let header_bytes = (index + 1) * FITS_CARD_SIZE;
            let blocks = header_bytes.div_ceil(FITS_BLOCK_SIZE);
            return Ok((header, blocks * FITS_BLOCK_SIZE));
        }
        if &text[8..10] != "= " {
            continue;
        }
        if let Some(value) = parse_value(&text[10..]) {
            header.cards.push((keyword.to_string(), value));
        }
    }
    Err(invalid(path, "missing END card"))
}

fn parse_value(raw: &str) -> Option<HeaderValue> {
    let raw = raw.trim_start();
    if let Some(rest) = raw.strip_prefix('\'') {
        let mut value = String::new();
        let mut chars = rest.chars().peekable();
        while let Some(c) = chars.next() {
            if c != '\'' {
                value.push(c);
            } else if chars.peek() == Some(&'\'') {
                value.push('\'');
                chars.next();
            } else {
                return Some(HeaderValue::Str(value.trim_end().to_string()));
            }
        }
        return None;
    }

    let token = raw.split('/').next().unwrap_or_default().trim();
    match token {
        "" => None,
        "T" => Some(HeaderValue::Logical(true)),
        "F" => Some(HeaderValue::Logical(false)),
        _ => {
            if let Ok(i) = token.parse::<i64>() {
                Some(HeaderValue::Int(i))
            } else if let Ok(x) = token.replace(['D', 'd'], "E").parse::<f64>() {
                Some(HeaderValue::Float(x))
            } else {
                Some(HeaderValue::Str(token.to_string()))
            }
        }
    }
}

fn block_has_end(block: &[u8]) -> bool {
    block
        .chunks_exact(FITS_CARD_SIZE)
        .any(|card| &card[..8] == b"END     ")
}

/// Read only the primary header of a FITS file, block by block.
pub fn read_header(path: &Path) -> Result<FitsHeader> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut bytes = Vec::new();
    let mut block = vec![0u8; FITS_BLOCK_SIZE];
    loop {
        reader.read_exact(&mut block).map_err(|e| match e.kind() {
            ErrorKind::UnexpectedEof => invalid(path, "truncated header"),
            _ => EpochRegError::Io(e),
        })?;
        bytes.extend_from_slice(&block);
        if block_has_end(&block) {
            break;
        }
    }
    parse_header(&bytes, path).map(|(header, _)| header)
}

/// A 2-D primary-HDU image. Pixel data is row-major, shape = (NAXIS2, NAXIS1).
#[derive(Clone, Debug)]
pub struct FitsImage {
    pub header: FitsHeader,
    pub data: Array2<f32>,
}

impl FitsImage {
    pub fn new(data: Array2<f32>, header: FitsHeader) -> Self {
        Self { header, data }
    }

    /// Memory-map a FITS file and decode its primary image as f32,
    /// applying BSCALE/BZERO.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let mmap = unsafe { Mmap::map(&file)? };
        let (header, offset) = parse_header(&mmap, path)?;

        let bitpix = header
            .get_i64("BITPIX")
            .ok_or_else(|| invalid(path, "missing BITPIX"))?;
        let naxis = header.get_i64("NAXIS").unwrap_or(0);
        if naxis != 2 {
            return Err(invalid(
                path,
                format!("expected a 2-D primary image, NAXIS = {naxis}"),
            ));
        }
        let axis = |key: &str| -> Result<usize> {
            let value = header
                .get_i64(key)
                .ok_or_else(|| invalid(path, format!("missing {key}")))?;
            usize::try_from(value).map_err(|_| invalid(path, format!("invalid {key} = {value}")))
        };
        let width = axis("NAXIS1")?;
        let height = axis("NAXIS2")?;

        let bytes_per_pixel = (bitpix.unsigned_abs() / 8) as usize;
        let end = width
            .checked_mul(height)
            .and_then(|pixels| pixels.checked_mul(bytes_per_pixel))
            .and_then(|bytes| bytes.checked_add(offset))
            .ok_or_else(|| invalid(path, format!("image size {width} x {height} overflows")))?;
        if mmap.len() < end {
            return Err(invalid(
                path,
                format!("data truncated: expected {end} bytes, got {}", mmap.len()),
            ));
        }
        let raw = &mmap[offset..end];

        let bscale = header.get_f64("BSCALE").unwrap_or(1.0);
        let bzero = header.get_f64("BZERO").unwrap_or(0.0);
        let values = match bitpix {
            8 => decode(raw, 1, |b| b[0] as f64, bscale, bzero),
            16 => decode(raw, 2, |b| BigEndian::read_i16(b) as f64, bscale, bzero),
            32 => decode(raw, 4, |b| BigEndian::read_i32(b) as f64, bscale, bzero),
            -32 => decode(raw, 4, |b| BigEndian::read_f32(b) as f64, bscale, bzero),
            -64 => decode(raw, 8, BigEndian::read_f64, bscale, bzero),
            other => return Err(invalid(path, format!("unsupported BITPIX {other}"))),
        };

        let data = Array2::from_shape_vec((height, width), values)
            .map_err(|e| EpochRegError::DimensionMismatch(e.to_string()))?;
        Ok(Self { header, data })
    }

    /// Write as a BITPIX -32 primary image. Non-structural header cards
    /// are carried over.
    pub fn write(&self, path: &Path) -> Result<()> {
        let (height, width) = self.data.dim();
        let mut cards = vec![
            format_card("SIMPLE", &HeaderValue::Logical(true)),
            format_card("BITPIX", &HeaderValue::Int(-32)),
            format_card("NAXIS", &HeaderValue::Int(2)),
            format_card("NAXIS1", &HeaderValue::Int(width as i64)),
            format_card("NAXIS2", &HeaderValue::Int(height as i64)),
        ];
        for (key, value) in self.header.iter() {
            if !STRUCTURAL_KEYS.contains(&key) {
                cards.push(format_card(key, value));
            }
        }
        cards.push(format!("{:<80}", "END"));

        let mut out = BufWriter::new(File::create(path)?);
        for card in &cards {
            out.write_all(card.as_bytes())?;
        }
        pad_block(&mut out, cards.len() * FITS_CARD_SIZE, b' ')?;

        for &value in self.data.iter() {
            out.write_f32::<BigEndian>(value)?;
        }
        pad_block(&mut out, self.data.len() * 4, 0)?;
        out.flush()?;
        Ok(())
    }
}

fn decode(
    raw: &[u8],
    width: usize,
    read: impl Fn(&[u8]) -> f64,
    bscale: f64,
    bzero: f64,
) -> Vec<f32> {
    raw.chunks_exact(width)
        .map(|chunk| (read(chunk) * bscale + bzero) as f32)
        .collect()
}

fn pad_block(out: &mut impl Write, written: usize, fill: u8) -> Result<()> {
    let remainder = written % FITS_BLOCK_SIZE;
    if remainder != 0 {
        out.write_all(&vec![fill; FITS_BLOCK_SIZE - remainder])?;
    }
    Ok(())
}

/// Render one 80-character header card.
pub fn format_card(key: &str, value: &HeaderValue) -> String {
    let key: String = key.chars().take(8).collect();
    let value = match value {
        HeaderValue::Str(s) => format!("'{:<8}'", s.replace('\'', "''")),
        HeaderValue::Logical(b) => format!("{:>20}", if *b { "T" } else { "F" }),
        HeaderValue::Int(i) => format!("{i:>20}"),
        HeaderValue::Float(x) => format!("{:>20}", format!("{x:.12E}")),
    };
    let card: String = format!("{key:<8}= {value}")
        .chars()
        .filter(char::is_ascii)
        .take(FITS_CARD_SIZE)
        .collect();
    format!("{card:<80}")
}
