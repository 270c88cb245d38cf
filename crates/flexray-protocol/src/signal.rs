//! Signal packing
//!
//! Maps named integer signals onto byte ranges of a frame payload. Each signal
//! is described by a [`SignalSpec`]: byte offset, byte length and a
//! [`SignalEncoding`] (signedness, width, byte order). A [`SignalLayout`]
//! groups the specs of one payload and rejects overlapping ranges, so packing
//! never depends on write order.
//!
//! Encodings can be written as compact format strings:
//!
//! | Format | Meaning |
//! |--------|---------|
//! | `B` / `b` | unsigned / signed byte |
//! | `>H` / `<h` | 16-bit big-endian unsigned / little-endian signed |
//! | `>I` / `<i` | 32-bit |
//! | `>Q` / `<q` | 64-bit |
//!
//! Values that do not fit their encoding are rejected rather than truncated.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::SignalError;

/// Decoded signal values by name
pub type SignalValues = BTreeMap<String, i128>;

/// Byte order of a multi-byte signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Endianness {
    /// Most significant byte first (Motorola)
    Big,
    /// Least significant byte first (Intel)
    Little,
}

/// Numeric encoding of a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SignalEncoding {
    pub signed: bool,
    /// Width in bytes: 1, 2, 4 or 8
    pub width: usize,
    pub endianness: Endianness,
}

impl SignalEncoding {
    pub const fn new(signed: bool, width: usize, endianness: Endianness) -> Self {
        Self {
            signed,
            width,
            endianness,
        }
    }

    pub const fn unsigned(width: usize, endianness: Endianness) -> Self {
        Self::new(false, width, endianness)
    }

    pub const fn signed(width: usize, endianness: Endianness) -> Self {
        Self::new(true, width, endianness)
    }

    fn has_supported_width(&self) -> bool {
        matches!(self.width, 1 | 2 | 4 | 8)
    }

    /// Smallest and largest representable values
    pub fn bounds(&self) -> (i128, i128) {
        let bits = self.width as u32 * 8;
        if self.signed {
            let half = 1i128 << (bits - 1);
            (-half, half - 1)
        } else {
            (0, (1i128 << bits) - 1)
        }
    }

    /// Whether a value fits this encoding
    pub fn fits(&self, value: i128) -> bool {
        let (min, max) = self.bounds();
        (min..=max).contains(&value)
    }

    /// Write a value that fits the encoding into exactly `width` bytes
    fn write(&self, value: i128, out: &mut [u8]) {
        let raw = value as u64;
        match self.endianness {
            Endianness::Big => out.copy_from_slice(&raw.to_be_bytes()[8 - self.width..]),
            Endianness::Little => out.copy_from_slice(&raw.to_le_bytes()[..self.width]),
        }
    }

    /// Read a value from exactly `width` bytes
    fn read(&self, bytes: &[u8]) -> i128 {
        let mut buf = [0u8; 8];
        let raw = match self.endianness {
            Endianness::Big => {
                buf[8 - self.width..].copy_from_slice(bytes);
                u64::from_be_bytes(buf)
            }
            Endianness::Little => {
                buf[..self.width].copy_from_slice(bytes);
                u64::from_le_bytes(buf)
            }
        };

        if self.signed {
            let shift = 64 - self.width as u32 * 8;
            i128::from(((raw << shift) as i64) >> shift)
        } else {
            i128::from(raw)
        }
    }
}

impl FromStr for SignalEncoding {
    type Err = SignalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || SignalError::InvalidFormat(s.to_string());

        let (endianness, code) = match s.as_bytes() {
            [b'>' | b'!', code] => (Some(Endianness::Big), *code),
            [b'<', code] => (Some(Endianness::Little), *code),
            [code] => (None, *code),
            _ => return Err(invalid()),
        };

        let width = match code.to_ascii_uppercase() {
            b'B' => 1,
            b'H' => 2,
            b'I' | b'L' => 4,
            b'Q' => 8,
            _ => return Err(invalid()),
        };

        // Multi-byte encodings must name their byte order
        let endianness = match (endianness, width) {
            (Some(order), _) => order,
            (None, 1) => Endianness::Big,
            (None, _) => return Err(invalid()),
        };

        Ok(Self::new(code.is_ascii_lowercase(), width, endianness))
    }
}

impl fmt::Display for SignalEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = match self.width {
            1 => 'B',
            2 => 'H',
            4 => 'I',
            8 => 'Q',
            _ => '?',
        };
        let code = if self.signed {
            code.to_ascii_lowercase()
        } else {
            code
        };
        if self.width == 1 {
            write!(f, "{}", code)
        } else {
            let order = match self.endianness {
                Endianness::Big => '>',
                Endianness::Little => '<',
            };
            write!(f, "{}{}", order, code)
        }
    }
}

/// One signal's placement in a payload
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SignalSpec {
    pub name: String,
    /// First byte of the signal
    pub offset: usize,
    /// Number of bytes; must equal the encoding width
    pub length: usize,
    pub encoding: SignalEncoding,
}

impl SignalSpec {
    pub fn new(name: impl Into<String>, offset: usize, encoding: SignalEncoding) -> Self {
        Self {
            name: name.into(),
            offset,
            length: encoding.width,
            encoding,
        }
    }

    /// Byte offset one past the signal, saturating at `usize::MAX`
    pub fn end(&self) -> usize {
        self.offset.saturating_add(self.length)
    }

    fn range_error(&self, available: usize) -> SignalError {
        SignalError::Range {
            name: self.name.clone(),
            offset: self.offset,
            end: self.end(),
            available,
        }
    }
}

/// Validated set of non-overlapping signals
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SignalLayout {
    signals: Vec<SignalSpec>,
}

impl SignalLayout {
    /// Build a layout, rejecting duplicates, width mismatches and overlaps
    pub fn new(signals: impl IntoIterator<Item = SignalSpec>) -> Result<Self, SignalError> {
        let signals: Vec<SignalSpec> = signals.into_iter().collect();

        for (index, spec) in signals.iter().enumerate() {
            if !spec.encoding.has_supported_width() {
                return Err(SignalError::InvalidFormat(format!(
                    "signal '{}' has unsupported width {}",
                    spec.name, spec.encoding.width
                )));
            }
            if spec.length != spec.encoding.width {
                return Err(SignalError::WidthMismatch {
                    name: spec.name.clone(),
                    length: spec.length,
                    width: spec.encoding.width,
                });
            }
            if spec.offset.checked_add(spec.length).is_none() {
                return Err(spec.range_error(usize::MAX));
            }
            if signals[..index].iter().any(|other| other.name == spec.name) {
                return Err(SignalError::Duplicate(spec.name.clone()));
            }
        }

        let mut by_offset: Vec<&SignalSpec> = signals.iter().collect();
        by_offset.sort_by_key(|spec| spec.offset);
        if let Some(pair) = by_offset.windows(2).find(|w| w[1].offset < w[0].end()) {
            return Err(SignalError::Overlap {
                first: pair[0].name.clone(),
                second: pair[1].name.clone(),
            });
        }

        Ok(Self { signals })
    }

    /// Build a layout from `(name, offset, length, format)` tuples
    pub fn from_formats<'a>(
        entries: impl IntoIterator<Item = (&'a str, usize, usize, &'a str)>,
    ) -> Result<Self, SignalError> {
        let specs = entries
            .into_iter()
            .map(|(name, offset, length, format)| -> Result<SignalSpec, SignalError> {
                Ok(SignalSpec {
                    name: name.to_string(),
                    offset,
                    length,
                    encoding: format.parse()?,
                })
            })
            .collect::<Result<Vec<_>, SignalError>>()?;
        Self::new(specs)
    }

    pub fn get(&self, name: &str) -> Option<&SignalSpec> {
        self.signals.iter().find(|spec| spec.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SignalSpec> {
        self.signals.iter()
    }

    pub fn len(&self) -> usize {
        self.signals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }

    /// Minimum payload length that holds every signal
    pub fn required_length(&self) -> usize {
        self.signals.iter().map(SignalSpec::end).max().unwrap_or(0)
    }

    pub fn pack(&self, values: &SignalValues, total_length: usize) -> Result<Vec<u8>, SignalError> {
        pack(values, self, total_length)
    }

    pub fn unpack(&self, bytes: &[u8]) -> Result<SignalValues, SignalError> {
        unpack(bytes, self)
    }
}

/// Pack values into a zero-filled payload of exactly `total_length` bytes
///
/// Signals without a value stay zero. A value for a signal the layout does
/// not define is an error.
pub fn pack(
    values: &SignalValues,
    layout: &SignalLayout,
    total_length: usize,
) -> Result<Vec<u8>, SignalError> {
    if let Some(name) = values.keys().find(|name| layout.get(name).is_none()) {
        return Err(SignalError::UnknownSignal(name.clone()));
    }

    let mut payload = vec![0u8; total_length];
    for spec in layout.iter() {
        if spec.end() > total_length {
            return Err(spec.range_error(total_length));
        }
        let Some(&value) = values.get(&spec.name) else {
            continue;
        };
        if !spec.encoding.fits(value) {
            return Err(SignalError::ValueOverflow {
                name: spec.name.clone(),
                value,
                encoding: spec.encoding.to_string(),
            });
        }
        spec.encoding.write(value, &mut payload[spec.offset..spec.end()]);
    }

    Ok(payload)
}

/// Decode every signal of a layout from a payload
pub fn unpack(bytes: &[u8], layout: &SignalLayout) -> Result<SignalValues, SignalError> {
    layout
        .iter()
        .map(|spec| -> Result<(String, i128), SignalError> {
            let raw = bytes
                .get(spec.offset..spec.end())
                .ok_or_else(|| spec.range_error(bytes.len()))?;
            Ok((spec.name.clone(), spec.encoding.read(raw)))
        })
        .collect()
}
