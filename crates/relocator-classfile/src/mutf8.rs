//! Modified UTF-8 as stored in `CONSTANT_Utf8` entries.

use crate::error::{Error, Result};

/// Unpaired surrogates cannot live in a Rust `String`. Each one decodes to
/// `SURROGATE_ESCAPE + (unit - 0xD800)`, the last 2048 code points of plane
/// 16, and encodes back to the lone unit, so such text still round-trips and
/// can be edited like any other.
pub const SURROGATE_ESCAPE: u32 = 0x10_F800;

/// Decoded text plus whether it re-encodes to the same bytes.
pub(crate) struct Decoded {
    pub(crate) text: String,
    pub(crate) exact: bool,
}

pub(crate) fn decode(bytes: &[u8]) -> Result<Decoded> {
    let mut units = Vec::with_capacity(bytes.len());
    let mut i = 0;
    let mut exact = true;
    while i < bytes.len() {
        let b = bytes[i];
        if b & 0x80 == 0 {
            if b == 0 {
                exact = false;
            }
            units.push(b as u16);
            i += 1;
        } else if b & 0xE0 == 0xC0 {
            let b2 = *bytes.get(i + 1).ok_or(Error::InvalidModifiedUtf8)?;
            if b2 & 0xC0 != 0x80 {
                return Err(Error::InvalidModifiedUtf8);
            }
            let unit = (((b & 0x1F) as u16) << 6) | (b2 & 0x3F) as u16;
            if unit != 0 && unit < 0x80 {
                exact = false;
            }
            units.push(unit);
            i += 2;
        } else if b & 0xF0 == 0xE0 {
            let b2 = *bytes.get(i + 1).ok_or(Error::InvalidModifiedUtf8)?;
            let b3 = *bytes.get(i + 2).ok_or(Error::InvalidModifiedUtf8)?;
            if b2 & 0xC0 != 0x80 || b3 & 0xC0 != 0x80 {
                return Err(Error::InvalidModifiedUtf8);
            }
            let unit =
                (((b & 0x0F) as u16) << 12) | (((b2 & 0x3F) as u16) << 6) | (b3 & 0x3F) as u16;
            if unit < 0x800 {
                exact = false;
            }
            units.push(unit);
            i += 3;
        } else {
            return Err(Error::InvalidModifiedUtf8);
        }
    }

    let mut text = String::with_capacity(units.len());
    for ch in char::decode_utf16(units) {
        match ch {
            // A genuine character in the escape range would come back as a
            // lone surrogate.
            Ok(ch) if u32::from(ch) >= SURROGATE_ESCAPE => {
                exact = false;
                text.push(ch);
            }
            Ok(ch) => text.push(ch),
            Err(err) => text.push(escape_surrogate(err.unpaired_surrogate())),
        }
    }
    Ok(Decoded { text, exact })
}

pub(crate) fn encode(text: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len());
    let mut buf = [0u16; 2];
    for ch in text.chars() {
        let units = match unescape_surrogate(ch) {
            Some(unit) => {
                buf[0] = unit;
                &buf[..1]
            }
            None => &*ch.encode_utf16(&mut buf),
        };
        for &unit in units {
            match unit {
                0x0001..=0x007F => out.push(unit as u8),
                0x0000 | 0x0080..=0x07FF => {
                    out.push(0xC0 | ((unit >> 6) & 0x1F) as u8);
                    out.push(0x80 | (unit & 0x3F) as u8);
                }
                _ => {
                    out.push(0xE0 | ((unit >> 12) & 0x0F) as u8);
                    out.push(0x80 | ((unit >> 6) & 0x3F) as u8);
                    out.push(0x80 | (unit & 0x3F) as u8);
                }
            }
        }
    }
    out
}

fn escape_surrogate(unit: u16) -> char {
    // Lone surrogates are 0xD800..=0xDFFF, so the result is at most 0x10FFFF.
    char::from_u32(SURROGATE_ESCAPE + u32::from(unit - 0xD800))
        .unwrap_or(char::REPLACEMENT_CHARACTER)
}

fn unescape_surrogate(ch: char) -> Option<u16> {
    let offset = u32::from(ch).checked_sub(SURROGATE_ESCAPE)?;
    u16::try_from(0xD800 + offset).ok()
}
