//! Component B: the attribute decoder table.
//!
//! A fixed, closed set of decoders keyed by lowercase type name, each with
//! the uniform contract `(&[u8]) -> Result<(usize, String)>` plus an
//! alignment prefix computed from the attribute's running offset into the
//! tuple's data area.

use std::str::FromStr;

use strum_macros::{Display, EnumString};

use crate::constants::{self, numeric as num};
use crate::endian::Endianness;
use crate::error::{DecodeError, DecodeResult};
use crate::varlena::{self, EscapeMode, ResolveOptions, ToastFetcher, VarlenaView};

/// The closed set of attribute types this inspector can render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display)]
#[strum(serialize_all = "lowercase")]
pub enum AttrType {
    #[strum(serialize = "smallint", serialize = "smallserial")]
    SmallInt,
    #[strum(serialize = "int", serialize = "serial")]
    Int,
    #[strum(serialize = "oid", serialize = "xid")]
    OidXid,
    #[strum(serialize = "bigint", serialize = "bigserial")]
    BigInt,
    #[strum(serialize = "real", serialize = "float4")]
    Float4,
    #[strum(serialize = "float", serialize = "float8")]
    Float8,
    Bool,
    Uuid,
    MacAddr,
    Date,
    Time,
    TimeTz,
    Timestamp,
    TimestampTz,
    Char,
    Name,
    Numeric,
    #[strum(
        serialize = "charn",
        serialize = "varchar",
        serialize = "varcharn",
        serialize = "text",
        serialize = "json",
        serialize = "xml"
    )]
    VarlenaText,
    #[strum(serialize = "~")]
    Ignore,
}

impl AttrType {
    pub fn parse_list(s: &str) -> DecodeResult<Vec<AttrType>> {
        s.split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(|t| {
                AttrType::from_str(&t.to_ascii_lowercase())
                    .map_err(|_| DecodeError::UnknownTypeName(t.to_string()))
            })
            .collect()
    }

    fn align(self) -> usize {
        match self {
            AttrType::SmallInt => 2,
            AttrType::Int | AttrType::OidXid | AttrType::Float4 | AttrType::MacAddr | AttrType::Date => 4,
            AttrType::BigInt
            | AttrType::Float8
            | AttrType::Time
            | AttrType::TimeTz
            | AttrType::Timestamp
            | AttrType::TimestampTz => 8,
            AttrType::Bool | AttrType::Uuid | AttrType::Char | AttrType::Name => 1,
            AttrType::Numeric | AttrType::VarlenaText => 4,
            AttrType::Ignore => 1,
        }
    }

    /// Decode one attribute out of `buf`, whose first byte sits at cumulative
    /// tuple-data offset `offset` (used purely to compute alignment
    /// padding). Returns `(bytes_consumed, rendered_bytes)` -- bytes, not a
    /// `String`, so text/char/name attributes stay byte-accurate for
    /// non-UTF-8 data.
    pub fn decode(
        self,
        buf: &[u8],
        offset: usize,
        endian: Endianness,
        opts: &ResolveOptions,
        toast: &mut dyn ToastFetcher,
    ) -> DecodeResult<(usize, Vec<u8>)> {
        if self == AttrType::Ignore {
            return Ok((buf.len(), Vec::new()));
        }

        let align = self.align();
        let padding = pad_for(offset, align);
        if padding > buf.len() {
            return Err(DecodeError::BadAlignment {
                align,
                available: buf.len(),
            });
        }
        let body = &buf[padding..];

        let (body_len, bytes) = match self {
            AttrType::SmallInt => {
                let v = take(body, 2)?;
                (2, endian.read_i16(v).to_string().into_bytes())
            }
            AttrType::Int => {
                let v = take(body, 4)?;
                (4, endian.read_i32(v).to_string().into_bytes())
            }
            AttrType::OidXid => {
                let v = take(body, 4)?;
                (4, endian.read_u32(v).to_string().into_bytes())
            }
            AttrType::BigInt => {
                let v = take(body, 8)?;
                (8, endian.read_i64(v).to_string().into_bytes())
            }
            AttrType::Float4 => {
                let v = take(body, 4)?;
                let bits = endian.read_u32(v);
                (4, format!("{:.12}", f32::from_bits(bits)).into_bytes())
            }
            AttrType::Float8 => {
                let v = take(body, 8)?;
                let bits = endian.read_u64(v);
                (8, format!("{:.12}", f64::from_bits(bits)).into_bytes())
            }
            AttrType::Bool => {
                let v = take(body, 1)?;
                (1, if v[0] != 0 { b"t".to_vec() } else { b"f".to_vec() })
            }
            AttrType::Uuid => {
                let v = take(body, 16)?;
                (16, format_uuid(v).into_bytes())
            }
            AttrType::MacAddr => {
                let v = take(body, 6)?;
                (
                    6,
                    v.iter()
                        .map(|b| format!("{:02x}", b))
                        .collect::<Vec<_>>()
                        .join(":")
                        .into_bytes(),
                )
            }
            AttrType::Date => {
                let v = take(body, 4)?;
                let raw = endian.read_i32(v);
                (4, format_date(raw).into_bytes())
            }
            AttrType::Time => {
                let v = take(body, 8)?;
                let usecs = endian.read_i64(v);
                (8, format_time_of_day(usecs).into_bytes())
            }
            AttrType::TimeTz => {
                let v = take(body, 12)?;
                let usecs = endian.read_i64(&v[0..8]);
                let tz_sec = endian.read_i32(&v[8..12]);
                (12, format_timetz(usecs, tz_sec).into_bytes())
            }
            AttrType::Timestamp => {
                let v = take(body, 8)?;
                let raw = endian.read_i64(v);
                (8, format_timestamp(raw, false).into_bytes())
            }
            AttrType::TimestampTz => {
                let v = take(body, 8)?;
                let raw = endian.read_i64(v);
                (8, format_timestamp(raw, true).into_bytes())
            }
            AttrType::Char => {
                let v = take(body, 1)?;
                (1, escape_bytes_with_mode(v, opts.escape_mode))
            }
            AttrType::Name => {
                let v = take(body, constants::NAMEDATALEN)?;
                let end = v.iter().position(|&b| b == 0).unwrap_or(v.len());
                (constants::NAMEDATALEN, escape_bytes_with_mode(&v[..end], opts.escape_mode))
            }
            AttrType::Numeric => {
                let resolved =
                    varlena::resolve_varlena(body, endian, opts, toast)?;
                let bytes = match &resolved.view {
                    VarlenaView::Inline(bytes) => format_numeric(bytes, endian)?.into_bytes(),
                    VarlenaView::Unresolved { sentinel, .. } => sentinel.clone().into_bytes(),
                };
                (resolved.consumed, bytes)
            }
            AttrType::VarlenaText => {
                let resolved =
                    varlena::resolve_varlena(body, endian, opts, toast)?;
                let bytes = match &resolved.view {
                    VarlenaView::Inline(bytes) => escape_bytes_with_mode(bytes, opts.escape_mode),
                    VarlenaView::Unresolved { sentinel, .. } => sentinel.clone().into_bytes(),
                };
                (resolved.consumed, bytes)
            }
            AttrType::Ignore => unreachable!(),
        };

        Ok((padding + body_len, bytes))
    }
}

fn pad_for(offset: usize, align: usize) -> usize {
    if align <= 1 {
        return 0;
    }
    (align - (offset % align)) % align
}

fn take(buf: &[u8], n: usize) -> DecodeResult<&[u8]> {
    if buf.len() < n {
        Err(DecodeError::ShortBuffer {
            needed: n,
            available: buf.len(),
        })
    } else {
        Ok(&buf[..n])
    }
}

fn format_uuid(b: &[u8]) -> String {
    format!(
        "{:02x}{:02x}{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
        b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7], b[8], b[9], b[10], b[11], b[12], b[13], b[14], b[15]
    )
}

fn format_date(raw: i32) -> String {
    if raw == i32::MIN {
        return "-infinity".to_string();
    }
    if raw == i32::MAX {
        return "infinity".to_string();
    }
    let jd = raw as i64 + constants::POSTGRES_EPOCH_JDATE as i64;
    let (year, month, day) = crate::juliandate::j2date(jd);
    if year <= 0 {
        format!("{:04}-{:02}-{:02} BC", -year + 1, month, day)
    } else {
        format!("{:04}-{:02}-{:02}", year, month, day)
    }
}

fn format_time_of_day(usecs: i64) -> String {
    let sec = usecs.div_euclid(1_000_000);
    let frac = usecs.rem_euclid(1_000_000);
    format!(
        "{:02}:{:02}:{:02}.{:06}",
        sec / 3600,
        (sec / 60) % 60,
        sec % 60,
        frac
    )
}

fn format_timetz(usecs: i64, tz_sec: i32) -> String {
    let base = format_time_of_day(usecs);
    let tz_min_total = -(tz_sec / 60);
    let sign = if tz_min_total >= 0 { '+' } else { '-' };
    format!(
        "{}{}{:02}:{:02}",
        base,
        sign,
        (tz_min_total / 60).abs(),
        (tz_min_total % 60).abs()
    )
}

fn format_timestamp(raw: i64, tz: bool) -> String {
    if raw == i64::MIN {
        return "-infinity".to_string();
    }
    if raw == i64::MAX {
        return "infinity".to_string();
    }

    let mut timestamp = raw;
    let mut jd = timestamp.div_euclid(constants::USECS_PER_DAY);
    if jd != 0 {
        timestamp -= jd * constants::USECS_PER_DAY;
    }
    if timestamp < 0 {
        timestamp += constants::USECS_PER_DAY;
        jd -= 1;
    }
    jd += constants::POSTGRES_EPOCH_JDATE as i64;

    let (year, month, day) = crate::juliandate::j2date(jd);
    let sec = timestamp.div_euclid(1_000_000);
    let frac = timestamp.rem_euclid(1_000_000);

    let mut s = if year <= 0 {
        format!(
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}.{:06}",
            -year + 1,
            month,
            day,
            sec / 3600,
            (sec / 60) % 60,
            sec % 60,
            frac
        )
    } else {
        format!(
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}.{:06}",
            year,
            month,
            day,
            sec / 3600,
            (sec / 60) % 60,
            sec % 60,
            frac
        )
    };
    if tz {
        s.push_str("+00");
    }
    if year <= 0 {
        s.push_str(" BC");
    }
    s
}

/// Replace control characters per the source's field-escaping rules. Note
/// the embedded-tab case: the original emits `\r` for a literal tab byte
/// rather than `\t`; see [`EscapeMode`] / [`escape_bytes_with_mode`] for the
/// opt-in corrected behavior. Every other byte, including anything >= 0x80,
/// passes through unchanged -- this returns raw bytes rather than a `String`
/// so a non-UTF-8 attribute doesn't get widened into multi-byte UTF-8.
pub fn escape_bytes(b: &[u8]) -> Vec<u8> {
    escape_bytes_with_mode(b, EscapeMode::BugForBug)
}

pub fn escape_bytes_with_mode(b: &[u8], mode: EscapeMode) -> Vec<u8> {
    let mut out = Vec::with_capacity(b.len());
    for &byte in b {
        match byte {
            0x00 => out.extend_from_slice(b"\\0"),
            b'\r' => out.extend_from_slice(b"\\r"),
            b'\n' => out.extend_from_slice(b"\\n"),
            b'\t' => match mode {
                EscapeMode::BugForBug => out.extend_from_slice(b"\\r"),
                EscapeMode::Corrected => out.extend_from_slice(b"\\t"),
            },
            b'\\' => out.extend_from_slice(b"\\\\"),
            other => out.push(other),
        }
    }
    out
}

/// Decode a numeric varlena payload (header + base-10000 digits) into its
/// decimal text rendering.
pub fn format_numeric(buf: &[u8], endian: Endianness) -> DecodeResult<String> {
    if buf.len() < 2 {
        return Err(DecodeError::ShortBuffer {
            needed: 2,
            available: buf.len(),
        });
    }
    let header = endian.read_u16(&buf[0..2]);
    let flag = header & num::SIGN_MASK;

    if flag == num::SPECIAL {
        return Ok(match header {
            num::EXT_NAN => "NaN".to_string(),
            num::EXT_PINF => "Infinity".to_string(),
            num::EXT_NINF => "-Infinity".to_string(),
            _ => "NaN".to_string(),
        });
    }

    let (header_size, sign_neg, dscale, weight): (usize, bool, u16, i32) = if flag == num::SHORT {
        let sign_neg = header & num::SHORT_SIGN_MASK != 0;
        let dscale = (header & num::SHORT_DSCALE_MASK) >> num::SHORT_DSCALE_SHIFT;
        let mag = (header & num::SHORT_WEIGHT_MASK) as i32;
        let weight = if header & num::SHORT_WEIGHT_SIGN_MASK != 0 {
            -(mag + 1)
        } else {
            mag
        };
        (2, sign_neg, dscale, weight)
    } else {
        // long form: 2-byte sign/dscale header, then a 2-byte weight.
        if buf.len() < 4 {
            return Err(DecodeError::ShortBuffer {
                needed: 4,
                available: buf.len(),
            });
        }
        let sign_neg = flag == num::NEG;
        let dscale = header & num::DSCALE_MASK;
        let weight = endian.read_i16(&buf[2..4]) as i32;
        (4, sign_neg, dscale, weight)
    };

    let digit_bytes = &buf[header_size..];
    let ndigits = digit_bytes.len() / 2;
    if ndigits == 0 {
        return Ok("0".to_string());
    }
    let digits: Vec<i16> = (0..ndigits)
        .map(|i| endian.read_i16(&digit_bytes[i * 2..i * 2 + 2]))
        .collect();

    Ok(render_numeric_digits(sign_neg, weight, dscale as u32, &digits))
}

fn render_numeric_digits(sign_neg: bool, weight: i32, dscale: u32, digits: &[i16]) -> String {
    let ndigits = digits.len() as i32;
    let digit_at = |pos: i32| -> i32 {
        if pos < 0 || pos >= ndigits {
            0
        } else {
            digits[pos as usize] as i32
        }
    };

    let mut s = String::new();
    if sign_neg {
        s.push('-');
    }

    if weight >= 0 {
        s.push_str(&digit_at(0).to_string());
        for pos in 1..=weight {
            s.push_str(&format!("{:04}", digit_at(pos)));
        }
    } else {
        s.push('0');
    }

    if dscale > 0 {
        s.push('.');
        let mut produced = 0u32;
        let mut pos = weight + 1;
        while produced < dscale {
            let group = format!("{:04}", digit_at(pos));
            let take = (dscale - produced).min(num::DEC_DIGITS);
            s.push_str(&group[..take as usize]);
            produced += take;
            pos += 1;
        }
    }

    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::varlena::NoToast;

    fn le() -> Endianness {
        Endianness::Little
    }

    #[test]
    fn parses_list_with_trailing_ignore() {
        let types = AttrType::parse_list("int, text, ~").unwrap();
        assert_eq!(types, vec![AttrType::Int, AttrType::VarlenaText, AttrType::Ignore]);
    }

    #[test]
    fn unknown_type_name_errors() {
        assert!(AttrType::parse_list("nonsense").is_err());
    }

    #[test]
    fn int_decodes_little_endian() {
        let buf = [0x01u8, 0x02, 0x03, 0x04];
        let mut toast = NoToast;
        let (consumed, text) = AttrType::Int
            .decode(&buf, 0, le(), &ResolveOptions::default(), &mut toast)
            .unwrap();
        assert_eq!(consumed, 4);
        assert_eq!(text, b"67305985".to_vec());
    }

    #[test]
    fn alignment_consumes_leading_zero_padding() {
        // offset = 1, align(int) = 4 -> padding = 3.
        let buf = [0u8, 0u8, 0u8, 9, 0, 0, 0];
        let mut toast = NoToast;
        let (consumed, text) = AttrType::Int
            .decode(&buf, 1, le(), &ResolveOptions::default(), &mut toast)
            .unwrap();
        assert_eq!(consumed, 3 + 4);
        assert_eq!(text, b"9".to_vec());
    }

    #[test]
    fn bool_renders_t_or_f() {
        let mut toast = NoToast;
        let (_, t) = AttrType::Bool
            .decode(&[1], 0, le(), &ResolveOptions::default(), &mut toast)
            .unwrap();
        let (_, f) = AttrType::Bool
            .decode(&[0], 0, le(), &ResolveOptions::default(), &mut toast)
            .unwrap();
        assert_eq!(t, b"t".to_vec());
        assert_eq!(f, b"f".to_vec());
    }

    #[test]
    fn date_sentinels() {
        assert_eq!(format_date(i32::MIN), "-infinity");
        assert_eq!(format_date(i32::MAX), "infinity");
    }

    #[test]
    fn numeric_zero_digits_is_zero_regardless_of_weight_dscale() {
        // SHORT header, weight bits set nonzero, dscale nonzero, but 0 digits.
        let mut header = num::SHORT;
        header |= 3 << num::SHORT_DSCALE_SHIFT;
        let buf = header.to_le_bytes();
        assert_eq!(format_numeric(&buf, le()).unwrap(), "0");
    }

    #[test]
    fn numeric_negative_with_dscale() {
        // LONG form: header (NEG, dscale=2), weight=0, digits=[123, 4500]
        let mut buf = Vec::new();
        let header = num::NEG | 2u16;
        buf.extend_from_slice(&header.to_le_bytes());
        buf.extend_from_slice(&0i16.to_le_bytes()); // weight
        buf.extend_from_slice(&123i16.to_le_bytes());
        buf.extend_from_slice(&4500i16.to_le_bytes());
        assert_eq!(format_numeric(&buf, le()).unwrap(), "-123.45");
    }

    #[test]
    fn numeric_special_forms() {
        assert_eq!(
            format_numeric(&num::EXT_NAN.to_le_bytes(), le()).unwrap(),
            "NaN"
        );
        assert_eq!(
            format_numeric(&num::EXT_PINF.to_le_bytes(), le()).unwrap(),
            "Infinity"
        );
        assert_eq!(
            format_numeric(&num::EXT_NINF.to_le_bytes(), le()).unwrap(),
            "-Infinity"
        );
    }

    #[test]
    fn escape_replaces_tab_with_cr_by_default() {
        assert_eq!(escape_bytes(b"a\tb"), b"a\\rb".to_vec());
        assert_eq!(
            escape_bytes_with_mode(b"a\tb", EscapeMode::Corrected),
            b"a\\tb".to_vec()
        );
    }

    #[test]
    fn escape_handles_embedded_nul_without_truncating() {
        assert_eq!(escape_bytes(b"a\0b"), b"a\\0b".to_vec());
    }

    #[test]
    fn escape_passes_high_bytes_through_unchanged() {
        // 0xFF and 0x80 aren't valid UTF-8 on their own; a byte sink must
        // still carry them through untouched instead of widening them.
        let input = [0x41u8, 0xFF, 0x80, 0x01];
        assert_eq!(escape_bytes(&input), vec![0x41, 0xFF, 0x80, 0x01]);
    }
}
