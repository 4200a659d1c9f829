//! Component A: the varlena resolver.
//!
//! Classifies the header byte(s) of a varlena-encoded value and returns a
//! view of its logical payload, decompressing or handing off to the TOAST
//! reassembler as required.

use std::borrow::Cow;

use crate::codec::{self, CompressionMethod};
use crate::endian::Endianness;
use crate::error::{DecodeError, DecodeResult};

/// The compression method recorded in an external TOAST pointer's `extinfo`
/// word, or inline in a 4-byte compressed varlena header.
pub use crate::codec::CompressionMethod as VarlenaCompressionMethod;

/// `varatt_external`: the 18-byte struct that follows the `0x01` tag byte of
/// an on-disk TOAST pointer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VarattExternal {
    pub rawsize: u32,
    pub extsize: u32,
    pub comp_method: CompressionMethod,
    pub value_id: u32,
    pub toastrelid: u32,
}

pub const VARATT_EXTERNAL_SIZE: usize = 18;

impl VarattExternal {
    fn parse(buf: &[u8], endian: Endianness) -> DecodeResult<Self> {
        if buf.len() < VARATT_EXTERNAL_SIZE {
            return Err(DecodeError::ShortBuffer {
                needed: VARATT_EXTERNAL_SIZE,
                available: buf.len(),
            });
        }
        let rawsize = endian.read_u32(&buf[0..4]);
        let extinfo = endian.read_u32(&buf[4..8]);
        let value_id = endian.read_u32(&buf[8..12]);
        let toastrelid = endian.read_u32(&buf[12..16]);
        let extsize = extinfo & 0x3FFF_FFFF;
        let comp_method = CompressionMethod::from_extinfo_bits((extinfo >> 30) as u8);
        Ok(VarattExternal {
            rawsize,
            extsize,
            comp_method,
            value_id,
            toastrelid,
        })
    }
}

/// Trait implemented by the TOAST reassembler (component F) so the resolver
/// doesn't need to know about files or page layout.
pub trait ToastFetcher {
    fn fetch(&mut self, pointer: &VarattExternal) -> DecodeResult<Vec<u8>>;
}

/// A `ToastFetcher` that always refuses -- used when TOAST resolution is
/// disabled, so the resolver falls back to the textual sentinel.
pub struct NoToast;

impl ToastFetcher for NoToast {
    fn fetch(&mut self, _pointer: &VarattExternal) -> DecodeResult<Vec<u8>> {
        Err(DecodeError::ToastOpenFailed {
            toastrelid: 0,
            reason: "TOAST resolution disabled".to_string(),
        })
    }
}

/// The classified, resolved form of a varlena value.
#[derive(Debug, Clone, PartialEq)]
pub enum VarlenaView<'a> {
    /// Bytes are directly readable -- either always were, or were produced
    /// by decompression / TOAST reassembly into a private buffer.
    Inline(Cow<'a, [u8]>),
    /// TOAST resolution was disabled or failed; here is the pointer we would
    /// have chased, and the sentinel text to print instead.
    Unresolved {
        pointer: VarattExternal,
        sentinel: String,
    },
}

impl<'a> VarlenaView<'a> {
    pub fn bytes(&self) -> Option<&[u8]> {
        match self {
            VarlenaView::Inline(b) => Some(b),
            VarlenaView::Unresolved { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedVarlena<'a> {
    pub view: VarlenaView<'a>,
    pub consumed: usize,
}

/// Which textual rendering a decoded string attribute should use for an
/// embedded tab byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscapeMode {
    /// Preserve the source's `\t -> \r` substitution.
    BugForBug,
    /// Emit a real `\t` for an embedded tab.
    Corrected,
}

pub struct ResolveOptions {
    pub resolve_toast: bool,
    pub max_raw_size: usize,
    pub escape_mode: EscapeMode,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        ResolveOptions {
            resolve_toast: true,
            max_raw_size: crate::constants::DEFAULT_MAX_RAW_SIZE,
            escape_mode: EscapeMode::BugForBug,
        }
    }
}

/// Resolve a varlena value starting at (or near, modulo alignment padding)
/// `buf[0]`.
pub fn resolve_varlena<'a>(
    buf: &'a [u8],
    endian: Endianness,
    opts: &ResolveOptions,
    toast: &mut dyn ToastFetcher,
) -> DecodeResult<ResolvedVarlena<'a>> {
    let mut padding = 0usize;
    while padding < buf.len() && buf[padding] == 0 {
        padding += 1;
    }
    if padding == buf.len() {
        return Err(DecodeError::ShortBuffer {
            needed: 1,
            available: 0,
        });
    }
    let rest = &buf[padding..];
    let b = rest[0];

    if b == 0x01 {
        let body = &rest[1..];
        let pointer = VarattExternal::parse(body, endian)?;
        let consumed = padding + 1 + VARATT_EXTERNAL_SIZE;

        if !opts.resolve_toast {
            let sentinel = format!("(TOASTED,{})", pointer.comp_method.name());
            return Ok(ResolvedVarlena {
                view: VarlenaView::Unresolved { pointer, sentinel },
                consumed,
            });
        }

        return match toast.fetch(&pointer) {
            Ok(assembled) => {
                let logical = decompress_if_needed(
                    &assembled,
                    pointer.comp_method,
                    pointer.rawsize as usize,
                    opts.max_raw_size,
                )?;
                Ok(ResolvedVarlena {
                    view: VarlenaView::Inline(Cow::Owned(logical)),
                    consumed,
                })
            }
            Err(_) => {
                let sentinel = format!("(TOASTED,{})", pointer.comp_method.name());
                Ok(ResolvedVarlena {
                    view: VarlenaView::Unresolved { pointer, sentinel },
                    consumed,
                })
            }
        };
    }

    if b & 0x01 == 1 {
        // Short header: 1 byte, length (incl. header) = b >> 1.
        let len = (b >> 1) as usize;
        if len > rest.len() {
            return Err(DecodeError::ShortBuffer {
                needed: len,
                available: rest.len(),
            });
        }
        if len == 0 {
            return Err(DecodeError::BadVarlenaHeader(b));
        }
        let payload = &rest[1..len];
        return Ok(ResolvedVarlena {
            view: VarlenaView::Inline(Cow::Borrowed(payload)),
            consumed: padding + len,
        });
    }

    if b & 0x03 == 0x00 {
        // 4-byte uncompressed.
        if rest.len() < 4 {
            return Err(DecodeError::ShortBuffer {
                needed: 4,
                available: rest.len(),
            });
        }
        let l = endian.read_u32(&rest[0..4]) as usize;
        if l > rest.len() || l < 4 {
            return Err(DecodeError::ShortBuffer {
                needed: l,
                available: rest.len(),
            });
        }
        let payload = &rest[4..l];
        return Ok(ResolvedVarlena {
            view: VarlenaView::Inline(Cow::Borrowed(payload)),
            consumed: padding + l,
        });
    }

    if b & 0x03 == 0x02 {
        // 4-byte compressed: length word, then 4-byte extinfo, then payload.
        if rest.len() < 8 {
            return Err(DecodeError::ShortBuffer {
                needed: 8,
                available: rest.len(),
            });
        }
        let l = endian.read_u32(&rest[0..4]) as usize;
        if l > rest.len() || l < 8 {
            return Err(DecodeError::ShortBuffer {
                needed: l,
                available: rest.len(),
            });
        }
        let extinfo = endian.read_u32(&rest[4..8]);
        let raw_size = (extinfo & 0x3FFF_FFFF) as usize;
        let method = CompressionMethod::from_extinfo_bits((extinfo >> 30) as u8);
        let compressed = &rest[8..l];
        let decompressed =
            codec::decompress(method, compressed, raw_size, opts.max_raw_size)?;
        return Ok(ResolvedVarlena {
            view: VarlenaView::Inline(Cow::Owned(decompressed)),
            consumed: padding + l,
        });
    }

    Err(DecodeError::BadVarlenaHeader(b))
}

fn decompress_if_needed(
    assembled: &[u8],
    method: CompressionMethod,
    rawsize: usize,
    max_raw_size: usize,
) -> DecodeResult<Vec<u8>> {
    match method {
        CompressionMethod::Uncompressed => Ok(assembled.to_vec()),
        _ => codec::decompress(method, assembled, rawsize, max_raw_size),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn le() -> Endianness {
        Endianness::Little
    }

    #[test]
    fn short_inline_roundtrip() {
        // length byte = (4 << 1) | 1 = 0x09 means total length 4 (1 header + 3 data).
        let buf = [0x09u8, b'h', b'e', b'l'];
        let mut toast = NoToast;
        let r = resolve_varlena(&buf, le(), &ResolveOptions::default(), &mut toast).unwrap();
        assert_eq!(r.consumed, 4);
        assert_eq!(r.view.bytes().unwrap(), b"hel");
    }

    #[test]
    fn four_byte_uncompressed() {
        // total length 8 (4-byte header + 4-byte payload); low 2 bits of the
        // first byte happen to be 00, tagging this as 4B-uncompressed.
        let total_len: u32 = 8;
        let mut buf = total_len.to_le_bytes().to_vec();
        buf.extend_from_slice(b"test");
        let mut toast = NoToast;
        let r = resolve_varlena(&buf, le(), &ResolveOptions::default(), &mut toast).unwrap();
        assert_eq!(r.view.bytes().unwrap(), b"test");
        assert_eq!(r.consumed, 8);
    }

    #[test]
    fn leading_padding_is_skipped_and_counted() {
        let mut buf = vec![0u8, 0u8];
        buf.push(0x09);
        buf.extend_from_slice(b"hel");
        let mut toast = NoToast;
        let r = resolve_varlena(&buf, le(), &ResolveOptions::default(), &mut toast).unwrap();
        assert_eq!(r.consumed, 6);
        assert_eq!(r.view.bytes().unwrap(), b"hel");
    }

    #[test]
    fn all_zero_buffer_is_short_buffer() {
        let buf = [0u8; 4];
        let mut toast = NoToast;
        let e = resolve_varlena(&buf, le(), &ResolveOptions::default(), &mut toast).unwrap_err();
        assert!(matches!(e, DecodeError::ShortBuffer { .. }));
    }

    #[test]
    fn external_pointer_without_toast_resolution_emits_sentinel() {
        let mut buf = vec![0x01u8];
        buf.extend_from_slice(&10_000u32.to_le_bytes()); // rawsize
        let extinfo: u32 = 10_000 | (0u32 << 30); // pglz
        buf.extend_from_slice(&extinfo.to_le_bytes());
        buf.extend_from_slice(&42u32.to_le_bytes()); // value_id
        buf.extend_from_slice(&16384u32.to_le_bytes()); // toastrelid

        let mut toast = NoToast;
        let opts = ResolveOptions {
            resolve_toast: false,
            ..ResolveOptions::default()
        };
        let r = resolve_varlena(&buf, le(), &opts, &mut toast).unwrap();
        assert_eq!(r.consumed, 19);
        match r.view {
            VarlenaView::Unresolved { sentinel, .. } => assert_eq!(sentinel, "(TOASTED,pglz)"),
            _ => panic!("expected unresolved"),
        }
    }
}
