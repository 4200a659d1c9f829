//! `HeapTupleHeaderData` and component C, the tuple decoder that walks the
//! null bitmap and the attribute-decoder sequence across a heap item's data
//! area.

use bitflags::bitflags;

use crate::attr::AttrType;
use crate::constants::SIZEOF_HEAP_TUPLE_HEADER;
use crate::endian::Endianness;
use crate::error::{DecodeError, DecodeResult};
use crate::varlena::{ResolveOptions, ToastFetcher};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Infomask: u16 {
        const HASNULL         = 0x0001;
        const HASVARWIDTH     = 0x0002;
        const HASEXTERNAL     = 0x0004;
        const HASOID_OLD      = 0x0008;
        const XMAX_KEYSHR_LOCK = 0x0010;
        const COMBOCID        = 0x0020;
        const XMAX_EXCL_LOCK  = 0x0040;
        const XMAX_LOCK_ONLY  = 0x0080;
        const XMIN_COMMITTED  = 0x0100;
        const XMIN_INVALID    = 0x0200;
        const XMAX_COMMITTED  = 0x0400;
        const XMAX_INVALID    = 0x0800;
        const XMAX_IS_MULTI   = 0x1000;
        const UPDATED         = 0x2000;
        const MOVED_OFF       = 0x4000;
        const MOVED_IN        = 0x8000;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Infomask2: u16 {
        const NATTS_MASK    = 0x07FF;
        const KEYS_UPDATED  = 0x2000;
        const HOT_UPDATED   = 0x4000;
        const ONLY_TUPLE    = 0x8000;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemPointer {
    pub block: u32,
    pub offset: u16,
}

impl ItemPointer {
    pub fn parse(b: &[u8], endian: Endianness) -> DecodeResult<Self> {
        if b.len() < 6 {
            return Err(DecodeError::ShortBuffer {
                needed: 6,
                available: b.len(),
            });
        }
        Ok(ItemPointer {
            block: endian.read_u32(&b[0..4]),
            offset: endian.read_u16(&b[4..6]),
        })
    }
}

#[derive(Debug, Clone)]
pub struct HeapTupleHeader {
    pub xmin: u32,
    pub xmax: u32,
    pub cid_or_xvac: u32,
    pub ctid: ItemPointer,
    pub infomask2: Infomask2,
    pub infomask: Infomask,
    pub hoff: u8,
    pub natts: u16,
}

impl HeapTupleHeader {
    pub fn parse(buf: &[u8], endian: Endianness) -> DecodeResult<Self> {
        if buf.len() < SIZEOF_HEAP_TUPLE_HEADER {
            return Err(DecodeError::ItemTooSmall {
                needed: SIZEOF_HEAP_TUPLE_HEADER,
                got: buf.len(),
            });
        }
        let xmin = endian.read_u32(&buf[0..4]);
        let xmax = endian.read_u32(&buf[4..8]);
        let cid_or_xvac = endian.read_u32(&buf[8..12]);
        let ctid = ItemPointer::parse(&buf[12..18], endian)?;
        let infomask2_raw = endian.read_u16(&buf[18..20]);
        let infomask_raw = endian.read_u16(&buf[20..22]);
        let infomask2 = Infomask2::from_bits_truncate(infomask2_raw);
        let infomask = Infomask::from_bits_truncate(infomask_raw);
        let hoff = buf[22];
        let natts = infomask2_raw & Infomask2::NATTS_MASK.bits();
        Ok(HeapTupleHeader {
            xmin,
            xmax,
            cid_or_xvac,
            ctid,
            infomask2,
            infomask,
            hoff,
            natts,
        })
    }

    fn null_bit(&self, bitmap: &[u8], i: usize) -> bool {
        let byte = bitmap[i / 8];
        (byte & (1 << (i % 8))) != 0
    }
}

/// Outcome of decoding one heap tuple's attributes: a tab-delimited `COPY:`
/// line, or as much of it as was produced before an error. Bytes, not a
/// `String`, so a non-UTF-8 attribute doesn't force a lossy re-encoding.
#[derive(Debug, Clone)]
pub struct TupleDecodeOutcome {
    pub line: Vec<u8>,
    pub error: Option<DecodeError>,
}

fn join_fields(fields: &[Vec<u8>]) -> Vec<u8> {
    let mut out = Vec::new();
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            out.push(b'\t');
        }
        out.extend_from_slice(field);
    }
    out
}

/// Component C: walk a heap item's null bitmap and the configured attribute
/// sequence across its data area.
pub fn decode_tuple(
    item: &[u8],
    header: &HeapTupleHeader,
    attrs: &[AttrType],
    endian: Endianness,
    opts: &ResolveOptions,
    toast: &mut dyn ToastFetcher,
) -> TupleDecodeOutcome {
    let hoff = header.hoff as usize;
    if item.len() < 23 || hoff > item.len() {
        return TupleDecodeOutcome {
            line: Vec::new(),
            error: Some(DecodeError::ItemTooSmall {
                needed: hoff,
                got: item.len(),
            }),
        };
    }
    let bitmap_len = hoff.saturating_sub(23);
    let bitmap = &item[23..23 + bitmap_len.min(item.len() - 23)];

    let mut data = &item[hoff..];
    let mut remaining = item.len() - hoff;
    let mut offset = 0usize;
    let mut fields: Vec<Vec<u8>> = Vec::with_capacity(attrs.len());

    for (i, attr) in attrs.iter().enumerate() {
        let is_null = header.infomask.contains(Infomask::HASNULL)
            && !bitmap.is_empty()
            && i < bitmap.len() * 8
            && !header.null_bit(bitmap, i);

        if is_null {
            fields.push(b"\\N".to_vec());
            continue;
        }

        if remaining == 0 {
            return TupleDecodeOutcome {
                line: join_fields(&fields),
                error: Some(DecodeError::Truncated { remaining: 0 }),
            };
        }

        match attr.decode(data, offset, endian, opts, toast) {
            Ok((consumed, bytes)) => {
                fields.push(bytes);
                data = &data[consumed..];
                remaining -= consumed;
                offset += consumed;
            }
            Err(e) => {
                return TupleDecodeOutcome {
                    line: join_fields(&fields),
                    error: Some(e),
                };
            }
        }
    }

    if remaining != 0 {
        return TupleDecodeOutcome {
            line: join_fields(&fields),
            error: Some(DecodeError::Truncated { remaining }),
        };
    }

    TupleDecodeOutcome {
        line: join_fields(&fields),
        error: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::varlena::NoToast;

    fn build_header(infomask: Infomask, natts: u16, hoff: u8) -> Vec<u8> {
        let mut v = vec![0u8; 23];
        v[18..20].copy_from_slice(&natts.to_le_bytes());
        v[20..22].copy_from_slice(&infomask.bits().to_le_bytes());
        v[22] = hoff;
        v
    }

    #[test]
    fn decodes_single_int_attribute() {
        let mut item = build_header(Infomask::empty(), 1, 24);
        item.push(0); // pad hoff to 24 (MAXALIGN-ish for the test)
        item.extend_from_slice(&67305985i32.to_le_bytes());

        let header = HeapTupleHeader::parse(&item, Endianness::Little).unwrap();
        let mut toast = NoToast;
        let outcome = decode_tuple(
            &item,
            &header,
            &[AttrType::Int],
            Endianness::Little,
            &ResolveOptions::default(),
            &mut toast,
        );
        assert!(outcome.error.is_none());
        assert_eq!(outcome.line, b"67305985".to_vec());
    }

    #[test]
    fn null_bitmap_emits_backslash_n() {
        let mut item = build_header(Infomask::HASNULL, 2, 25);
        item.push(0b0000_0010); // bit0 (attr 0) = 0 -> null; bit1 (attr1) = 1 -> present
        item.extend_from_slice(&7i32.to_le_bytes());

        let header = HeapTupleHeader::parse(&item, Endianness::Little).unwrap();
        let mut toast = NoToast;
        let outcome = decode_tuple(
            &item,
            &header,
            &[AttrType::Int, AttrType::Int],
            Endianness::Little,
            &ResolveOptions::default(),
            &mut toast,
        );
        assert!(outcome.error.is_none());
        assert_eq!(outcome.line, b"\\N\t7".to_vec());
    }

    #[test]
    fn trailing_garbage_is_an_error() {
        let mut item = build_header(Infomask::empty(), 1, 23);
        item.extend_from_slice(&1i32.to_le_bytes());
        item.extend_from_slice(&[0xAA, 0xBB]); // trailing garbage

        let header = HeapTupleHeader::parse(&item, Endianness::Little).unwrap();
        let mut toast = NoToast;
        let outcome = decode_tuple(
            &item,
            &header,
            &[AttrType::Int],
            Endianness::Little,
            &ResolveOptions::default(),
            &mut toast,
        );
        assert!(matches!(outcome.error, Some(DecodeError::Truncated { remaining: 2 })));
    }
}
