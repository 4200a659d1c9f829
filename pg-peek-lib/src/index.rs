//! Index-tuple variants: btree/gist/hash/gin item headers, the two SP-GiST
//! item shapes, and GIN's posting-list and posting-item encodings.

use bitflags::bitflags;

use crate::constants::{self, maxalign};
use crate::endian::Endianness;
use crate::error::{DecodeError, DecodeResult};
use crate::heap::ItemPointer;

pub const SIZEOF_INDEX_TUPLE_HEADER: usize = 8;
const INDEX_SIZE_MASK: u16 = 0x1FFF;
const INDEX_VAR_MASK: u16 = 0x4000;
const INDEX_NULL_MASK: u16 = 0x8000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexTupleHeader {
    pub tid: ItemPointer,
    pub size: usize,
    pub has_varwidths: bool,
    pub has_nulls: bool,
}

impl IndexTupleHeader {
    pub fn parse(buf: &[u8], endian: Endianness) -> DecodeResult<Self> {
        if buf.len() < SIZEOF_INDEX_TUPLE_HEADER {
            return Err(DecodeError::ItemTooSmall {
                needed: SIZEOF_INDEX_TUPLE_HEADER,
                got: buf.len(),
            });
        }
        let tid = ItemPointer::parse(&buf[0..6], endian)?;
        let info = endian.read_u16(&buf[6..8]);
        Ok(IndexTupleHeader {
            tid,
            size: (info & INDEX_SIZE_MASK) as usize,
            has_varwidths: info & INDEX_VAR_MASK != 0,
            has_nulls: info & INDEX_NULL_MASK != 0,
        })
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BtFlags: u16 {
        const LEAF   = 1 << 0;
        const ROOT   = 1 << 1;
        const DELETED = 1 << 2;
        const META   = 1 << 3;
        const HALF_DEAD = 1 << 4;
        const SPLIT_END = 1 << 5;
        const HAS_GARBAGE = 1 << 6;
        const INCOMPLETE_SPLIT = 1 << 7;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BtOpaque {
    pub prev: u32,
    pub next: u32,
    pub level_or_xact: u32,
    pub flags: BtFlags,
    pub cycleid: u16,
}

pub const SIZEOF_BT_OPAQUE: usize = 16;

impl BtOpaque {
    pub fn parse(buf: &[u8], endian: Endianness) -> DecodeResult<Self> {
        if buf.len() < SIZEOF_BT_OPAQUE {
            return Err(DecodeError::ShortBuffer {
                needed: SIZEOF_BT_OPAQUE,
                available: buf.len(),
            });
        }
        Ok(BtOpaque {
            prev: endian.read_u32(&buf[0..4]),
            next: endian.read_u32(&buf[4..8]),
            level_or_xact: endian.read_u32(&buf[8..12]),
            flags: BtFlags::from_bits_truncate(endian.read_u16(&buf[12..14])),
            cycleid: endian.read_u16(&buf[14..16]),
        })
    }

    pub fn is_meta(&self) -> bool {
        self.flags.contains(BtFlags::META) && self.cycleid <= constants::MAX_BT_CYCLE_ID
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashOpaque {
    pub prevblkno: u32,
    pub nextblkno: u32,
    pub bucket: u32,
    pub flag: u16,
    pub page_id: u16,
}

pub const SIZEOF_HASH_OPAQUE: usize = 16;

impl HashOpaque {
    pub fn parse(buf: &[u8], endian: Endianness) -> DecodeResult<Self> {
        if buf.len() < SIZEOF_HASH_OPAQUE {
            return Err(DecodeError::ShortBuffer {
                needed: SIZEOF_HASH_OPAQUE,
                available: buf.len(),
            });
        }
        Ok(HashOpaque {
            prevblkno: endian.read_u32(&buf[0..4]),
            nextblkno: endian.read_u32(&buf[4..8]),
            bucket: endian.read_u32(&buf[8..12]),
            flag: endian.read_u16(&buf[12..14]),
            page_id: endian.read_u16(&buf[14..16]),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GistOpaque {
    pub nsn: u64,
    pub rightlink: u32,
    pub flags: u16,
    pub page_id: u16,
}

pub const SIZEOF_GIST_OPAQUE: usize = 16;

impl GistOpaque {
    pub fn parse(buf: &[u8], endian: Endianness) -> DecodeResult<Self> {
        if buf.len() < SIZEOF_GIST_OPAQUE {
            return Err(DecodeError::ShortBuffer {
                needed: SIZEOF_GIST_OPAQUE,
                available: buf.len(),
            });
        }
        Ok(GistOpaque {
            nsn: endian.read_u64(&buf[0..8]),
            rightlink: endian.read_u32(&buf[8..12]),
            flags: endian.read_u16(&buf[12..14]),
            page_id: endian.read_u16(&buf[14..16]),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GinOpaque {
    pub rightlink: u32,
    pub maxoff: u16,
    pub flags: u16,
}

pub const SIZEOF_GIN_OPAQUE: usize = 8;

impl GinOpaque {
    pub fn parse(buf: &[u8], endian: Endianness) -> DecodeResult<Self> {
        if buf.len() < SIZEOF_GIN_OPAQUE {
            return Err(DecodeError::ShortBuffer {
                needed: SIZEOF_GIN_OPAQUE,
                available: buf.len(),
            });
        }
        Ok(GinOpaque {
            rightlink: endian.read_u32(&buf[0..4]),
            maxoff: endian.read_u16(&buf[4..6]),
            flags: endian.read_u16(&buf[6..8]),
        })
    }

    pub fn is_meta(&self) -> bool {
        self.flags & constants::GIN_META != 0
    }

    pub fn is_leaf(&self) -> bool {
        self.flags & constants::GIN_LEAF != 0
    }

    pub fn is_compressed(&self) -> bool {
        self.flags & constants::GIN_COMPRESSED != 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpGistOpaque {
    pub flags: u16,
    pub n_redirection: u16,
    pub n_placeholder: u16,
    pub page_id: u16,
}

pub const SIZEOF_SPGIST_OPAQUE: usize = 8;

impl SpGistOpaque {
    pub fn parse(buf: &[u8], endian: Endianness) -> DecodeResult<Self> {
        if buf.len() < SIZEOF_SPGIST_OPAQUE {
            return Err(DecodeError::ShortBuffer {
                needed: SIZEOF_SPGIST_OPAQUE,
                available: buf.len(),
            });
        }
        Ok(SpGistOpaque {
            flags: endian.read_u16(&buf[0..2]),
            n_redirection: endian.read_u16(&buf[2..4]),
            n_placeholder: endian.read_u16(&buf[4..6]),
            page_id: endian.read_u16(&buf[6..8]),
        })
    }

    pub fn is_leaf_page(&self) -> bool {
        self.flags & constants::SPGIST_LEAF_FLAG != 0
    }
}

/// `SpGistNodeTupleData`: one child-node slot inside an inner tuple.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpGistNodeTuple {
    pub tupstate: u8,
    pub size: u16,
    pub tid: ItemPointer,
}

const SIZEOF_SPGIST_NODE_TUPLE_HEADER: usize = 8;

impl SpGistNodeTuple {
    fn parse(buf: &[u8], endian: Endianness) -> DecodeResult<Self> {
        if buf.len() < SIZEOF_SPGIST_NODE_TUPLE_HEADER {
            return Err(DecodeError::ItemTooSmall {
                needed: SIZEOF_SPGIST_NODE_TUPLE_HEADER,
                got: buf.len(),
            });
        }
        let raw = endian.read_u16(&buf[0..2]);
        let tupstate = ((raw >> 14) & 0x3) as u8;
        let size = raw & 0x3FFF;
        let tid = ItemPointer::parse(&buf[2..8], endian)?;
        Ok(SpGistNodeTuple { tupstate, size, tid })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpGistInnerTuple {
    pub tupstate: u8,
    pub all_the_same: bool,
    pub n_nodes: u16,
    pub prefix_size: u16,
    pub nodes: Vec<SpGistNodeTuple>,
}

const SIZEOF_SPGIST_INNER_HEADER: usize = 4;

impl SpGistInnerTuple {
    pub fn parse(buf: &[u8], endian: Endianness) -> DecodeResult<Self> {
        if buf.len() < SIZEOF_SPGIST_INNER_HEADER {
            return Err(DecodeError::ItemTooSmall {
                needed: SIZEOF_SPGIST_INNER_HEADER,
                got: buf.len(),
            });
        }
        let raw = endian.read_u32(&buf[0..4]);
        let tupstate = (raw & 0x3) as u8;
        let all_the_same = (raw >> 2) & 0x1 != 0;
        let n_nodes = ((raw >> 3) & 0x1FFF) as u16;
        let prefix_size = (raw >> 16) as u16;

        if maxalign(prefix_size as usize) != prefix_size as usize
            && prefix_size != 0
        {
            // Per spec, a well-formed prefix size is already MAXALIGNed;
            // an odd value is a sign of corruption, but we still try to
            // walk using the rounded-up value rather than giving up.
            log::warn!(
                "spgist inner tuple prefix_size {prefix_size} is not MAXALIGNed"
            );
        }

        let mut pos = SIZEOF_SPGIST_INNER_HEADER + maxalign(prefix_size as usize);
        let mut nodes = Vec::with_capacity(n_nodes as usize);
        for _ in 0..n_nodes {
            if pos >= buf.len() {
                break;
            }
            let node = SpGistNodeTuple::parse(&buf[pos..], endian)?;
            if node.size == 0 {
                return Err(DecodeError::ItemTooSmall { needed: 1, got: 0 });
            }
            pos += node.size as usize;
            nodes.push(node);
        }

        Ok(SpGistInnerTuple {
            tupstate,
            all_the_same,
            n_nodes,
            prefix_size,
            nodes,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpGistLeafTuple {
    pub tupstate: u8,
    pub size: u32,
    pub next_offset: u16,
    pub heap_ptr: ItemPointer,
}

pub const SIZEOF_SPGIST_LEAF_HEADER: usize = 12;

impl SpGistLeafTuple {
    pub fn parse(buf: &[u8], endian: Endianness) -> DecodeResult<Self> {
        if buf.len() < SIZEOF_SPGIST_LEAF_HEADER {
            return Err(DecodeError::ItemTooSmall {
                needed: SIZEOF_SPGIST_LEAF_HEADER,
                got: buf.len(),
            });
        }
        let raw = endian.read_u32(&buf[0..4]);
        let tupstate = (raw & 0x3) as u8;
        let size = raw >> 2;
        let next_offset = endian.read_u16(&buf[4..6]);
        let heap_ptr = ItemPointer::parse(&buf[6..12], endian)?;
        Ok(SpGistLeafTuple {
            tupstate,
            size,
            next_offset,
            heap_ptr,
        })
    }
}

/// GIN's 48-bit packed item-pointer key space: block-id shifted left 11
/// bits, OR'd with the (at most 11-bit) offset-id.
fn pack_key(ip: ItemPointer) -> u64 {
    ((ip.block as u64) << 11) | (ip.offset as u64 & 0x7FF)
}

fn unpack_key(key: u64) -> ItemPointer {
    ItemPointer {
        block: (key >> 11) as u32,
        offset: (key & 0x7FF) as u16,
    }
}

/// Decode one varbyte-encoded delta: 7 data bits per byte, high bit set
/// means "more bytes follow"; at most 7 bytes (42 bits) may appear, and the
/// 7th carries no continuation bit.
fn decode_varbyte(buf: &[u8]) -> DecodeResult<(u64, usize)> {
    let mut value: u64 = 0;
    for i in 0..7 {
        if i >= buf.len() {
            return Err(DecodeError::ShortBuffer {
                needed: i + 1,
                available: buf.len(),
            });
        }
        let b = buf[i];
        value |= ((b & 0x7F) as u64) << (7 * i);
        if i == 6 || b & 0x80 == 0 {
            return Ok((value, i + 1));
        }
    }
    unreachable!()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GinPostingList {
    pub nbytes: u16,
    pub items: Vec<ItemPointer>,
}

const SIZEOF_GIN_POSTING_LIST_HEADER: usize = 8;

/// Decode one compressed posting list: `ItemPointer | nbytes:u16 | varbyte
/// deltas`. Returns `(bytes_consumed, list)`.
pub fn decode_gin_posting_list(
    buf: &[u8],
    endian: Endianness,
) -> DecodeResult<(usize, GinPostingList)> {
    if buf.len() < SIZEOF_GIN_POSTING_LIST_HEADER {
        return Err(DecodeError::ShortBuffer {
            needed: SIZEOF_GIN_POSTING_LIST_HEADER,
            available: buf.len(),
        });
    }
    let base = ItemPointer::parse(&buf[0..6], endian)?;
    let nbytes = endian.read_u16(&buf[6..8]);
    let deltas_end = SIZEOF_GIN_POSTING_LIST_HEADER + nbytes as usize;
    if deltas_end > buf.len() {
        return Err(DecodeError::ShortBuffer {
            needed: deltas_end,
            available: buf.len(),
        });
    }
    let deltas_buf = &buf[SIZEOF_GIN_POSTING_LIST_HEADER..deltas_end];

    let mut items = vec![base];
    let mut key = pack_key(base);
    let mut pos = 0usize;
    while pos < deltas_buf.len() {
        let (delta, used) = decode_varbyte(&deltas_buf[pos..])?;
        key += delta;
        items.push(unpack_key(key));
        pos += used;
    }

    Ok((deltas_end, GinPostingList { nbytes, items }))
}

/// One entry of a GIN inner page's posting-item array: a child block
/// pointer plus the key that routes to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PostingItem {
    pub child_block: u32,
    pub key: ItemPointer,
}

pub const SIZEOF_POSTING_ITEM: usize = 10;

impl PostingItem {
    pub fn parse(buf: &[u8], endian: Endianness) -> DecodeResult<Self> {
        if buf.len() < SIZEOF_POSTING_ITEM {
            return Err(DecodeError::ShortBuffer {
                needed: SIZEOF_POSTING_ITEM,
                available: buf.len(),
            });
        }
        Ok(PostingItem {
            child_block: endian.read_u32(&buf[0..4]),
            key: ItemPointer::parse(&buf[4..10], endian)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gin_posting_list_single_delta() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&7u32.to_le_bytes()); // block
        buf.extend_from_slice(&3u16.to_le_bytes()); // offset
        buf.extend_from_slice(&1u16.to_le_bytes()); // nbytes
        buf.push(0x05); // delta = 5, no continuation

        let (consumed, list) = decode_gin_posting_list(&buf, Endianness::Little).unwrap();
        assert_eq!(consumed, buf.len());
        assert_eq!(
            list.items,
            vec![
                ItemPointer { block: 7, offset: 3 },
                ItemPointer { block: 7, offset: 8 },
            ]
        );
    }

    #[test]
    fn varbyte_stops_at_seven_bytes() {
        let buf = [0xFFu8; 7];
        let (_value, used) = decode_varbyte(&buf).unwrap();
        assert_eq!(used, 7);
    }

    #[test]
    fn index_tuple_header_decomposes_info_word() {
        let mut buf = vec![0u8; 8];
        buf[0..4].copy_from_slice(&1u32.to_le_bytes());
        buf[4..6].copy_from_slice(&2u16.to_le_bytes());
        let info: u16 = 40 | INDEX_NULL_MASK;
        buf[6..8].copy_from_slice(&info.to_le_bytes());

        let h = IndexTupleHeader::parse(&buf, Endianness::Little).unwrap();
        assert_eq!(h.size, 40);
        assert!(h.has_nulls);
        assert!(!h.has_varwidths);
    }
}
