//! Component E: the page parser -- header validation, line-pointer array
//! extraction, and special-section classification.

use bitflags::bitflags;

use crate::constants::{self, maxalign};
use crate::endian::Endianness;
use crate::error::{DecodeError, DecodeResult};
use crate::index::{GinOpaque, SpGistOpaque, SIZEOF_BT_OPAQUE, SIZEOF_GIN_OPAQUE, SIZEOF_GIST_OPAQUE, SIZEOF_HASH_OPAQUE, SIZEOF_SPGIST_OPAQUE};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PageFlags: u16 {
        const HAS_FREE_LINES = 0x0001;
        const PAGE_FULL      = 0x0002;
        const ALL_VISIBLE    = 0x0004;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageHeader {
    pub lsn: u64,
    pub checksum: u16,
    pub flags: PageFlags,
    pub lower: u16,
    pub upper: u16,
    pub special: u16,
    pub pagesize_version: u16,
    pub prune_xid: u32,
}

impl PageHeader {
    pub fn page_size(&self) -> usize {
        (self.pagesize_version & 0xFF00) as usize
    }

    pub fn layout_version(&self) -> u16 {
        self.pagesize_version & 0x00FF
    }

    pub fn parse(buf: &[u8], endian: Endianness) -> DecodeResult<Self> {
        if buf.len() < constants::SIZEOF_PAGE_HEADER {
            return Err(DecodeError::EofInHeader { field: "pd_special" });
        }
        let lsn = endian.read_u64(&buf[0..8]);
        let checksum = endian.read_u16(&buf[8..10]);
        let flags = PageFlags::from_bits_truncate(endian.read_u16(&buf[10..12]));
        let lower = endian.read_u16(&buf[12..14]);
        let upper = endian.read_u16(&buf[14..16]);
        let special = endian.read_u16(&buf[16..18]);
        let pagesize_version = endian.read_u16(&buf[18..20]);
        let prune_xid = endian.read_u32(&buf[20..24]);
        Ok(PageHeader {
            lsn,
            checksum,
            flags,
            lower,
            upper,
            special,
            pagesize_version,
            prune_xid,
        })
    }

    /// Validate `sizeof(PageHeader) <= lower <= upper <= special <=
    /// page_size` and the line-pointer-array alignment invariant.
    pub fn validate(&self, page_size: usize) -> Result<(), String> {
        let h = constants::SIZEOF_PAGE_HEADER as u16;
        if !(h <= self.lower && self.lower <= self.upper && self.upper <= self.special) {
            return Err(format!(
                "header bounds violated: {} <= lower({}) <= upper({}) <= special({}) does not hold",
                h, self.lower, self.upper, self.special
            ));
        }
        if (self.special as usize) > page_size {
            return Err(format!(
                "special offset {} exceeds page size {}",
                self.special, page_size
            ));
        }
        if (self.lower - h) % constants::SIZEOF_ITEM_ID as u16 != 0 {
            return Err(format!(
                "lower - header ({}) is not a multiple of sizeof(ItemId)",
                self.lower - h
            ));
        }
        if self.layout_version() != constants::PAGE_LAYOUT_VERSION {
            return Err(format!(
                "unsupported page layout version {}",
                self.layout_version()
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemState {
    Unused,
    Normal,
    Redirect,
    Dead,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemId {
    pub offset: u16,
    pub state: ItemState,
    pub length: u16,
}

impl ItemId {
    pub fn parse(buf: &[u8], endian: Endianness) -> DecodeResult<Self> {
        if buf.len() < constants::SIZEOF_ITEM_ID {
            return Err(DecodeError::ShortBuffer {
                needed: constants::SIZEOF_ITEM_ID,
                available: buf.len(),
            });
        }
        let first = endian.read_u16(&buf[0..2]);
        let second = endian.read_u16(&buf[2..4]);
        let offset = first & 0x7FFF;
        let raw_flags = (first >> 15) & 0x03;
        let length = second & 0x7FFF;
        let state = match raw_flags {
            0 => ItemState::Unused,
            1 => ItemState::Normal,
            2 => ItemState::Redirect,
            _ => ItemState::Dead,
        };
        Ok(ItemId {
            offset,
            state,
            length,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecialSectionType {
    None,
    Sequence,
    IndexBtree,
    IndexHash,
    IndexGist,
    IndexGin,
    IndexSpgist,
    ErrorUnknown,
    ErrorBoundary,
}

/// Classify the special section per the size/trailing-bytes rules: decide
/// purely from `sp_size` and, when the whole page is present, the page-id
/// bytes at the very end of the page.
pub fn classify_special_section(
    page: &[u8],
    page_size: usize,
    special_offset: usize,
    full_page_present: bool,
    endian: Endianness,
) -> SpecialSectionType {
    if special_offset == 0 || special_offset > page_size || special_offset > page.len() {
        return SpecialSectionType::ErrorBoundary;
    }
    let sp_size = page_size - special_offset;
    if sp_size == 0 {
        return SpecialSectionType::None;
    }

    let last_two = if full_page_present && page.len() >= 2 {
        Some(endian.read_u16(&page[page.len() - 2..page.len()]))
    } else {
        None
    };

    if sp_size == maxalign(4) {
        if !full_page_present {
            return SpecialSectionType::ErrorUnknown;
        }
        let special_value = endian.read_u32(&page[special_offset..special_offset + 4]);
        if special_value == constants::SEQUENCE_MAGIC {
            return SpecialSectionType::Sequence;
        }
        if sp_size == maxalign(SIZEOF_SPGIST_OPAQUE) && last_two == Some(constants::SPGIST_PAGE_ID)
        {
            return SpecialSectionType::IndexSpgist;
        }
        if sp_size == maxalign(SIZEOF_GIN_OPAQUE) {
            return SpecialSectionType::IndexGin;
        }
        return SpecialSectionType::ErrorUnknown;
    }

    if sp_size == maxalign(SIZEOF_SPGIST_OPAQUE)
        && full_page_present
        && last_two == Some(constants::SPGIST_PAGE_ID)
    {
        return SpecialSectionType::IndexSpgist;
    }
    if sp_size == maxalign(SIZEOF_GIN_OPAQUE) {
        return SpecialSectionType::IndexGin;
    }
    if sp_size > 2 && full_page_present {
        if let Some(pid) = last_two {
            if pid <= constants::MAX_BT_CYCLE_ID && sp_size == maxalign(SIZEOF_BT_OPAQUE) {
                return SpecialSectionType::IndexBtree;
            }
            if pid == constants::HASHO_PAGE_ID && sp_size == maxalign(SIZEOF_HASH_OPAQUE) {
                return SpecialSectionType::IndexHash;
            }
            if pid == constants::GIST_PAGE_ID && sp_size == maxalign(SIZEOF_GIST_OPAQUE) {
                return SpecialSectionType::IndexGist;
            }
        }
        return SpecialSectionType::ErrorUnknown;
    }

    SpecialSectionType::ErrorUnknown
}

pub struct ParsedPage {
    pub header: PageHeader,
    pub header_error: Option<String>,
    pub item_ids: Vec<ItemId>,
    pub special_type: SpecialSectionType,
    pub bt_opaque: Option<crate::index::BtOpaque>,
    pub gin_opaque: Option<GinOpaque>,
    pub spgist_opaque: Option<SpGistOpaque>,
    pub eof: Option<DecodeError>,
}

/// Walk the header and line-pointer array of one block. `page` may be
/// shorter than `page_size` for a partial final block; the walk is capped
/// to the bytes actually present.
pub fn parse_page(page: &[u8], page_size: usize, endian: Endianness) -> ParsedPage {
    let header = match PageHeader::parse(page, endian) {
        Ok(h) => h,
        Err(e) => {
            return ParsedPage {
                header: PageHeader {
                    lsn: 0,
                    checksum: 0,
                    flags: PageFlags::empty(),
                    lower: 0,
                    upper: 0,
                    special: 0,
                    pagesize_version: 0,
                    prune_xid: 0,
                },
                header_error: Some(e.to_string()),
                item_ids: Vec::new(),
                special_type: SpecialSectionType::ErrorBoundary,
                bt_opaque: None,
                gin_opaque: None,
                spgist_opaque: None,
                eof: Some(e),
            };
        }
    };

    let header_error = header.validate(page_size).err();

    let lower = header.lower as usize;
    let item_count = lower
        .saturating_sub(constants::SIZEOF_PAGE_HEADER)
        / constants::SIZEOF_ITEM_ID;

    let mut item_ids = Vec::with_capacity(item_count);
    let mut eof = None;
    for i in 0..item_count {
        let start = constants::SIZEOF_PAGE_HEADER + i * constants::SIZEOF_ITEM_ID;
        let end = start + constants::SIZEOF_ITEM_ID;
        if end > page.len() {
            eof = Some(DecodeError::EofInHeader {
                field: "pd_linp",
            });
            break;
        }
        match ItemId::parse(&page[start..end], endian) {
            Ok(id) => item_ids.push(id),
            Err(e) => {
                eof = Some(e);
                break;
            }
        }
    }

    let full_page_present = page.len() >= page_size;
    let special_type = classify_special_section(
        page,
        page_size,
        header.special as usize,
        full_page_present,
        endian,
    );

    let bt_opaque = if special_type == SpecialSectionType::IndexBtree && full_page_present {
        crate::index::BtOpaque::parse(&page[header.special as usize..], endian).ok()
    } else {
        None
    };
    let gin_opaque = if special_type == SpecialSectionType::IndexGin && full_page_present {
        GinOpaque::parse(&page[header.special as usize..], endian).ok()
    } else {
        None
    };
    let spgist_opaque = if special_type == SpecialSectionType::IndexSpgist && full_page_present {
        SpGistOpaque::parse(&page[header.special as usize..], endian).ok()
    } else {
        None
    };

    ParsedPage {
        header,
        header_error,
        item_ids,
        special_type,
        bt_opaque,
        gin_opaque,
        spgist_opaque,
        eof,
    }
}

/// Compute `absolute_block_number` for checksum verification given the
/// file's segment layout.
pub fn absolute_block_number(segment_size: u64, page_size: u64, segment_number: u32, local_block: u32) -> u32 {
    let pages_per_segment = (segment_size / page_size) as u32;
    pages_per_segment * segment_number + local_block
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_header(lower: u16, upper: u16, special: u16) -> Vec<u8> {
        let mut v = vec![0u8; 24];
        v[12..14].copy_from_slice(&lower.to_le_bytes());
        v[14..16].copy_from_slice(&upper.to_le_bytes());
        v[16..18].copy_from_slice(&special.to_le_bytes());
        let pagesize_version: u16 = (8192u16 & 0xFF00) | constants::PAGE_LAYOUT_VERSION;
        v[18..20].copy_from_slice(&pagesize_version.to_le_bytes());
        v
    }

    #[test]
    fn header_bounds_hold_for_well_formed_page() {
        let buf = make_header(28, 8176, 8176);
        let header = PageHeader::parse(&buf, Endianness::Little).unwrap();
        assert!(header.validate(8192).is_ok());
        assert_eq!((header.lower - 24) / 4, 1);
    }

    #[test]
    fn invalid_bounds_are_reported_not_fatal() {
        let buf = make_header(8176, 28, 28); // lower > upper: invalid
        let header = PageHeader::parse(&buf, Endianness::Little).unwrap();
        assert!(header.validate(8192).is_err());
    }

    #[test]
    fn spgist_wins_over_gin_when_page_id_matches() {
        let page_size = 8192usize;
        let special_offset = page_size - maxalign(SIZEOF_SPGIST_OPAQUE);
        let mut page = vec![0u8; page_size];
        let len = page.len();
        page[len - 2..].copy_from_slice(&constants::SPGIST_PAGE_ID.to_le_bytes());
        let t = classify_special_section(&page, page_size, special_offset, true, Endianness::Little);
        assert_eq!(t, SpecialSectionType::IndexSpgist);
    }

    #[test]
    fn gin_when_no_spgist_page_id() {
        let page_size = 8192usize;
        let special_offset = page_size - maxalign(SIZEOF_GIN_OPAQUE);
        let page = vec![0u8; page_size];
        let t = classify_special_section(&page, page_size, special_offset, true, Endianness::Little);
        assert_eq!(t, SpecialSectionType::IndexGin);
    }

    #[test]
    fn no_special_section() {
        let page_size = 8192usize;
        let page = vec![0u8; page_size];
        let t = classify_special_section(&page, page_size, 0, true, Endianness::Little);
        assert_eq!(t, SpecialSectionType::ErrorBoundary);
        let t2 = classify_special_section(&page, page_size, page_size, true, Endianness::Little);
        assert_eq!(t2, SpecialSectionType::None);
    }
}
