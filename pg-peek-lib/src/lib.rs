//! `pg-peek-lib`: an offline forensic inspector for PostgreSQL's on-disk
//! page/tuple format. Given raw relation-file bytes this crate walks pages,
//! interprets their items as heap or index tuples, decodes attributes by a
//! caller-supplied type list, and reassembles TOASTed values from sibling
//! relation files -- all without talking to a running server or depending
//! on catalog contents.

pub mod attr;
pub mod codec;
pub mod constants;
pub mod endian;
pub mod error;
pub mod heap;
pub mod index;
pub mod item;
pub mod juliandate;
pub mod page;
pub mod toast;
pub mod varlena;

use std::fmt;
use std::fs;
use std::io::Write;
use std::ops::Range;
use std::path::Path;

use attr::AttrType;
use constants::DEFAULT_SEGMENT_SIZE;
use endian::Endianness;
use error::DecodeResult;
use item::{interpret_item, ItemInterpretation, ItemReport};
use page::{absolute_block_number, parse_page, ItemState, SpecialSectionType};
use toast::FileToastResolver;
use varlena::{EscapeMode, NoToast, ResolveOptions, ToastFetcher};

/// A checksum routine is treated as an external collaborator: this crate
/// doesn't implement the database engine's page-checksum algorithm, only
/// the call contract (`page bytes with pd_checksum zeroed`, `absolute block
/// number`) -> `u16`.
pub type ChecksumFn<'a> = &'a dyn Fn(&[u8], u32) -> u16;

#[derive(Debug, Clone)]
pub struct Config {
    pub page_size_override: Option<usize>,
    pub segment_size: u64,
    pub segment_number: u32,
    pub block_range: Option<Range<u32>>,
    pub verify_checksums: bool,
    pub decode_attributes: Vec<AttrType>,
    pub resolve_toast: bool,
    pub item_interpretation: ItemInterpretation,
    pub ignore_xmax_nonzero: bool,
    pub endian: Endianness,
    pub max_raw_size: usize,
    pub emit_real_tab_escape: bool,
    pub hex_dump: bool,
    pub hex_dump_absolute_addressing: bool,
    pub toast_chunk_size: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            page_size_override: None,
            segment_size: DEFAULT_SEGMENT_SIZE,
            segment_number: 0,
            block_range: None,
            verify_checksums: false,
            decode_attributes: Vec::new(),
            resolve_toast: true,
            item_interpretation: ItemInterpretation::Auto,
            ignore_xmax_nonzero: false,
            endian: Endianness::default(),
            max_raw_size: constants::DEFAULT_MAX_RAW_SIZE,
            emit_real_tab_escape: false,
            hex_dump: false,
            hex_dump_absolute_addressing: false,
            toast_chunk_size: constants::DEFAULT_TOAST_MAX_CHUNK_SIZE,
        }
    }
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct DumpStats {
    pub pages_read: usize,
    pub items_read: usize,
    pub errors: usize,
}

impl fmt::Display for DumpStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} pages, {} items, {} errors",
            self.pages_read, self.items_read, self.errors
        )
    }
}

fn resolve_options(config: &Config) -> ResolveOptions {
    ResolveOptions {
        resolve_toast: config.resolve_toast,
        max_raw_size: config.max_raw_size,
        escape_mode: if config.emit_real_tab_escape {
            EscapeMode::Corrected
        } else {
            EscapeMode::BugForBug
        },
    }
}

/// Render one 16-byte-per-line hex+ASCII dump of `buf`, addressed either
/// from the start of the page or from the file's absolute byte offset.
pub fn hex_dump(buf: &[u8], base_address: usize) -> String {
    let mut out = String::new();
    for (line_no, chunk) in buf.chunks(16).enumerate() {
        let addr = base_address + line_no * 16;
        out.push_str(&format!("  {:08x}: ", addr));
        for i in 0..16 {
            if i < chunk.len() {
                out.push_str(&format!("{:02x} ", chunk[i]));
            } else {
                out.push_str("   ");
            }
        }
        out.push_str(" |");
        for &b in chunk {
            let c = b as char;
            if c.is_ascii_graphic() || c == ' ' {
                out.push(c);
            } else {
                out.push('.');
            }
        }
        out.push('|');
        out.push('\n');
    }
    out
}

fn dump_banner(path: &Path, file_len: u64, page_size: usize) -> String {
    format!(
        "*** pg-peek dump of {} ***\n*** file length {} bytes, page size {} ***",
        path.display(),
        file_len,
        page_size
    )
}

/// Walk every block of `path` and write the rendered dump to `out`. Returns
/// `Ok(stats)` as long as the file itself could be opened and read; per-item
/// decode failures are counted in `stats.errors` and reported inline rather
/// than aborting the walk.
pub fn dump_file(
    path: &Path,
    config: &Config,
    checksum_fn: Option<ChecksumFn>,
    out: &mut dyn Write,
) -> DecodeResult<DumpStats> {
    let bytes = fs::read(path)?;
    let page_size = config.page_size_override.unwrap_or_else(|| {
        page::PageHeader::parse(&bytes, config.endian)
            .ok()
            .map(|h| h.page_size())
            .filter(|&s| s != 0)
            .unwrap_or(8192)
    });

    writeln!(out, "{}", dump_banner(path, bytes.len() as u64, page_size))?;

    let mut stats = DumpStats::default();
    let mut toast: Box<dyn ToastFetcher> = if config.resolve_toast {
        Box::new(FileToastResolver::new(path).with_max_chunk_size(config.toast_chunk_size))
    } else {
        Box::new(NoToast)
    };
    let opts = resolve_options(config);

    let total_blocks = (bytes.len() + page_size - 1) / page_size;
    for local_block in 0..total_blocks as u32 {
        if let Some(range) = &config.block_range {
            if !range.contains(&local_block) {
                continue;
            }
        }

        let start = local_block as usize * page_size;
        let end = (start + page_size).min(bytes.len());
        let page_buf = &bytes[start..end];

        let parsed = parse_page(page_buf, page_size, config.endian);
        stats.pages_read += 1;

        writeln!(out, "\nBlock {:>8}:  ", local_block)?;
        if let Some(err) = &parsed.header_error {
            writeln!(out, "  ! header error: {}", err)?;
            stats.errors += 1;
        }
        if let Some(eof) = &parsed.eof {
            writeln!(out, "  ! {}", eof)?;
            stats.errors += 1;
        }

        if config.verify_checksums {
            if let Some(f) = checksum_fn {
                if end - start == page_size {
                    let mut scratch = page_buf.to_vec();
                    scratch[8..10].copy_from_slice(&[0, 0]);
                    let abs = absolute_block_number(
                        config.segment_size,
                        page_size as u64,
                        config.segment_number,
                        local_block,
                    );
                    let computed = f(&scratch, abs);
                    if computed != parsed.header.checksum {
                        writeln!(
                            out,
                            "  ! checksum mismatch: computed 0x{:04x}, stored 0x{:04x}",
                            computed, parsed.header.checksum
                        )?;
                        stats.errors += 1;
                    }
                }
            }
        }

        if let Some(summary) = parsed
            .gin_opaque
            .as_ref()
            .filter(|_| parsed.special_type == SpecialSectionType::IndexGin)
            .and_then(item::gin_meta_summary)
        {
            writeln!(out, "  {}", summary)?;
            continue;
        }
        if let Some(summary) = parsed
            .bt_opaque
            .as_ref()
            .filter(|_| parsed.special_type == SpecialSectionType::IndexBtree)
            .and_then(item::btree_meta_summary)
        {
            writeln!(out, "  {}", summary)?;
            continue;
        }

        if parsed.special_type == SpecialSectionType::IndexGin {
            if let Some(opaque) = parsed.gin_opaque.as_ref().filter(|o| o.is_leaf()) {
                let data_start = constants::SIZEOF_PAGE_HEADER.min(page_buf.len());
                let data_end = (parsed.header.lower as usize).min(page_buf.len());
                let data = if data_end > data_start {
                    &page_buf[data_start..data_end]
                } else {
                    &[][..]
                };
                let report = item::decode_gin_leaf_page(data, opaque, config.endian);
                for line in &report.lines {
                    writeln!(out, "  {}", line)?;
                }
                if let Some(e) = &report.error {
                    writeln!(out, "  ! {}", e)?;
                    stats.errors += 1;
                }
                stats.items_read += report.lines.len();
                continue;
            }
        }

        for (idx, item_id) in parsed.item_ids.iter().enumerate() {
            if item_id.state == ItemState::Unused {
                continue;
            }
            let item_start = item_id.offset as usize;
            let item_end = item_start + item_id.length as usize;
            if item_end > page_buf.len() {
                writeln!(
                    out,
                    "  item[{:>4}]  ! extends beyond page ({} > {})",
                    idx,
                    item_end,
                    page_buf.len()
                )?;
                stats.errors += 1;
                continue;
            }
            if item_id.state == ItemState::Redirect || item_id.state == ItemState::Dead {
                writeln!(out, "  item[{:>4}]  ({:?})", idx, item_id.state)?;
                continue;
            }

            let item_bytes = &page_buf[item_start..item_end];
            let report: ItemReport = interpret_item(
                item_bytes,
                parsed.special_type,
                parsed.gin_opaque.as_ref(),
                parsed.spgist_opaque.as_ref(),
                config.item_interpretation,
                &config.decode_attributes,
                config.endian,
                &opts,
                config.ignore_xmax_nonzero,
                toast.as_mut(),
            );
            stats.items_read += 1;

            for line in &report.lines {
                writeln!(out, "  item[{:>4}]  {}", idx, line)?;
            }
            if let Some(raw) = &report.raw_line {
                write!(out, "  item[{:>4}]  ", idx)?;
                out.write_all(raw)?;
                writeln!(out)?;
            }
            if let Some(e) = &report.error {
                writeln!(out, "  item[{:>4}]  ! {}", idx, e)?;
                stats.errors += 1;
            }

            if config.hex_dump {
                let base = if config.hex_dump_absolute_addressing {
                    start + item_start
                } else {
                    item_start
                };
                write!(out, "{}", hex_dump(item_bytes, base))?;
            }
        }
    }

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_dump_formats_sixteen_bytes_per_line() {
        let buf: Vec<u8> = (0u8..20).collect();
        let dump = hex_dump(&buf, 0);
        assert_eq!(dump.lines().count(), 2);
        assert!(dump.lines().next().unwrap().contains("00000000:"));
    }

    #[test]
    fn default_config_uses_little_endian_and_toast_on() {
        let config = Config::default();
        assert_eq!(config.endian, Endianness::Little);
        assert!(config.resolve_toast);
    }
}
