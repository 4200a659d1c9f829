use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};

use pg_peek_lib::attr::AttrType;
use pg_peek_lib::endian::Endianness;
use pg_peek_lib::item::ItemInterpretation;
use pg_peek_lib::{dump_file, Config};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum EndianArg {
    Little,
    Big,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum InterpretationArg {
    Auto,
    Heap,
    Index,
}

/// Offline forensic inspector for PostgreSQL page/tuple files.
#[derive(Parser, Debug)]
#[command(name = "pgpk", version, about)]
struct Cli {
    /// Relation file to dump.
    filename: PathBuf,

    /// Override the page size auto-detected from the first block's header.
    #[arg(long)]
    page_size: Option<usize>,

    /// Segment file size, for computing absolute block numbers across a
    /// multi-segment relation.
    #[arg(long)]
    segment_size: Option<u64>,

    /// Which segment of the relation this file is (0 for the first/only one).
    #[arg(long, default_value_t = 0)]
    segment_number: u32,

    /// Restrict the walk to `start-end` local block numbers (end exclusive).
    #[arg(long, value_parser = parse_block_range)]
    blocks: Option<std::ops::Range<u32>>,

    /// Verify page checksums. Requires a checksum implementation to be
    /// wired in by the caller; without one this flag is a no-op warning.
    #[arg(long)]
    verify_checksums: bool,

    /// Comma-separated attribute type list, e.g. "int,text,~,bigint".
    #[arg(long, default_value = "")]
    attrs: String,

    /// Don't chase external TOAST pointers; print a sentinel instead.
    #[arg(long)]
    no_toast: bool,

    /// Chunk size TOAST values were split into when written; used only to
    /// estimate how many chunks a reassembly ought to have.
    #[arg(long, default_value_t = pg_peek_lib::constants::DEFAULT_TOAST_MAX_CHUNK_SIZE)]
    toast_chunk_size: u32,

    /// Force item interpretation instead of inferring it from the page's
    /// special section.
    #[arg(long, value_enum, default_value_t = InterpretationArg::Auto)]
    interpret: InterpretationArg,

    /// Byte order the file was written in.
    #[arg(long, value_enum, default_value_t = EndianArg::Little)]
    endian: EndianArg,

    /// Don't flag tuples whose xmax is set as a decode concern.
    #[arg(long)]
    ignore_xmax_nonzero: bool,

    /// Emit a real tab (`\t`) for an embedded tab byte instead of the
    /// source's historical `\r` substitution.
    #[arg(long)]
    emit_real_tab_escape: bool,

    /// Print a hex+ASCII dump alongside each decoded item.
    #[arg(long)]
    hex_dump: bool,

    /// Address hex dumps from the start of the file rather than the page.
    #[arg(long)]
    hex_absolute: bool,

    /// Print the final pages/items/errors summary as JSON on stdout instead
    /// of to the human-readable log.
    #[arg(long)]
    json: bool,
}

fn parse_block_range(s: &str) -> Result<std::ops::Range<u32>, String> {
    let (start, end) = s
        .split_once('-')
        .ok_or_else(|| format!("expected START-END, got '{s}'"))?;
    let start: u32 = start.parse().map_err(|_| format!("bad start block '{start}'"))?;
    let end: u32 = end.parse().map_err(|_| format!("bad end block '{end}'"))?;
    Ok(start..end)
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    let attrs = match AttrType::parse_list(&cli.attrs) {
        Ok(a) => a,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let config = Config {
        page_size_override: cli.page_size,
        segment_size: cli.segment_size.unwrap_or(pg_peek_lib::constants::DEFAULT_SEGMENT_SIZE),
        segment_number: cli.segment_number,
        block_range: cli.blocks,
        verify_checksums: cli.verify_checksums,
        decode_attributes: attrs,
        resolve_toast: !cli.no_toast,
        toast_chunk_size: cli.toast_chunk_size,
        item_interpretation: match cli.interpret {
            InterpretationArg::Auto => ItemInterpretation::Auto,
            InterpretationArg::Heap => ItemInterpretation::ForceHeap,
            InterpretationArg::Index => ItemInterpretation::ForceIndex,
        },
        ignore_xmax_nonzero: cli.ignore_xmax_nonzero,
        endian: match cli.endian {
            EndianArg::Little => Endianness::Little,
            EndianArg::Big => Endianness::Big,
        },
        emit_real_tab_escape: cli.emit_real_tab_escape,
        hex_dump: cli.hex_dump,
        hex_dump_absolute_addressing: cli.hex_absolute,
        ..Config::default()
    };

    if cli.verify_checksums {
        log::warn!("--verify-checksums requested but no checksum implementation is wired in; mismatches will not be reported");
    }

    let stdout = io::stdout();
    let mut handle = stdout.lock();
    match dump_file(&cli.filename, &config, None, &mut handle) {
        Ok(stats) => {
            if cli.json {
                match serde_json::to_string(&stats) {
                    Ok(j) => println!("{j}"),
                    Err(e) => eprintln!("error serializing stats: {e}"),
                }
            } else {
                eprintln!("{stats}");
            }
            if stats.errors > 0 {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            }
        }
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
