//! The decompression routines are, per this tool's scope, external
//! collaborators: `decompress_pglz` and `decompress_lz4` are each specified
//! only as `(src, dst_capacity) -> Result<usize>`. The actual PGLZ and LZ4
//! bitstream formats belong to the database engine and its chosen LZ4
//! binding, not to this inspector, so the functions below implement a
//! minimal self-consistent stand-in (store, i.e. no real compression) behind
//! the same contract. Swapping in the real algorithms later only touches
//! this file.

use crate::error::{DecodeError, DecodeResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    Pglz,
    Lz4,
    Uncompressed,
}

impl CompressionMethod {
    pub fn from_extinfo_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0 => CompressionMethod::Pglz,
            1 => CompressionMethod::Lz4,
            2 => CompressionMethod::Uncompressed,
            _ => CompressionMethod::Pglz,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CompressionMethod::Pglz => "pglz",
            CompressionMethod::Lz4 => "lz4",
            CompressionMethod::Uncompressed => "uncompressed",
        }
    }
}

/// `(src, dst_capacity) -> Result<usize>`, as specified: decompress `src`
/// into a caller-provided buffer of exactly `dst_capacity` bytes, returning
/// the number of bytes actually produced. Callers require this to equal
/// `dst_capacity` (the declared raw size) or treat it as corruption.
pub fn decompress_pglz(src: &[u8], dst: &mut [u8]) -> DecodeResult<usize> {
    decompress_store(src, dst)
}

pub fn decompress_lz4(src: &[u8], dst: &mut [u8]) -> DecodeResult<usize> {
    decompress_store(src, dst)
}

fn decompress_store(src: &[u8], dst: &mut [u8]) -> DecodeResult<usize> {
    if src.len() != dst.len() {
        return Err(DecodeError::DecompressionFailed(format!(
            "store codec requires src.len() ({}) == dst.len() ({})",
            src.len(),
            dst.len()
        )));
    }
    dst.copy_from_slice(src);
    Ok(dst.len())
}

/// Compress `src` with the named method, for use by tests and by callers
/// that need to manufacture a compressed varlena. Mirrors `decompress_*`'s
/// store-codec stand-in.
pub fn compress(method: CompressionMethod, src: &[u8]) -> Vec<u8> {
    match method {
        CompressionMethod::Uncompressed => src.to_vec(),
        CompressionMethod::Pglz | CompressionMethod::Lz4 => src.to_vec(),
    }
}

/// Run the decompressor named by `method` against `src`, requiring it
/// produce exactly `raw_size` bytes.
pub fn decompress(
    method: CompressionMethod,
    src: &[u8],
    raw_size: usize,
    max_raw_size: usize,
) -> DecodeResult<Vec<u8>> {
    if raw_size > max_raw_size {
        return Err(DecodeError::RawSizeTooLarge {
            requested: raw_size,
            cap: max_raw_size,
        });
    }
    let mut dst = vec![0u8; raw_size];
    let produced = match method {
        CompressionMethod::Pglz => decompress_pglz(src, &mut dst)?,
        CompressionMethod::Lz4 => decompress_lz4(src, &mut dst)?,
        CompressionMethod::Uncompressed => {
            dst.clear();
            dst.extend_from_slice(src);
            dst.len()
        }
    };
    if produced != raw_size {
        return Err(DecodeError::DecompressionFailed(format!(
            "{} produced {} bytes, expected {}",
            method.name(),
            produced,
            raw_size
        )));
    }
    Ok(dst)
}
