//! (De)compression of stored dimension arrays.

use crate::error::ApplyError;
use crate::models;

use bytes::Bytes;
use flate2::read::{GzDecoder, GzEncoder, ZlibEncoder};
use std::io::Read;
use zune_inflate::{DeflateDecoder, DeflateOptions};

/// Decompresses some Bytes and returns the uncompressed data.
///
/// # Arguments
///
/// * `compression`: Compression algorithm
/// * `data`: Compressed data
pub fn decompress(compression: models::Compression, data: &Bytes) -> Result<Bytes, ApplyError> {
    match compression {
        models::Compression::Gzip => decompress_flate2_gzip(data),
        models::Compression::Zlib => decompress_zune_zlib(data),
    }
}

/// Compresses some Bytes and returns the compressed data.
///
/// # Arguments
///
/// * `compression`: Compression algorithm
/// * `data`: Uncompressed data
pub fn compress(compression: models::Compression, data: &[u8]) -> Result<Bytes, ApplyError> {
    let level = flate2::Compression::default();
    let mut result = Vec::with_capacity(data.len() / 2);
    let read = match compression {
        models::Compression::Gzip => GzEncoder::new(data, level).read_to_end(&mut result),
        models::Compression::Zlib => ZlibEncoder::new(data, level).read_to_end(&mut result),
    };
    read.map_err(ApplyError::Compression)?;
    Ok(result.into())
}

fn decompress_flate2_gzip(data: &Bytes) -> Result<Bytes, ApplyError> {
    let mut decoder = GzDecoder::<&[u8]>::new(data);
    // Dimension values are reinterpreted as arrays of up to 8-byte numbers, so the decompressed
    // buffer must be 8-byte aligned.
    let mut buf = maligned::align_first::<u8, maligned::A8>(data.len() * 2);
    decoder.read_to_end(&mut buf)?;
    buf.shrink_to(0);
    Ok(buf.into())
}

fn decompress_zune_zlib(data: &Bytes) -> Result<Bytes, ApplyError> {
    let options = DeflateOptions::default().set_size_hint(data.len());
    let mut decoder = DeflateDecoder::new_with_options(data, options);
    let data = decoder.decode_zlib()?;
    Ok(data.into())
}
