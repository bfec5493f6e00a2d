//! Small helpers shared by the HTTP and TCP transaction engines: encoding
//! and decoding the CRC32 the two sides exchange to confirm a transaction.

use crate::error::Error;

/// Renders a CRC32 the way both wire protocols expect it: decimal ASCII,
/// unsigned.
pub fn crc32_to_ascii(crc: u32) -> String {
    crc.to_string()
}

/// Parses a peer-reported CRC32: decimal ASCII of an unsigned 32-bit
/// integer, trimmed of surrounding whitespace.
pub fn parse_crc32_ascii(text: &str) -> Result<u32, Error> {
    text.trim()
        .parse::<u32>()
        .map_err(|_| Error::TransactionInvalidServerResponse(format!("invalid checksum: {text:?}")))
}
