//! Record codec.
//!
//! Every entry in a data file is a single record:
//!
//! ```text
//! +----------+------------+--------------+-------------+-------------+-----+-------+
//! | crc32:u32| keySize:u8 | valueSize:u32| tombstone:u8| reserved[7] | key | value |
//! +----------+------------+--------------+-------------+-------------+-----+-------+
//! |  4 bytes |   1 byte   |   4 bytes    |   1 byte    |   7 bytes   | var |  var  |
//! +----------+------------+--------------+-------------+-------------+-----+-------+
//! ```
//!
//! The CRC-32 (Castagnoli) covers everything after the checksum field
//! through the end of the body. A tombstone has a zero-length value.

use byteorder::{BigEndian, ByteOrder, ReadBytesExt};
use crc::{Crc, CRC_32_ISCSI};

use crate::error::Result;
use crate::errcorrupt;
use crate::Error;

/// Fixed record header size in bytes.
pub const HEADER_SIZE: usize = 17;

/// Maximum key size, bounded by the u8 length prefix.
pub const MAX_KEY_SIZE: usize = u8::MAX as usize;

/// Maximum value size, bounded by the u32 length prefix.
pub const MAX_VALUE_SIZE: usize = u32::MAX as usize;

const CASTAGNOLI: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

/// A decoded log record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub tombstone: bool,
}

impl Record {
    /// On-disk size of this record.
    pub fn size(&self) -> u32 {
        size_of(self.key.len(), self.value.len())
    }
}

/// On-disk size of a record with the given key and value lengths.
pub fn size_of(key_len: usize, value_len: usize) -> u32 {
    (HEADER_SIZE + key_len + value_len) as u32
}

/// Rejects keys the u8 length prefix cannot represent. An empty key is
/// rejected as well: the header cannot tell it apart from a missing one.
pub fn validate_key(key: &[u8]) -> Result<()> {
    if key.is_empty() {
        return Err(Error::InvalidKey("key must not be empty".to_string()));
    }
    if key.len() > MAX_KEY_SIZE {
        return Err(Error::InvalidKey(format!(
            "key is {} bytes, maximum is {MAX_KEY_SIZE}",
            key.len()
        )));
    }
    Ok(())
}

/// Encodes a record into its on-disk form.
pub fn encode(key: &[u8], value: &[u8], tombstone: bool) -> Result<Vec<u8>> {
    validate_key(key)?;
    if value.len() > MAX_VALUE_SIZE {
        return Err(Error::InvalidValue(format!(
            "value is {} bytes, maximum is {MAX_VALUE_SIZE}",
            value.len()
        )));
    }
    if tombstone && !value.is_empty() {
        return Err(Error::InvalidValue(format!(
            "tombstone with {}-byte value",
            value.len()
        )));
    }

    let total = HEADER_SIZE + key.len() + value.len();
    let mut buf = Vec::with_capacity(total);
    buf.extend_from_slice(&[0u8; 4]); // checksum, patched below
    buf.push(key.len() as u8);
    let mut value_size = [0u8; 4];
    BigEndian::write_u32(&mut value_size, value.len() as u32);
    buf.extend_from_slice(&value_size);
    buf.push(tombstone as u8);
    buf.extend_from_slice(&[0u8; 7]); // reserved
    buf.extend_from_slice(key);
    buf.extend_from_slice(value);

    let crc = CASTAGNOLI.checksum(&buf[4..]);
    BigEndian::write_u32(&mut buf[..4], crc);

    Ok(buf)
}

/// Decodes a record from a buffer holding exactly its on-disk bytes.
pub fn decode(buf: &[u8]) -> Result<Record> {
    if buf.len() < HEADER_SIZE {
        return errcorrupt!("record shorter than header: {} bytes", buf.len());
    }

    let mut rdr = buf;
    let crc = rdr.read_u32::<BigEndian>()?;
    let key_size = rdr.read_u8()? as usize;
    let value_size = rdr.read_u32::<BigEndian>()? as usize;
    let tombstone = match rdr.read_u8()? {
        0 => false,
        1 => true,
        b => return errcorrupt!("invalid tombstone byte {b}"),
    };

    if key_size == 0 {
        return errcorrupt!("record with zero-length key");
    }
    if tombstone && value_size != 0 {
        return errcorrupt!("tombstone with {value_size}-byte value");
    }

    let total = HEADER_SIZE + key_size + value_size;
    if buf.len() < total {
        return errcorrupt!(
            "record body truncated: have {} bytes, need {total}",
            buf.len()
        );
    }

    let computed = CASTAGNOLI.checksum(&buf[4..total]);
    if computed != crc {
        return errcorrupt!("checksum mismatch: stored {crc:#010x}, computed {computed:#010x}");
    }

    let key = buf[HEADER_SIZE..HEADER_SIZE + key_size].to_vec();
    let value = buf[HEADER_SIZE + key_size..total].to_vec();

    Ok(Record {
        key,
        value,
        tombstone,
    })
}
