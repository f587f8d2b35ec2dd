//! The wire/on-disk representation of a single drone sighting, and the
//! length-prefixed batch format used to replicate many of them at once.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{Deserialize, ErrorKind, ProtoError, ProtoResult, Serialize, SizedRead, SizedWrite};

/// A single drone sighting as recorded by one node.
///
/// Wire layout (all little-endian, fixed width, exactly
/// [`SightingRecord::WIRE_SIZE`] bytes): `drone_id: u32`, `node_id: u32`,
/// `timestamp: u64`, `lat: f64`, `lon: f64`, `is_new: u8`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SightingRecord {
    pub drone_id: u32,
    pub node_id: u32,
    pub timestamp: u64,
    pub lat: f64,
    pub lon: f64,
    /// True while this record has not yet been broadcast by its origin node.
    pub is_new: bool,
}

impl SightingRecord {
    pub const WIRE_SIZE: usize = 4 + 4 + 8 + 8 + 8 + 1;

    pub fn new(drone_id: u32, node_id: u32, timestamp: u64, lat: f64, lon: f64) -> Self {
        SightingRecord {
            drone_id,
            node_id,
            timestamp,
            lat,
            lon,
            is_new: true,
        }
    }
}

impl Serialize for SightingRecord {
    fn serialize<W: SizedWrite>(&self, stream: &mut W) -> ProtoResult<()> {
        if stream.free_capacity() < Self::WIRE_SIZE {
            return Err(ProtoError::Wait);
        }
        stream.write_u32::<LittleEndian>(self.drone_id)?;
        stream.write_u32::<LittleEndian>(self.node_id)?;
        stream.write_u64::<LittleEndian>(self.timestamp)?;
        stream.write_f64::<LittleEndian>(self.lat)?;
        stream.write_f64::<LittleEndian>(self.lon)?;
        stream.write_u8(self.is_new as u8)?;
        Ok(())
    }
}

impl Deserialize for SightingRecord {
    fn deserialize<R: SizedRead>(stream: &mut R) -> ProtoResult<Self> {
        if stream.remaining_data() < Self::WIRE_SIZE {
            return Err(ProtoError::Wait);
        }
        let drone_id = stream.read_u32::<LittleEndian>()?;
        let node_id = stream.read_u32::<LittleEndian>()?;
        let timestamp = stream.read_u64::<LittleEndian>()?;
        let lat = stream.read_f64::<LittleEndian>()?;
        let lon = stream.read_f64::<LittleEndian>()?;
        let is_new = stream.read_u8()? != 0;
        Ok(SightingRecord {
            drone_id,
            node_id,
            timestamp,
            lat,
            lon,
            is_new,
        })
    }
}

/// A count-prefixed batch of sighting records: a `u32` little-endian count
/// followed by that many fixed-width records, back to back.
pub struct RecordBatch;

impl RecordBatch {
    /// Marshals `records` into a fresh byte buffer: `u32` count, then each
    /// record in order.
    pub fn marshal(records: &[SightingRecord]) -> Vec<u8> {
        let mut buf = vec![0u8; 4 + records.len() * SightingRecord::WIRE_SIZE];
        {
            let mut cursor = std::io::Cursor::new(&mut buf[..]);
            cursor
                .write_u32::<LittleEndian>(records.len() as u32)
                .expect("buffer sized for count");
            for record in records {
                record
                    .serialize(&mut cursor)
                    .expect("buffer sized for every record");
            }
        }
        buf
    }

    /// Parses a batch previously produced by [`RecordBatch::marshal`].
    /// Rejects a buffer whose declared count doesn't match the data actually
    /// present, rather than silently truncating.
    pub fn unmarshal(data: &[u8]) -> ProtoResult<Vec<SightingRecord>> {
        if data.len() < 4 {
            return Err(ProtoError::Fatal(ErrorKind::MalformedFrame));
        }
        let mut cursor = std::io::Cursor::new(data);
        let count = cursor.read_u32::<LittleEndian>()? as usize;

        let expected_len = 4 + count * SightingRecord::WIRE_SIZE;
        if data.len() != expected_len {
            return Err(ProtoError::Fatal(ErrorKind::MalformedFrame));
        }

        let mut records = Vec::with_capacity(count);
        for _ in 0..count {
            records.push(SightingRecord::deserialize(&mut cursor)?);
        }
        Ok(records)
    }
}
