//! Decoder for the raw performance data block (`winperf.h` layout).
//!
//! ```text
//! PERF_DATA_BLOCK
//! ├── PERF_OBJECT_TYPE                     (TotalByteLength → next object)
//! │   ├── PERF_COUNTER_DEFINITION × NumCounters   (from HeaderLength)
//! │   ├── PERF_INSTANCE_DEFINITION + name          (from DefinitionLength)
//! │   │   └── PERF_COUNTER_BLOCK + values
//! │   └── ... × NumInstances
//! │       or a single PERF_COUNTER_BLOCK when NumInstances == PERF_NO_INSTANCES
//! └── ... × NumObjectTypes
//! ```
//!
//! All integers are little-endian. Every access is bounds-checked against the
//! enclosing record, so a truncated or corrupt block fails with a [`DecodeError`]
//! and is never partially decoded.

use std::fmt;

use crate::collector::counter_types::{PERF_ELAPSED_TIME, is_base, needs_base};

pub const PERF_DATA_BLOCK_SIZE: usize = 88;
pub const PERF_OBJECT_TYPE_SIZE: usize = 64;
pub const PERF_COUNTER_DEFINITION_SIZE: usize = 40;
pub const PERF_INSTANCE_DEFINITION_SIZE: usize = 24;
pub const PERF_COUNTER_BLOCK_SIZE: usize = 4;

/// `NumInstances` of an object that has a single counter block.
pub const PERF_NO_INSTANCES: i32 = -1;

/// `"PERF"` as UTF-16LE.
pub const SIGNATURE: [u8; 8] = *b"P\0E\0R\0F\0";

/// Malformed performance data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// A field lies past the end of its enclosing record.
    Truncated {
        what: &'static str,
        offset: usize,
        needed: usize,
        available: usize,
    },
    /// The block does not start with `"PERF"`.
    BadSignature([u8; 8]),
    /// A length field is smaller than the record it describes.
    BadLength {
        what: &'static str,
        offset: usize,
        length: usize,
    },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Truncated {
                what,
                offset,
                needed,
                available,
            } => write!(
                f,
                "truncated performance data: {} at offset {} needs {} bytes, {} available",
                what, offset, needed, available
            ),
            DecodeError::BadSignature(sig) => {
                write!(f, "invalid performance data signature: {:02x?}", sig)
            }
            DecodeError::BadLength {
                what,
                offset,
                length,
            } => write!(
                f,
                "invalid performance data: {} at offset {} has length {}",
                what, offset, length
            ),
        }
    }
}

impl std::error::Error for DecodeError {}

/// Bounds-checked little-endian view of a byte range.
///
/// Offsets passed to the accessors are relative to the view; errors report
/// absolute offsets in the original buffer.
#[derive(Clone, Copy)]
struct Reader<'a> {
    buf: &'a [u8],
    base: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, base: 0 }
    }

    fn bytes(&self, offset: usize, len: usize, what: &'static str) -> Result<&'a [u8], DecodeError> {
        let truncated = || DecodeError::Truncated {
            what,
            offset: self.base + offset,
            needed: len,
            available: self.buf.len().saturating_sub(offset),
        };
        let end = offset.checked_add(len).ok_or_else(truncated)?;
        self.buf.get(offset..end).ok_or_else(truncated)
    }

    fn sub(&self, offset: usize, len: usize, what: &'static str) -> Result<Reader<'a>, DecodeError> {
        Ok(Reader {
            buf: self.bytes(offset, len, what)?,
            base: self.base + offset,
        })
    }

    fn array<const N: usize>(&self, offset: usize, what: &'static str) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.bytes(offset, N, what)?);
        Ok(out)
    }

    fn u32(&self, offset: usize, what: &'static str) -> Result<u32, DecodeError> {
        Ok(u32::from_le_bytes(self.array(offset, what)?))
    }

    fn i32(&self, offset: usize, what: &'static str) -> Result<i32, DecodeError> {
        Ok(i32::from_le_bytes(self.array(offset, what)?))
    }

    fn i64(&self, offset: usize, what: &'static str) -> Result<i64, DecodeError> {
        Ok(i64::from_le_bytes(self.array(offset, what)?))
    }

    fn utf16(&self, offset: usize, len: usize, what: &'static str) -> Result<String, DecodeError> {
        let raw = self.bytes(offset, len, what)?;
        let units: Vec<u16> = raw
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .take_while(|&unit| unit != 0)
            .collect();
        Ok(String::from_utf16_lossy(&units))
    }

    fn len(&self) -> usize {
        self.buf.len()
    }
}

/// `PERF_DATA_BLOCK`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PerfDataBlock {
    pub signature: [u8; 8],
    pub little_endian: u32,
    pub version: u32,
    pub revision: u32,
    pub total_byte_length: u32,
    pub header_length: u32,
    pub num_object_types: u32,
    pub default_object: i32,
    /// `SYSTEMTIME` fields, year first.
    pub system_time: [u16; 8],
    pub perf_time: i64,
    pub perf_freq: i64,
    pub perf_time_100ns: i64,
    pub system_name_length: u32,
    pub system_name_offset: u32,
}

impl PerfDataBlock {
    fn read(r: &Reader<'_>) -> Result<Self, DecodeError> {
        const WHAT: &str = "PERF_DATA_BLOCK";
        r.bytes(0, PERF_DATA_BLOCK_SIZE, WHAT)?;
        let mut system_time = [0u16; 8];
        for (i, field) in system_time.iter_mut().enumerate() {
            *field = u16::from_le_bytes(r.array(36 + i * 2, WHAT)?);
        }
        Ok(Self {
            signature: r.array(0, WHAT)?,
            little_endian: r.u32(8, WHAT)?,
            version: r.u32(12, WHAT)?,
            revision: r.u32(16, WHAT)?,
            total_byte_length: r.u32(20, WHAT)?,
            header_length: r.u32(24, WHAT)?,
            num_object_types: r.u32(28, WHAT)?,
            default_object: r.i32(32, WHAT)?,
            system_time,
            perf_time: r.i64(56, WHAT)?,
            perf_freq: r.i64(64, WHAT)?,
            perf_time_100ns: r.i64(72, WHAT)?,
            system_name_length: r.u32(80, WHAT)?,
            system_name_offset: r.u32(84, WHAT)?,
        })
    }
}

/// `PERF_OBJECT_TYPE`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PerfObjectType {
    pub total_byte_length: u32,
    pub definition_length: u32,
    pub header_length: u32,
    pub object_name_title_index: u32,
    pub object_help_title_index: u32,
    pub detail_level: u32,
    pub num_counters: u32,
    pub default_counter: i32,
    pub num_instances: i32,
    pub code_page: u32,
    pub perf_time: i64,
    pub perf_freq: i64,
}

impl PerfObjectType {
    fn read(r: &Reader<'_>) -> Result<Self, DecodeError> {
        const WHAT: &str = "PERF_OBJECT_TYPE";
        r.bytes(0, PERF_OBJECT_TYPE_SIZE, WHAT)?;
        // Offsets 16 and 24 hold title pointers that are only meaningful in-process.
        Ok(Self {
            total_byte_length: r.u32(0, WHAT)?,
            definition_length: r.u32(4, WHAT)?,
            header_length: r.u32(8, WHAT)?,
            object_name_title_index: r.u32(12, WHAT)?,
            object_help_title_index: r.u32(20, WHAT)?,
            detail_level: r.u32(28, WHAT)?,
            num_counters: r.u32(32, WHAT)?,
            default_counter: r.i32(36, WHAT)?,
            num_instances: r.i32(40, WHAT)?,
            code_page: r.u32(44, WHAT)?,
            perf_time: r.i64(48, WHAT)?,
            perf_freq: r.i64(56, WHAT)?,
        })
    }
}

/// `PERF_COUNTER_DEFINITION`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PerfCounterDefinition {
    pub byte_length: u32,
    pub counter_name_title_index: u32,
    pub counter_help_title_index: u32,
    pub default_scale: i32,
    pub detail_level: u32,
    pub counter_type: u32,
    pub counter_size: u32,
    pub counter_offset: u32,
}

impl PerfCounterDefinition {
    fn read(r: &Reader<'_>) -> Result<Self, DecodeError> {
        const WHAT: &str = "PERF_COUNTER_DEFINITION";
        r.bytes(0, PERF_COUNTER_DEFINITION_SIZE, WHAT)?;
        Ok(Self {
            byte_length: r.u32(0, WHAT)?,
            counter_name_title_index: r.u32(4, WHAT)?,
            counter_help_title_index: r.u32(12, WHAT)?,
            default_scale: r.i32(20, WHAT)?,
            detail_level: r.u32(24, WHAT)?,
            counter_type: r.u32(28, WHAT)?,
            counter_size: r.u32(32, WHAT)?,
            counter_offset: r.u32(36, WHAT)?,
        })
    }
}

/// `PERF_INSTANCE_DEFINITION`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PerfInstanceDefinition {
    pub byte_length: u32,
    pub parent_object_title_index: u32,
    pub parent_object_instance: u32,
    pub unique_id: i32,
    pub name_offset: u32,
    pub name_length: u32,
}

impl PerfInstanceDefinition {
    fn read(r: &Reader<'_>) -> Result<Self, DecodeError> {
        const WHAT: &str = "PERF_INSTANCE_DEFINITION";
        r.bytes(0, PERF_INSTANCE_DEFINITION_SIZE, WHAT)?;
        Ok(Self {
            byte_length: r.u32(0, WHAT)?,
            parent_object_title_index: r.u32(4, WHAT)?,
            parent_object_instance: r.u32(8, WHAT)?,
            unique_id: r.i32(12, WHAT)?,
            name_offset: r.u32(16, WHAT)?,
            name_length: r.u32(20, WHAT)?,
        })
    }
}

/// One instance (or the single counter block) of an object.
#[derive(Debug, Clone, PartialEq)]
pub struct PerfInstance {
    pub definition: Option<PerfInstanceDefinition>,
    pub name: Option<String>,
    /// Raw values, one per counter definition of the enclosing object.
    pub values: Vec<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PerfObject {
    pub header: PerfObjectType,
    pub counters: Vec<PerfCounterDefinition>,
    pub instances: Vec<PerfInstance>,
}

impl PerfObject {
    /// Returns `(first, second)` raw values of counter `index` for `instance`.
    ///
    /// Counters that need a base take the value of the base definition that
    /// follows them. Elapsed-time counters are paired with the object's sample
    /// time.
    pub fn sample(&self, instance: &PerfInstance, index: usize) -> (i64, i64) {
        let first = instance.values.get(index).copied().unwrap_or(0) as i64;
        let Some(def) = self.counters.get(index) else {
            return (first, 0);
        };

        let second = if def.counter_type == PERF_ELAPSED_TIME {
            self.header.perf_time
        } else if needs_base(def.counter_type) {
            match self.counters.get(index + 1) {
                Some(next) if is_base(next.counter_type) => {
                    instance.values.get(index + 1).copied().unwrap_or(0) as i64
                }
                _ => 0,
            }
        } else {
            0
        };
        (first, second)
    }
}

/// A decoded performance data block.
#[derive(Debug, Clone, PartialEq)]
pub struct PerfData {
    pub header: PerfDataBlock,
    pub system_name: Option<String>,
    pub objects: Vec<PerfObject>,
}

/// Decodes a raw performance data block.
pub fn decode(buf: &[u8]) -> Result<PerfData, DecodeError> {
    let header = PerfDataBlock::read(&Reader::new(buf))?;
    if header.signature != SIGNATURE {
        return Err(DecodeError::BadSignature(header.signature));
    }

    let total = header.total_byte_length as usize;
    let r = Reader::new(buf).sub(0, total, "PERF_DATA_BLOCK.TotalByteLength")?;

    let header_length = header.header_length as usize;
    if header_length < PERF_DATA_BLOCK_SIZE || header_length > total {
        return Err(DecodeError::BadLength {
            what: "PERF_DATA_BLOCK.HeaderLength",
            offset: 0,
            length: header_length,
        });
    }

    let system_name = match header.system_name_length {
        0 => None,
        len => Some(r.utf16(
            header.system_name_offset as usize,
            len as usize,
            "PERF_DATA_BLOCK system name",
        )?),
    };

    // Counts are untrusted; never reserve more than the buffer can hold.
    let mut objects = Vec::with_capacity(
        (header.num_object_types as usize).min(r.len() / PERF_OBJECT_TYPE_SIZE),
    );
    let mut offset = header_length;
    for _ in 0..header.num_object_types {
        let rest = r.sub(offset, r.len().saturating_sub(offset), "PERF_OBJECT_TYPE")?;
        let object = decode_object(&rest)?;
        offset += object.header.total_byte_length as usize;
        objects.push(object);
    }

    Ok(PerfData {
        header,
        system_name,
        objects,
    })
}

fn decode_object(r: &Reader<'_>) -> Result<PerfObject, DecodeError> {
    let header = PerfObjectType::read(r)?;

    let total = header.total_byte_length as usize;
    let definition_length = header.definition_length as usize;
    let header_length = header.header_length as usize;
    if header_length < PERF_OBJECT_TYPE_SIZE
        || definition_length < header_length
        || total < definition_length
    {
        return Err(DecodeError::BadLength {
            what: "PERF_OBJECT_TYPE",
            offset: r.base,
            length: total,
        });
    }
    let r = r.sub(0, total, "PERF_OBJECT_TYPE.TotalByteLength")?;

    let definitions = r.sub(header_length, definition_length - header_length, "PERF_COUNTER_DEFINITION")?;
    let mut counters = Vec::with_capacity(
        (header.num_counters as usize).min(definitions.len() / PERF_COUNTER_DEFINITION_SIZE),
    );
    let mut offset = 0;
    for _ in 0..header.num_counters {
        let def = PerfCounterDefinition::read(&definitions.sub(
            offset,
            PERF_COUNTER_DEFINITION_SIZE,
            "PERF_COUNTER_DEFINITION",
        )?)?;
        if (def.byte_length as usize) < PERF_COUNTER_DEFINITION_SIZE {
            return Err(DecodeError::BadLength {
                what: "PERF_COUNTER_DEFINITION",
                offset: definitions.base + offset,
                length: def.byte_length as usize,
            });
        }
        offset += def.byte_length as usize;
        counters.push(def);
    }

    let mut instances = Vec::new();
    let mut offset = definition_length;
    if header.num_instances == PERF_NO_INSTANCES || header.num_instances < 0 {
        let (values, _) = read_counter_block(&r, offset, &counters)?;
        instances.push(PerfInstance {
            definition: None,
            name: None,
            values,
        });
    } else {
        instances.reserve((header.num_instances as usize).min(
            r.len() / (PERF_INSTANCE_DEFINITION_SIZE + PERF_COUNTER_BLOCK_SIZE),
        ));
        for _ in 0..header.num_instances {
            let instance_reader = r.sub(offset, r.len().saturating_sub(offset), "PERF_INSTANCE_DEFINITION")?;
            let definition = PerfInstanceDefinition::read(&instance_reader)?;
            let byte_length = definition.byte_length as usize;
            if byte_length < PERF_INSTANCE_DEFINITION_SIZE {
                return Err(DecodeError::BadLength {
                    what: "PERF_INSTANCE_DEFINITION",
                    offset: instance_reader.base,
                    length: byte_length,
                });
            }
            let name = instance_reader.utf16(
                definition.name_offset as usize,
                definition.name_length as usize,
                "PERF_INSTANCE_DEFINITION name",
            )?;

            let block_offset = offset + byte_length;
            let (values, block_length) = read_counter_block(&r, block_offset, &counters)?;
            offset = block_offset + block_length;

            instances.push(PerfInstance {
                definition: Some(definition),
                name: Some(name),
                values,
            });
        }
    }

    Ok(PerfObject {
        header,
        counters,
        instances,
    })
}

fn read_counter_block(
    r: &Reader<'_>,
    offset: usize,
    counters: &[PerfCounterDefinition],
) -> Result<(Vec<u64>, usize), DecodeError> {
    let byte_length = r.u32(offset, "PERF_COUNTER_BLOCK")? as usize;
    if byte_length < PERF_COUNTER_BLOCK_SIZE {
        return Err(DecodeError::BadLength {
            what: "PERF_COUNTER_BLOCK",
            offset: r.base + offset,
            length: byte_length,
        });
    }
    let block = r.sub(offset, byte_length, "PERF_COUNTER_BLOCK")?;

    let mut values = Vec::with_capacity(counters.len());
    for def in counters {
        let at = def.counter_offset as usize;
        let value = match def.counter_size {
            0 => 0,
            4 => u64::from(block.u32(at, "counter value")?),
            8 => block.i64(at, "counter value")? as u64,
            size => {
                // Variable-length payloads (text counters) carry no numeric value.
                block.bytes(at, size as usize, "counter value")?;
                0
            }
        };
        values.push(value);
    }
    Ok((values, byte_length))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::counter_types::{
        PERF_AVERAGE_BASE, PERF_AVERAGE_TIMER, PERF_COUNTER_COUNTER, PERF_COUNTER_LARGE_RAWCOUNT,
    };
    use crate::collector::mock::{ObjectBuilder, PerfDataBuilder};

    fn sample_block() -> PerfDataBuilder {
        PerfDataBuilder::new().system_name("HOST").object(
            ObjectBuilder::new(238)
                .perf_time(5_000, 1_000)
                .counter(6, PERF_COUNTER_COUNTER)
                .counter(10, PERF_COUNTER_LARGE_RAWCOUNT)
                .instance("0", &[100, 1 << 40])
                .instance("_Total", &[300, 7]),
        )
    }

    #[test]
    fn test_decode_round_trip() {
        let data = decode(&sample_block().build()).unwrap();

        assert_eq!(data.header.signature, SIGNATURE);
        assert_eq!(data.system_name.as_deref(), Some("HOST"));
        assert_eq!(data.objects.len(), 1);

        let object = &data.objects[0];
        assert_eq!(object.header.object_name_title_index, 238);
        assert_eq!(object.header.perf_freq, 1_000);
        assert_eq!(object.counters.len(), 2);
        assert_eq!(object.counters[0].counter_name_title_index, 6);
        assert_eq!(object.counters[1].counter_size, 8);

        let names: Vec<_> = object
            .instances
            .iter()
            .map(|i| i.name.clone().unwrap_or_default())
            .collect();
        assert_eq!(names, vec!["0", "_Total"]);
        assert_eq!(object.instances[0].values, vec![100, 1 << 40]);
        assert_eq!(object.instances[1].values, vec![300, 7]);
    }

    #[test]
    fn test_decode_single_block_object() {
        let block = PerfDataBuilder::new()
            .object(
                ObjectBuilder::new(4)
                    .counter(24, PERF_COUNTER_LARGE_RAWCOUNT)
                    .single(&[8 << 30]),
            )
            .build();
        let data = decode(&block).unwrap();
        let object = &data.objects[0];
        assert_eq!(object.header.num_instances, PERF_NO_INSTANCES);
        assert_eq!(object.instances.len(), 1);
        assert_eq!(object.instances[0].name, None);
        assert_eq!(object.instances[0].values, vec![8 << 30]);
    }

    #[test]
    fn test_decode_multiple_objects() {
        let block = sample_block()
            .object(ObjectBuilder::new(4).counter(24, PERF_COUNTER_LARGE_RAWCOUNT).single(&[1]))
            .build();
        let data = decode(&block).unwrap();
        assert_eq!(data.objects.len(), 2);
        assert_eq!(data.objects[1].header.object_name_title_index, 4);
    }

    #[test]
    fn test_every_truncation_fails_cleanly() {
        let block = sample_block().build();
        for len in 0..block.len() {
            assert!(
                decode(&block[..len]).is_err(),
                "truncated block of {} bytes decoded",
                len
            );
        }
    }

    #[test]
    fn test_bad_signature() {
        let mut block = sample_block().build();
        block[0] = b'X';
        assert!(matches!(decode(&block), Err(DecodeError::BadSignature(_))));
    }

    #[test]
    fn test_corrupt_offsets_fail() {
        let block = sample_block().build();
        let object_start = PERF_DATA_BLOCK_SIZE + "HOST\0".len() * 2;
        let object_start = object_start.next_multiple_of(8);

        // Object claims more bytes than the block holds.
        let mut corrupt = block.clone();
        corrupt[object_start..object_start + 4].copy_from_slice(&u32::MAX.to_le_bytes());
        assert!(decode(&corrupt).is_err());

        // Counter offset beyond the counter block.
        let mut corrupt = block.clone();
        let def = object_start + PERF_OBJECT_TYPE_SIZE;
        corrupt[def + 36..def + 40].copy_from_slice(&4096u32.to_le_bytes());
        assert!(matches!(
            decode(&corrupt),
            Err(DecodeError::Truncated { what: "counter value", .. })
        ));

        // Zero-length counter definition.
        let mut corrupt = block;
        corrupt[def..def + 4].copy_from_slice(&0u32.to_le_bytes());
        assert!(matches!(
            decode(&corrupt),
            Err(DecodeError::BadLength { what: "PERF_COUNTER_DEFINITION", .. })
        ));
    }

    #[test]
    fn test_huge_counts_fail_without_allocating() {
        let block = sample_block().build();
        let object_start = (PERF_DATA_BLOCK_SIZE + "HOST\0".len() * 2).next_multiple_of(8);

        let mut corrupt = block.clone();
        corrupt[28..32].copy_from_slice(&u32::MAX.to_le_bytes());
        assert!(decode(&corrupt).is_err());

        let mut corrupt = block.clone();
        corrupt[object_start + 32..object_start + 36].copy_from_slice(&u32::MAX.to_le_bytes());
        assert!(decode(&corrupt).is_err());

        let mut corrupt = block;
        corrupt[object_start + 40..object_start + 44].copy_from_slice(&i32::MAX.to_le_bytes());
        assert!(decode(&corrupt).is_err());
    }

    #[test]
    fn test_sample_pairs_base_and_elapsed() {
        let block = PerfDataBuilder::new()
            .object(
                ObjectBuilder::new(236)
                    .perf_time(9_000, 100)
                    .counter(208, PERF_AVERAGE_TIMER)
                    .counter(209, PERF_AVERAGE_BASE)
                    .counter(674, PERF_ELAPSED_TIME)
                    .instance("C:", &[50, 5, 1_000]),
            )
            .build();
        let data = decode(&block).unwrap();
        let object = &data.objects[0];
        let instance = &object.instances[0];
        assert_eq!(object.sample(instance, 0), (50, 5));
        assert_eq!(object.sample(instance, 2), (1_000, 9_000));
    }
}
