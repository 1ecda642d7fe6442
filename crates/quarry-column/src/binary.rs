//! Little-endian primitives shared by the column binary formats

use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use quarry_common::{Error, LocalId, Result, MAX_COUNT};

/// Write a length or count as u32
pub fn write_len(w: &mut dyn Write, len: usize) -> Result<()> {
    let len = u32::try_from(len)
        .map_err(|_| Error::Serialization(format!("length {} does not fit in u32", len)))?;
    w.write_u32::<LittleEndian>(len)?;
    Ok(())
}

/// Read a u32 length, rejecting anything above `limit`
pub fn read_len(r: &mut dyn Read, limit: usize, what: &str) -> Result<usize> {
    let len = r.read_u32::<LittleEndian>()? as usize;
    if len > limit {
        return Err(Error::corrupt(format!("{} {} exceeds limit {}", what, len, limit)));
    }
    Ok(len)
}

/// Read an item count, which can never exceed [`MAX_COUNT`]
pub fn read_count(r: &mut dyn Read) -> Result<usize> {
    read_len(r, MAX_COUNT, "item count")
}

pub fn write_lids(w: &mut dyn Write, lids: &[LocalId]) -> Result<()> {
    write_len(w, lids.len())?;
    for &lid in lids {
        w.write_u16::<LittleEndian>(lid)?;
    }
    Ok(())
}

pub fn read_lids(r: &mut dyn Read) -> Result<Vec<LocalId>> {
    let len = read_count(r)?;
    let mut lids = Vec::with_capacity(len);
    for _ in 0..len {
        lids.push(r.read_u16::<LittleEndian>()?);
    }
    Ok(lids)
}
