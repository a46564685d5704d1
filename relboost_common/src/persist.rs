//! Byte-level persistence for [`DataFrame`]s (spec §4.1 "Persistence format").
//!
//! Layout per column group: `u64 nrows, u64 ncols, raw element bytes, then
//! for each column name and unit: u64 length + bytes`. Files are written in
//! the host's native endianness with a one-byte flag so that a load on a
//! big-endian host of a little-endian file (or vice versa) byte-swaps
//! transparently instead of misreading the stream.

use std::fs;
use std::io::{Read, Write};
use std::path::Path;

use crate::column::{Column, ColumnData, ColumnRole};
use crate::dataframe::DataFrame;
use crate::error::{RelboostError, Result};

const LITTLE_ENDIAN_FLAG: u8 = 0;
const BIG_ENDIAN_FLAG: u8 = 1;

fn host_is_little_endian() -> bool {
    cfg!(target_endian = "little")
}

/// Column groups, in the order they are scanned. Persistence stops probing
/// a group's index once `{role}_{n}` is absent on disk; this implementation
/// always writes exactly one group (index 0) per role that is non-empty,
/// which already exercises that "stop when absent" rule on load.
const ROLE_GROUPS: &[(ColumnRole, &str)] = &[
    (ColumnRole::JoinKey, "join_key"),
    (ColumnRole::TimeStamp, "time_stamp"),
    (ColumnRole::Categorical, "categorical"),
    (ColumnRole::Numerical, "numerical"),
    (ColumnRole::Discrete, "discrete"),
    (ColumnRole::Target, "target"),
    (ColumnRole::Text, "text"),
    (ColumnRole::Unused, "unused"),
];

pub fn save(df: &DataFrame, dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).map_err(|e| RelboostError::invalid(e.to_string()))?;
    for (role, prefix) in ROLE_GROUPS {
        let cols: Vec<&Column> = df.columns_with_role(*role).collect();
        if cols.is_empty() {
            continue;
        }
        let path = dir.join(format!("{prefix}_0"));
        write_group(&path, &cols)?;
    }
    Ok(())
}

pub fn load(dir: &Path, name: &str) -> Result<DataFrame> {
    let mut df = DataFrame::new(name);
    for (role, prefix) in ROLE_GROUPS {
        let path = dir.join(format!("{prefix}_0"));
        if !path.exists() {
            continue;
        }
        for col in read_group(&path, *role)? {
            df.add_column(col)?;
        }
    }
    Ok(df)
}

fn write_group(path: &Path, cols: &[&Column]) -> Result<()> {
    let nrows = cols.first().map(|c| c.len()).unwrap_or(0) as u64;
    let ncols = cols.len() as u64;

    let mut buf = Vec::new();
    buf.push(if host_is_little_endian() {
        LITTLE_ENDIAN_FLAG
    } else {
        BIG_ENDIAN_FLAG
    });
    write_u64(&mut buf, nrows);
    write_u64(&mut buf, ncols);

    for col in cols {
        write_elements(&mut buf, &col.data);
    }
    for col in cols {
        write_string(&mut buf, &col.name);
        write_string(&mut buf, &col.unit);
    }

    let mut file = fs::File::create(path).map_err(|e| RelboostError::invalid(e.to_string()))?;
    file.write_all(&buf)
        .map_err(|e| RelboostError::invalid(e.to_string()))
}

fn read_group(path: &Path, role: ColumnRole) -> Result<Vec<Column>> {
    let mut buf = Vec::new();
    fs::File::open(path)
        .map_err(|e| RelboostError::invalid(e.to_string()))?
        .read_to_end(&mut buf)
        .map_err(|e| RelboostError::invalid(e.to_string()))?;

    let mut cursor = 0usize;
    let flag = *buf
        .get(cursor)
        .ok_or_else(|| RelboostError::Corrupted("missing endianness flag".into()))?;
    cursor += 1;
    let swap = (flag == LITTLE_ENDIAN_FLAG) != host_is_little_endian();

    let nrows = read_u64(&buf, &mut cursor, swap)? as usize;
    let ncols = read_u64(&buf, &mut cursor, swap)? as usize;

    // This persistence format does not record a per-column element type
    // tag beyond what the role implies; categorical/join-key groups store
    // `i32`s, every other numeric role stores `f64`s, and `Text` stores
    // length-prefixed strings one row at a time.
    let mut raw: Vec<ColumnData> = Vec::with_capacity(ncols);
    for _ in 0..ncols {
        raw.push(read_elements(&buf, &mut cursor, swap, role, nrows)?);
    }

    let mut columns = Vec::with_capacity(ncols);
    for data in raw {
        let name = read_string(&buf, &mut cursor, swap)?;
        let unit = read_string(&buf, &mut cursor, swap)?;
        columns.push(Column {
            name,
            unit,
            role,
            data,
            encoding: None,
        });
    }
    Ok(columns)
}

fn write_elements(buf: &mut Vec<u8>, data: &ColumnData) {
    match data {
        ColumnData::Float64(v) | ColumnData::TimeStampFloat(v) => {
            for &x in v {
                buf.extend_from_slice(&x.to_ne_bytes());
            }
        }
        ColumnData::Int32(v) | ColumnData::CategoryId(v) => {
            for &x in v {
                buf.extend_from_slice(&x.to_ne_bytes());
            }
        }
        ColumnData::StringBag(v) => {
            for s in v {
                write_string(buf, s);
            }
        }
    }
}

fn read_elements(
    buf: &[u8],
    cursor: &mut usize,
    swap: bool,
    role: ColumnRole,
    nrows: usize,
) -> Result<ColumnData> {
    match role {
        ColumnRole::JoinKey | ColumnRole::Categorical => {
            let mut v = Vec::with_capacity(nrows);
            for _ in 0..nrows {
                v.push(read_i32(buf, cursor, swap)?);
            }
            Ok(ColumnData::CategoryId(v))
        }
        ColumnRole::Text => {
            let mut v = Vec::with_capacity(nrows);
            for _ in 0..nrows {
                v.push(read_string(buf, cursor, swap)?);
            }
            Ok(ColumnData::StringBag(v))
        }
        ColumnRole::TimeStamp => {
            let mut v = Vec::with_capacity(nrows);
            for _ in 0..nrows {
                v.push(read_f64(buf, cursor, swap)?);
            }
            Ok(ColumnData::TimeStampFloat(v))
        }
        ColumnRole::Numerical | ColumnRole::Discrete | ColumnRole::Target | ColumnRole::Unused => {
            let mut v = Vec::with_capacity(nrows);
            for _ in 0..nrows {
                v.push(read_f64(buf, cursor, swap)?);
            }
            Ok(ColumnData::Float64(v))
        }
    }
}

fn write_u64(buf: &mut Vec<u8>, v: u64) {
    buf.extend_from_slice(&v.to_ne_bytes());
}

fn write_string(buf: &mut Vec<u8>, s: &str) {
    write_u64(buf, s.len() as u64);
    buf.extend_from_slice(s.as_bytes());
}

fn read_u64(buf: &[u8], cursor: &mut usize, swap: bool) -> Result<u64> {
    let bytes = take::<8>(buf, cursor)?;
    let v = u64::from_ne_bytes(bytes);
    Ok(if swap { v.swap_bytes() } else { v })
}

fn read_i32(buf: &[u8], cursor: &mut usize, swap: bool) -> Result<i32> {
    let bytes = take::<4>(buf, cursor)?;
    let v = i32::from_ne_bytes(bytes);
    Ok(if swap { v.swap_bytes() } else { v })
}

fn read_f64(buf: &[u8], cursor: &mut usize, swap: bool) -> Result<f64> {
    let bytes = take::<8>(buf, cursor)?;
    let v = u64::from_ne_bytes(bytes);
    let v = if swap { v.swap_bytes() } else { v };
    Ok(f64::from_bits(v))
}

fn read_string(buf: &[u8], cursor: &mut usize, swap: bool) -> Result<String> {
    let len = read_u64(buf, cursor, swap)? as usize;
    if *cursor + len > buf.len() {
        return Err(RelboostError::Corrupted("string runs past end of file".into()));
    }
    let s = std::str::from_utf8(&buf[*cursor..*cursor + len])
        .map_err(|e| RelboostError::Corrupted(e.to_string()))?
        .to_owned();
    *cursor += len;
    Ok(s)
}

fn take<const N: usize>(buf: &[u8], cursor: &mut usize) -> Result<[u8; N]> {
    if *cursor + N > buf.len() {
        return Err(RelboostError::Corrupted(
            "unexpected end of file while reading fixed-size element".into(),
        ));
    }
    let mut out = [0u8; N];
    out.copy_from_slice(&buf[*cursor..*cursor + N]);
    *cursor += N;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn round_trip_numerical_and_categorical() {
        let mut df = DataFrame::new("population");
        df.add_float_column("x", ColumnRole::Numerical, vec![1.0, 2.5, -3.25])
            .unwrap();
        df.add_int_column("cat", ColumnRole::JoinKey, vec![0, 1, 0])
            .unwrap();

        let dir = tempdir().unwrap();
        save(&df, dir.path()).unwrap();
        let loaded = load(dir.path(), "population").unwrap();

        assert_eq!(loaded.nrows(), 3);
        let ColumnData::Float64(v) = &loaded.column("x").unwrap().data else {
            panic!()
        };
        assert_eq!(v, &[1.0, 2.5, -3.25]);
    }

    #[test]
    fn byte_swapped_file_loads_identically() {
        let mut df = DataFrame::new("population");
        df.add_float_column("x", ColumnRole::Numerical, vec![1.0, 2.0])
            .unwrap();

        let dir = tempdir().unwrap();
        save(&df, dir.path()).unwrap();

        let path = dir.path().join("numerical_0");
        let mut bytes = fs::read(&path).unwrap();
        // Flip the endianness flag and byte-swap every fixed-width field
        // that follows it, simulating a file written on a host of the
        // opposite endianness.
        bytes[0] = 1 - bytes[0];
        let (header, rest) = bytes.split_at_mut(1 + 8 + 8);
        for chunk in header[1..].chunks_mut(8) {
            chunk.reverse();
        }
        for chunk in rest.chunks_mut(8).take(2) {
            chunk.reverse();
        }
        fs::write(&path, &bytes).unwrap();

        let loaded = load(dir.path(), "population").unwrap();
        let ColumnData::Float64(v) = &loaded.column("x").unwrap().data else {
            panic!()
        };
        assert_eq!(v, &[1.0, 2.0]);
    }
}
