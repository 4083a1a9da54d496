//! Reading and writing of npy records.
//!
//! A record is the magic string, a version, a little endian header length and
//! a python dict literal describing dtype, memory order and shape, followed by
//! the raw data. Records can be concatenated: the image database stores the
//! mean and the labels back to back in one file, and `read_array` consumes
//! exactly one record from the stream, leaving the reader at the next one.
//!
//! ```python
//! with open("img.db", "wb") as f:
//!     np.save(f, mean)
//!     np.save(f, y)
//! np.save(open("img.db.x", "wb"), images)
//! ```
use std::{
    collections::HashMap,
    io::{self, Read, Write},
};

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::{dataset::Array, Error, Result};

const NPY_MAGIC_STRING: &[u8] = b"\x93NUMPY";

/// Magic, version and the two byte header length of a version 1 record.
const NPY_PREAMBLE_V1: usize = 10;

/// Upper bound on the elements of a single record, guards allocations
/// against corrupt headers.
pub const MAX_ELEMENTS: usize = 1 << 30;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Descr {
    F4,
    F8,
    U1,
    I1,
    U2,
    I2,
    U4,
    I4,
    I8,
    B1,
}

impl Descr {
    fn size(self) -> usize {
        match self {
            Self::U1 | Self::I1 | Self::B1 => 1,
            Self::U2 | Self::I2 => 2,
            Self::F4 | Self::U4 | Self::I4 => 4,
            Self::F8 | Self::I8 => 8,
        }
    }
}

fn read_header<R: Read>(reader: &mut R) -> Result<String> {
    let mut magic_string = [0u8; 6];
    reader.read_exact(&mut magic_string)?;
    if magic_string != NPY_MAGIC_STRING {
        return Err(Error::Npy("magic string mismatch".to_string()));
    }

    let mut version = [0u8; 2];
    reader.read_exact(&mut version)?;

    let header_len = match version[0] {
        1 => usize::from(reader.read_u16::<LittleEndian>()?),
        2 | 3 => reader.read_u32::<LittleEndian>()? as usize,
        otherwise => return Err(Error::Npy(format!("unsupported version {otherwise}"))),
    };

    let mut header = vec![0u8; header_len];
    reader.read_exact(&mut header)?;

    String::from_utf8(header).map_err(|_| Error::Npy("header is not valid utf-8".to_string()))
}

#[derive(Debug, PartialEq)]
struct Header {
    descr: Descr,
    fortran_order: bool,
    shape: Vec<usize>,
}

impl Header {
    fn to_header_string(&self) -> String {
        let fortran_order = if self.fortran_order { "True" } else { "False" };
        let mut shape = self.shape.iter().map(usize::to_string).collect::<Vec<_>>().join(", ");

        if self.shape.len() == 1 {
            shape.push(',');
        }

        let descr = match self.descr {
            Descr::F4 => "<f4",
            Descr::F8 => "<f8",
            Descr::U1 => "|u1",
            Descr::I1 => "|i1",
            Descr::U2 => "<u2",
            Descr::I2 => "<i2",
            Descr::U4 => "<u4",
            Descr::I4 => "<i4",
            Descr::I8 => "<i8",
            Descr::B1 => "|b1",
        };

        format!("{{'descr': '{descr}', 'fortran_order': {fortran_order}, 'shape': ({shape}), }}")
    }

    // Typical header:
    // {'descr': '<f4', 'fortran_order': False, 'shape': (128, 32, 32), }
    fn parse(header: &str) -> Result<Header> {
        let header = header.trim_matches(|c: char| c == '{' || c == '}' || c == ',' || c.is_whitespace());

        let mut parts = Vec::new();
        let mut start_index = 0;
        let mut depth = 0i32;

        for (index, c) in header.char_indices() {
            match c {
                '(' => depth += 1,
                ')' => depth -= 1,
                ',' if depth == 0 => {
                    parts.push(&header[start_index..index]);
                    start_index = index + 1;
                }
                _ => {}
            }
        }
        parts.push(&header[start_index..]);

        let mut part_map = HashMap::new();
        for part in parts.iter().map(|part| part.trim()).filter(|part| !part.is_empty()) {
            match part.split_once(':') {
                Some((key, value)) => {
                    let key = key.trim_matches(|c: char| c == '\'' || c.is_whitespace());
                    let value = value.trim_matches(|c: char| c == '\'' || c.is_whitespace());
                    part_map.insert(key, value);
                }
                None => return Err(Error::Npy(format!("unable to parse header {header}"))),
            }
        }

        let fortran_order = match part_map.get("fortran_order") {
            None | Some(&"False") => false,
            Some(&"True") => true,
            Some(other) => return Err(Error::Npy(format!("unknown fortran_order {other}"))),
        };

        let descr = match part_map.get("descr") {
            None => return Err(Error::Npy("no descr in header".to_string())),
            Some(descr) => match descr.trim_start_matches(['<', '=', '|']) {
                "f" | "f4" => Descr::F4,
                "d" | "f8" => Descr::F8,
                "B" | "u1" => Descr::U1,
                "b" | "i1" => Descr::I1,
                "H" | "u2" => Descr::U2,
                "h" | "i2" => Descr::I2,
                "I" | "u4" => Descr::U4,
                "i" | "i4" => Descr::I4,
                "q" | "i8" => Descr::I8,
                "?" | "b1" => Descr::B1,
                other => match other.strip_prefix('>') {
                    Some("u1") => Descr::U1,
                    Some("i1") => Descr::I1,
                    Some("b1") => Descr::B1,
                    Some(_) => return Err(Error::Npy(format!("big-endian descr {other}"))),
                    None => return Err(Error::Npy(format!("unrecognised descr {other}"))),
                },
            },
        };

        let shape = match part_map.get("shape") {
            None => return Err(Error::Npy("no shape in header".to_string())),
            Some(shape) => {
                let shape = shape.trim_matches(|c: char| c == '(' || c == ')' || c.is_whitespace());
                shape
                    .split(',')
                    .map(str::trim)
                    .filter(|dim| !dim.is_empty())
                    .map(|dim| dim.parse::<usize>().map_err(|_| Error::Npy(format!("invalid dimension {dim}"))))
                    .collect::<Result<Vec<_>>>()?
            }
        };

        Ok(Header { descr, fortran_order, shape })
    }
}

/// Reads a single npy record, widening its elements to `f32`.
pub fn read_array<R: Read>(reader: &mut R) -> Result<Array> {
    let header = Header::parse(&read_header(reader)?)?;

    if header.fortran_order {
        return Err(Error::Npy("fortran order not supported".to_string()));
    }

    let elem_count = header
        .shape
        .iter()
        .try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
        .filter(|&count| count <= MAX_ELEMENTS)
        .ok_or_else(|| Error::Npy(format!("shape {:?} is too large", header.shape)))?;

    let data = read_data(reader, header.descr, elem_count)?;

    Array::new(header.shape, data)
}

fn read_data<R: Read>(reader: &mut R, descr: Descr, elem_count: usize) -> Result<Vec<f32>> {
    // grows with the bytes actually present instead of trusting the header
    let byte_count = elem_count * descr.size();
    let mut bytes = Vec::new();
    reader.by_ref().take(byte_count as u64).read_to_end(&mut bytes)?;

    if bytes.len() != byte_count {
        return Err(Error::Io(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("npy data holds {} of {byte_count} bytes", bytes.len()),
        )));
    }

    let data = match descr {
        Descr::F4 => {
            let mut buf = vec![0f32; elem_count];
            LittleEndian::read_f32_into(&bytes, &mut buf);
            buf
        }
        Descr::F8 => {
            let mut buf = vec![0f64; elem_count];
            LittleEndian::read_f64_into(&bytes, &mut buf);
            buf.into_iter().map(|x| x as f32).collect()
        }
        Descr::U1 => bytes.into_iter().map(f32::from).collect(),
        Descr::B1 => bytes.into_iter().map(|x| f32::from(u8::from(x != 0))).collect(),
        Descr::I1 => bytes.into_iter().map(|x| f32::from(x as i8)).collect(),
        Descr::U2 => {
            let mut buf = vec![0u16; elem_count];
            LittleEndian::read_u16_into(&bytes, &mut buf);
            buf.into_iter().map(f32::from).collect()
        }
        Descr::I2 => {
            let mut buf = vec![0i16; elem_count];
            LittleEndian::read_i16_into(&bytes, &mut buf);
            buf.into_iter().map(f32::from).collect()
        }
        Descr::U4 => {
            let mut buf = vec![0u32; elem_count];
            LittleEndian::read_u32_into(&bytes, &mut buf);
            buf.into_iter().map(|x| x as f32).collect()
        }
        Descr::I4 => {
            let mut buf = vec![0i32; elem_count];
            LittleEndian::read_i32_into(&bytes, &mut buf);
            buf.into_iter().map(|x| x as f32).collect()
        }
        Descr::I8 => {
            let mut buf = vec![0i64; elem_count];
            LittleEndian::read_i64_into(&bytes, &mut buf);
            buf.into_iter().map(|x| x as f32).collect()
        }
    };

    Ok(data)
}

/// Writes `array` as a version 1 `<f4` record.
pub fn write_array<W: Write>(writer: &mut W, array: &Array) -> Result<()> {
    let header = Header { descr: Descr::F4, fortran_order: false, shape: array.shape().to_vec() };
    let mut header = header.to_header_string();

    // data starts on a 64 byte boundary, header ends with a newline
    let unpadded = NPY_PREAMBLE_V1 + header.len() + 1;
    header.extend(std::iter::repeat(' ').take((64 - unpadded % 64) % 64));
    header.push('\n');

    let header_len =
        u16::try_from(header.len()).map_err(|_| Error::Npy(format!("header too long: {} bytes", header.len())))?;

    writer.write_all(NPY_MAGIC_STRING)?;
    writer.write_all(&[1, 0])?;
    writer.write_u16::<LittleEndian>(header_len)?;
    writer.write_all(header.as_bytes())?;

    for &x in array.data() {
        writer.write_f32::<LittleEndian>(x)?;
    }

    Ok(())
}
