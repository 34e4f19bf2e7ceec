//! `.volt` files and their zlib compressed `.voltc` variant.
//!
//! ```text
//! u16                         format version
//! u16                         curve count
//! per curve:
//!   u32                       block size, bytes following this field
//!   name                      NUL terminated
//!   u16 + bytes               comment length and text
//!   64 x i32                  parameter table
//!   ptnr x (f64, f64, f64)    time, potential and current of each point
//!   if nonaveragedsampling:
//!     u32                     raw sample count, ptnr x samples per point
//!     count x f64             raw samples
//! ```

use std::io::Read;

use flate2::read::ZlibDecoder;
use log::debug;

use super::{decode_name, point_count, ParsedCurve, Parser, Reader};
use crate::params::{Param, ParamTable, PARAM_COUNT};
use crate::{Error, Result};

#[derive(Clone, Copy, Debug)]
pub struct VoltParser {
    compressed: bool,
}

impl VoltParser {
    pub const fn plain() -> Self {
        Self { compressed: false }
    }

    pub const fn compressed() -> Self {
        Self { compressed: true }
    }
}

fn parse_curve(reader: &mut Reader<'_>) -> Result<ParsedCurve> {
    let block = usize::try_from(reader.u32()?).unwrap_or(usize::MAX);
    let start = reader.position();
    let name = decode_name(reader.nul_terminated()?);
    let comment_length = usize::from(reader.u16()?);
    let comment = decode_name(reader.bytes(comment_length)?);

    let values = (0..PARAM_COUNT)
        .map(|_| reader.i32())
        .collect::<Result<Vec<_>>>()?;
    let params = ParamTable::from_dense(&values)
        .ok_or_else(|| Error::parse("incomplete parameter table"))?;
    let points = point_count(&params, &name)?;

    let triples = reader.f64s(points.saturating_mul(3))?;
    let (mut time, mut potential, mut current) = (
        Vec::with_capacity(points),
        Vec::with_capacity(points),
        Vec::with_capacity(points),
    );
    for point in triples.chunks_exact(3) {
        time.push(point[0]);
        potential.push(point[1]);
        current.push(point[2]);
    }

    let current_samples = if params[Param::NonAveragedSampling] == 0 {
        None
    } else {
        let count = usize::try_from(reader.u32()?).unwrap_or(usize::MAX);
        let per_point = params.samples_per_point().ok_or_else(|| {
            Error::parse(format!("curve {name} stores raw samples without a sample count"))
        })?;
        if count != points.saturating_mul(per_point) {
            return Err(Error::parse(format!(
                "curve {name} stores {count} raw samples for {points} points of {per_point}"
            )));
        }
        Some(reader.f64s(count)?)
    };

    if reader.position() - start != block {
        return Err(Error::parse(format!(
            "curve {name} declares a {block} byte block but holds {} bytes",
            reader.position() - start
        )));
    }
    Ok(ParsedCurve {
        name,
        comment,
        params,
        potential,
        time,
        current,
        current_samples,
    })
}

fn parse_plain(bytes: &[u8]) -> Result<Vec<ParsedCurve>> {
    let mut reader = Reader::new(bytes);
    let version = reader.u16()?;
    let count = reader.u16()?;
    if count == 0 {
        return Err(Error::parse("the file holds no curves"));
    }
    debug!("volt version {version} with {count} curves");
    let curves = (0..count)
        .map(|_| parse_curve(&mut reader))
        .collect::<Result<Vec<_>>>()?;
    if reader.remaining() != 0 {
        return Err(Error::parse(format!(
            "{} unexpected bytes after the last curve",
            reader.remaining()
        )));
    }
    Ok(curves)
}

impl Parser for VoltParser {
    fn parse(&self, bytes: &[u8]) -> Result<Vec<ParsedCurve>> {
        if !self.compressed {
            return parse_plain(bytes);
        }
        let mut decoder = ZlibDecoder::new(bytes);
        let mut inflated = vec![];
        decoder
            .read_to_end(&mut inflated)
            .map_err(|e| Error::parse(format!("cannot decompress: {e}")))?;
        parse_plain(&inflated)
    }
}
