//! Measurement file formats.
//!
//! Each parser turns the bytes of one file into [`ParsedCurve`]s, [`import`] stores them as
//! [`Curve`] and [`CurveData`] records.

mod spreadsheet;
mod text;
mod vol;
mod volt;

pub use spreadsheet::SpreadsheetParser;
pub use text::{TextOptions, TextParser, XColumn};
pub use vol::VolParser;
pub use volt::VoltParser;

use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt};
use log::info;

use crate::curve::{Curve, CurveData};
use crate::dataset::Dataset;
use crate::params::{Param, ParamTable};
use crate::store::{ChangeSet, CurveDataId, CurveId, DatasetId, ObjectStore, UserId};
use crate::{Error, Result};

/// One curve read from a file, not yet stored
#[derive(Clone, Debug, PartialEq)]
pub struct ParsedCurve {
    pub name: String,
    pub comment: String,
    pub params: ParamTable,
    pub potential: Vec<f64>,
    pub time: Vec<f64>,
    pub current: Vec<f64>,
    pub current_samples: Option<Vec<f64>>,
}

impl ParsedCurve {
    /// Vectors agree with each other and with the point count slot
    ///
    /// # Errors
    /// Returns [`Error::Parse`] otherwise.
    pub fn check(&self) -> Result<()> {
        let points = self.params.points();
        if self.potential.len() != points
            || self.time.len() != points
            || self.current.len() != points
        {
            return Err(Error::parse(format!(
                "curve {} declares {points} points \
                 but holds {} potentials, {} times and {} currents",
                self.name,
                self.potential.len(),
                self.time.len(),
                self.current.len()
            )));
        }
        if let Some(samples) = &self.current_samples {
            let expected = self.params.samples_per_point().map(|spp| spp * points);
            if expected != Some(samples.len()) {
                return Err(Error::parse(format!(
                    "curve {} holds {} raw samples, expected {expected:?}",
                    self.name,
                    samples.len()
                )));
            }
        }
        Ok(())
    }

    pub fn into_curve(self, id: CurveId, owner: UserId, file_name: &str) -> Curve {
        Curve {
            id,
            owner,
            file_name: file_name.to_owned(),
            name: self.name,
            comment: self.comment,
            date: self.params.acquisition_date(),
            params: self.params,
            potential: self.potential,
            time: self.time,
            current: self.current,
            current_samples: self.current_samples,
        }
    }
}

pub trait Parser {
    /// # Errors
    /// Returns [`Error::Parse`] for malformed input.
    fn parse(&self, bytes: &[u8]) -> Result<Vec<ParsedCurve>>;
}

/// Parser for files with `extension`, compared case-insensitively
///
/// # Errors
/// Returns [`Error::Parse`] for unknown extensions.
pub fn parser_for(extension: &str) -> Result<Box<dyn Parser>> {
    match extension.trim_start_matches('.').to_ascii_lowercase().as_str() {
        "vol" => Ok(Box::new(VolParser)),
        "volt" => Ok(Box::new(VoltParser::plain())),
        "voltc" => Ok(Box::new(VoltParser::compressed())),
        "csv" => Ok(Box::new(TextParser::new(TextOptions::default()))),
        "txt" => Ok(Box::new(TextParser::new(TextOptions {
            delimiter: b'\t',
            ..TextOptions::default()
        }))),
        "xls" | "xlsx" | "xlsm" | "ods" => {
            Ok(Box::new(SpreadsheetParser::new(TextOptions::default())))
        }
        other => Err(Error::parse(format!("unsupported file type '{other}'"))),
    }
}

/// Parse `bytes` and queue a [`Curve`] and its first [`CurveData`] per curve in `changes`
///
/// # Errors
/// Propagates parse errors, nothing is queued in that case.
pub fn import(
    store: &dyn ObjectStore,
    bytes: &[u8],
    extension: &str,
    owner: UserId,
    file_name: &str,
    changes: &mut ChangeSet,
) -> Result<Vec<CurveDataId>> {
    let parsed = parser_for(extension)?.parse(bytes)?;
    for curve in &parsed {
        curve.check()?;
    }
    let mut ids = Vec::with_capacity(parsed.len());
    for curve in parsed {
        let curve = curve.into_curve(CurveId(store.next_id()), owner, file_name);
        let data = CurveData::from_curve(CurveDataId(store.next_id()), &curve);
        ids.push(data.id);
        changes.put_curve(curve);
        changes.put_curve_data(data);
    }
    info!("imported {} curves from {file_name}", ids.len());
    Ok(ids)
}

/// [`import`] followed by a dataset named after the file holding every imported curve
///
/// # Errors
/// As [`import`].
pub fn import_dataset(
    store: &dyn ObjectStore,
    bytes: &[u8],
    extension: &str,
    owner: UserId,
    file_name: &str,
    changes: &mut ChangeSet,
) -> Result<DatasetId> {
    let ids = import(store, bytes, extension, owner, file_name, changes)?;
    let mut dataset = Dataset::new(DatasetId(store.next_id()), owner, file_name);
    dataset.set_members(ids)?;
    let id = dataset.id;
    changes.put_dataset(dataset);
    Ok(id)
}

/// Potential and time vectors of a staircase scan described by `params`
fn staircase(params: &ParamTable) -> (Vec<f64>, Vec<f64>) {
    let points = params.points();
    (
        (0..points).map(|i| params.potential_at(i)).collect(),
        (0..points).map(|i| params.time_at(i)).collect(),
    )
}

fn decode_name(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
    let (text, _) = encoding_rs::WINDOWS_1250.decode_without_bom_handling(&bytes[..end]);
    text.trim().to_owned()
}

fn point_count(params: &ParamTable, name: &str) -> Result<usize> {
    let points = params[Param::Ptnr];
    if points <= 0 {
        return Err(Error::parse(format!("curve {name} has {points} points")));
    }
    Ok(params.points())
}

/// Little endian reader reporting truncation as a parse error
struct Reader<'a> {
    cursor: Cursor<&'a [u8]>,
}

fn truncated(e: &std::io::Error) -> Error {
    Error::parse(format!("file is truncated: {e}"))
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self {
            cursor: Cursor::new(bytes),
        }
    }

    fn position(&self) -> usize {
        usize::try_from(self.cursor.position()).unwrap_or(usize::MAX)
    }

    fn remaining(&self) -> usize {
        self.cursor.get_ref().len().saturating_sub(self.position())
    }

    fn u16(&mut self) -> Result<u16> {
        self.cursor.read_u16::<LittleEndian>().map_err(|e| truncated(&e))
    }

    fn u32(&mut self) -> Result<u32> {
        self.cursor.read_u32::<LittleEndian>().map_err(|e| truncated(&e))
    }

    fn i32(&mut self) -> Result<i32> {
        self.cursor.read_i32::<LittleEndian>().map_err(|e| truncated(&e))
    }

    fn f64(&mut self) -> Result<f64> {
        self.cursor.read_f64::<LittleEndian>().map_err(|e| truncated(&e))
    }

    /// `count` doubles, checking the length before allocating
    fn f64s(&mut self, count: usize) -> Result<Vec<f64>> {
        if count.checked_mul(8).map_or(true, |bytes| bytes > self.remaining()) {
            return Err(Error::parse(format!(
                "file is truncated: {count} values expected, {} bytes left",
                self.remaining()
            )));
        }
        (0..count).map(|_| self.f64()).collect()
    }

    fn bytes(&mut self, count: usize) -> Result<&'a [u8]> {
        let data: &'a [u8] = self.cursor.get_ref();
        let start = self.position();
        let end = start
            .checked_add(count)
            .filter(|end| *end <= data.len())
            .ok_or_else(|| Error::parse(format!("file is truncated: {count} bytes expected")))?;
        self.cursor.set_position(end as u64);
        Ok(&data[start..end])
    }

    /// Bytes up to the next NUL, which is consumed
    fn nul_terminated(&mut self) -> Result<&'a [u8]> {
        let start = self.position();
        let data: &'a [u8] = self.cursor.get_ref();
        let length = data
            .get(start..)
            .and_then(|rest| rest.iter().position(|b| *b == 0))
            .ok_or_else(|| Error::parse("unterminated name"))?;
        let name = self.bytes(length)?;
        self.bytes(1)?;
        Ok(name)
    }
}

#[cfg(test)]
mod tests {
    use super::{decode_name, parser_for, Reader};
    use crate::Error;

    #[test]
    fn names_are_windows_1250() {
        // "Cd+Pb ž" with a trailing NUL pad
        let bytes = [b'C', b'd', b'+', b'P', b'b', b' ', 0x9e, 0, 0, 0];
        assert_eq!(decode_name(&bytes), "Cd+Pb ž");
    }

    #[test]
    fn extensions_select_the_parser() {
        for extension in ["vol", "VOLT", ".voltc", "csv", "txt", "xlsx", "ods"] {
            assert!(parser_for(extension).is_ok(), "{extension}");
        }
        assert!(matches!(parser_for("pdf"), Err(Error::Parse(_))));
    }

    #[test]
    fn short_reads_are_parse_errors() {
        let mut reader = Reader::new(&[1, 0, 2]);
        assert_eq!(reader.u16().unwrap(), 1);
        assert!(matches!(reader.u16(), Err(Error::Parse(_))));
        assert!(matches!(Reader::new(&[0; 15]).f64s(2), Err(Error::Parse(_))));
    }
}
