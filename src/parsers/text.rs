//! Delimited text exports, one x column and one current column per curve.

use csv::{ReaderBuilder, Trim};
use log::debug;

use super::{ParsedCurve, Parser};
use crate::params::{Param, ParamTable};
use crate::{Error, Result};

/// Quantity held by the x column
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum XColumn {
    Potential,
    Time,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TextOptions {
    pub delimiter: u8,
    /// Lines dropped before the header or the first row of values
    pub skip_rows: usize,
    pub x_column: usize,
    pub x_kind: XColumn,
    /// Applied to every current value, converts the file's unit to the stored one
    pub current_multiplier: f64,
    pub has_header: bool,
}

impl Default for TextOptions {
    fn default() -> Self {
        Self {
            delimiter: b',',
            skip_rows: 0,
            x_column: 0,
            x_kind: XColumn::Potential,
            current_multiplier: 1.0,
            has_header: false,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct TextParser {
    options: TextOptions,
}

impl TextParser {
    pub const fn new(options: TextOptions) -> Self {
        Self { options }
    }
}

fn number(field: &str, row: usize, column: usize) -> Result<f64> {
    field.parse().map_err(|_| {
        Error::parse(format!(
            "row {row}, column {column}: '{field}' is not a number"
        ))
    })
}

impl Parser for TextParser {
    fn parse(&self, bytes: &[u8]) -> Result<Vec<ParsedCurve>> {
        let mut reader = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .trim(Trim::All)
            .delimiter(self.options.delimiter)
            .from_reader(bytes);

        let mut header = None;
        let mut rows = vec![];
        for (line, record) in reader
            .records()
            .enumerate()
            .skip(self.options.skip_rows)
        {
            let record = record?;
            if record.iter().all(str::is_empty) {
                continue;
            }
            if self.options.has_header && header.is_none() {
                header = Some(record.iter().map(str::to_owned).collect());
                continue;
            }
            let row = record
                .iter()
                .enumerate()
                .map(|(column, field)| number(field, line + 1, column + 1))
                .collect::<Result<Vec<_>>>()?;
            rows.push(row);
        }
        debug!("{} text rows read", rows.len());
        columns_to_curves(header, &rows, &self.options)
    }
}

/// Split `rows` into one curve per column other than the x column
///
/// # Errors
/// Returns [`Error::Parse`] if there are no values, the rows are ragged or the x column is missing.
pub(super) fn columns_to_curves(
    header: Option<Vec<String>>,
    rows: &[Vec<f64>],
    options: &TextOptions,
) -> Result<Vec<ParsedCurve>> {
    let width = rows
        .first()
        .map(Vec::len)
        .ok_or_else(|| Error::parse("the file holds no values"))?;
    if let Some(row) = rows.iter().position(|r| r.len() != width) {
        return Err(Error::parse(format!(
            "value row {} has {} columns, the first has {width}",
            row + 1,
            rows[row].len()
        )));
    }
    if options.x_column >= width {
        return Err(Error::parse(format!(
            "x column {} requested but rows have {width} columns",
            options.x_column + 1
        )));
    }
    if width < 2 {
        return Err(Error::parse("no current column next to the x column"));
    }
    let points = i32::try_from(rows.len())
        .map_err(|_| Error::parse(format!("{} rows do not fit a curve", rows.len())))?;

    let x: Vec<f64> = rows.iter().map(|r| r[options.x_column]).collect();
    #[allow(clippy::cast_precision_loss)]
    let index: Vec<f64> = (0..rows.len()).map(|i| i as f64).collect();
    let (potential, time) = match options.x_kind {
        XColumn::Potential => (x, index),
        XColumn::Time => (index, x),
    };

    let mut params = ParamTable::default();
    params[Param::Ptnr] = points;
    Ok((0..width)
        .filter(|&column| column != options.x_column)
        .map(|column| {
            let name = header
                .as_ref()
                .and_then(|h| h.get(column))
                .filter(|n| !n.is_empty())
                .cloned()
                .unwrap_or_else(|| format!("column {}", column + 1));
            ParsedCurve {
                name,
                comment: String::new(),
                params: params.clone(),
                potential: potential.clone(),
                time: time.clone(),
                current: rows
                    .iter()
                    .map(|r| r[column] * options.current_multiplier)
                    .collect(),
                current_samples: None,
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::{TextOptions, TextParser, XColumn};
    use crate::parsers::Parser;
    use crate::Error;

    #[test]
    fn every_other_column_is_a_curve() {
        let csv = b"-100, 1.0, 10.0\n-95, 2.0, 20.0\n-90, 3.0, 30.0\n";
        let curves = TextParser::new(TextOptions::default()).parse(csv).unwrap();

        assert_eq!(curves.len(), 2);
        assert_eq!(curves[0].name, "column 2");
        assert_eq!(curves[1].current, vec![10.0, 20.0, 30.0]);
        assert_eq!(curves[1].potential, vec![-100.0, -95.0, -90.0]);
        assert_eq!(curves[1].time, vec![0.0, 1.0, 2.0]);
        assert_eq!(curves[0].params.points(), 3);
        curves[0].check().unwrap();
    }

    #[test]
    fn options_control_the_layout() {
        let txt = b"exported by analyzer\nblank\tt\tPb\n1.0\t0\t2\n3.0\t10\t4\n";
        let options = TextOptions {
            delimiter: b'\t',
            skip_rows: 1,
            x_column: 1,
            x_kind: XColumn::Time,
            current_multiplier: 1000.0,
            has_header: true,
        };
        let curves = TextParser::new(options).parse(txt).unwrap();

        assert_eq!(curves.len(), 2);
        assert_eq!(curves[0].name, "blank");
        assert_eq!(curves[1].name, "Pb");
        assert_eq!(curves[1].time, vec![0.0, 10.0]);
        assert_eq!(curves[1].potential, vec![0.0, 1.0]);
        assert_eq!(curves[1].current, vec![2000.0, 4000.0]);
    }

    #[test]
    fn malformed_tables_are_parse_errors() {
        let parser = TextParser::new(TextOptions::default());
        for input in [&b""[..], b"1,2\n3,x\n", b"1,2\n3\n", b"1\n2\n"] {
            assert!(
                matches!(parser.parse(input), Err(Error::Parse(_))),
                "{}",
                String::from_utf8_lossy(input)
            );
        }
    }
}
