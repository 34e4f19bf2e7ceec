//! Spreadsheets, read from the first sheet with the layout of delimited text.

use std::io::Cursor;

use calamine::{open_workbook_auto_from_rs, Data, Reader};
use log::debug;

use super::text::{columns_to_curves, TextOptions};
use super::{ParsedCurve, Parser};
use crate::{Error, Result};

/// Reads xls, xlsx, xlsm and ods workbooks; the delimiter of the options is unused
#[derive(Clone, Debug, Default)]
pub struct SpreadsheetParser {
    options: TextOptions,
}

impl SpreadsheetParser {
    pub const fn new(options: TextOptions) -> Self {
        Self { options }
    }
}

fn cell_value(cell: &Data, row: usize, column: usize) -> Result<f64> {
    match cell {
        Data::Float(value) => Ok(*value),
        #[allow(clippy::cast_precision_loss)]
        Data::Int(value) => Ok(*value as f64),
        Data::String(text) => text.trim().parse().map_err(|_| {
            Error::parse(format!(
                "row {row}, column {column}: '{text}' is not a number"
            ))
        }),
        other => Err(Error::parse(format!(
            "row {row}, column {column}: unexpected cell {other:?}"
        ))),
    }
}

impl Parser for SpreadsheetParser {
    fn parse(&self, bytes: &[u8]) -> Result<Vec<ParsedCurve>> {
        let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes))?;
        let range = workbook
            .worksheet_range_at(0)
            .ok_or_else(|| Error::parse("the workbook has no sheets"))??;

        let mut header = None;
        let mut rows = vec![];
        for (line, cells) in range.rows().enumerate().skip(self.options.skip_rows) {
            if cells.iter().all(|c| matches!(c, Data::Empty)) {
                continue;
            }
            if self.options.has_header && header.is_none() {
                header = Some(cells.iter().map(ToString::to_string).collect());
                continue;
            }
            rows.push(
                cells
                    .iter()
                    .enumerate()
                    .map(|(column, cell)| cell_value(cell, line + 1, column + 1))
                    .collect::<Result<Vec<_>>>()?,
            );
        }
        debug!("{} spreadsheet rows read", rows.len());
        columns_to_curves(header, &rows, &self.options)
    }
}
