//! Legacy `.vol` files.
//!
//! ```text
//! u16                 curve count, 1..=50
//! 50 x [u8; 10]       curve names, NUL padded
//! per curve:
//!   u16               block size, bytes following this field
//!   u16               number K of stored parameters
//!   K x (u16, i32)    parameter slot and value, other slots are zero
//!   ptnr x f64        current
//! ```
//!
//! Potentials and times are not stored, they follow from `Ep`, `Estep`, `tp` and `tw`.

use super::{decode_name, point_count, staircase, ParsedCurve, Parser, Reader};
use crate::params::{ParamTable, PARAM_COUNT};
use crate::{Error, Result};

pub const MAX_CURVES: usize = 50;
const NAME_LENGTH: usize = 10;

#[derive(Clone, Copy, Debug, Default)]
pub struct VolParser;

impl Parser for VolParser {
    fn parse(&self, bytes: &[u8]) -> Result<Vec<ParsedCurve>> {
        let mut reader = Reader::new(bytes);
        let count = usize::from(reader.u16()?);
        if count == 0 || count > MAX_CURVES {
            return Err(Error::parse(format!(
                "{count} curves declared, between 1 and {MAX_CURVES} expected"
            )));
        }
        let names: Vec<String> = (0..MAX_CURVES)
            .map(|_| reader.bytes(NAME_LENGTH).map(decode_name))
            .collect::<Result<_>>()?;

        names
            .into_iter()
            .take(count)
            .map(|name| {
                let block = usize::from(reader.u16()?);
                let start = reader.position();
                let stored = usize::from(reader.u16()?);
                let mut params = ParamTable::default();
                for _ in 0..stored {
                    let slot = usize::from(reader.u16()?);
                    let value = reader.i32()?;
                    if slot >= PARAM_COUNT || !params.set_raw(slot, value) {
                        return Err(Error::parse(format!(
                            "curve {name} sets parameter slot {slot}"
                        )));
                    }
                }
                let points = point_count(&params, &name)?;
                let current = reader.f64s(points)?;
                if reader.position() - start != block {
                    return Err(Error::parse(format!(
                        "curve {name} declares a {block} byte block but holds {} bytes",
                        reader.position() - start
                    )));
                }
                let (potential, time) = staircase(&params);
                Ok(ParsedCurve {
                    name,
                    comment: String::new(),
                    params,
                    potential,
                    time,
                    current,
                    current_samples: None,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use byteorder::{LittleEndian, WriteBytesExt};

    use super::{VolParser, MAX_CURVES, NAME_LENGTH};
    use crate::params::Param;
    use crate::parsers::Parser;
    use crate::Error;

    fn encode(curves: &[(&str, Vec<(Param, i32)>, Vec<f64>)]) -> Vec<u8> {
        let mut out = vec![];
        out.write_u16::<LittleEndian>(u16::try_from(curves.len()).unwrap()).unwrap();
        for i in 0..MAX_CURVES {
            let mut name = [0u8; NAME_LENGTH];
            if let Some((n, _, _)) = curves.get(i) {
                name[..n.len()].copy_from_slice(n.as_bytes());
            }
            out.extend_from_slice(&name);
        }
        for (_, params, current) in curves {
            let block = 2 + 6 * params.len() + 8 * current.len();
            out.write_u16::<LittleEndian>(u16::try_from(block).unwrap()).unwrap();
            out.write_u16::<LittleEndian>(u16::try_from(params.len()).unwrap()).unwrap();
            for (param, value) in params {
                out.write_u16::<LittleEndian>(u16::try_from(param.index()).unwrap()).unwrap();
                out.write_i32::<LittleEndian>(*value).unwrap();
            }
            for value in current {
                out.write_f64::<LittleEndian>(*value).unwrap();
            }
        }
        out
    }

    fn params(points: i32) -> Vec<(Param, i32)> {
        vec![
            (Param::Ptnr, points),
            (Param::Ep, -500),
            (Param::Estep, 5),
            (Param::Tp, 10),
            (Param::Tw, 10),
        ]
    }

    #[test]
    fn curves_are_reconstructed_from_sparse_parameters() {
        let bytes = encode(&[
            ("Pb 1", params(4), vec![1.0, 2.0, 3.0, 4.0]),
            ("Pb 2", params(3), vec![5.0, 6.0, 7.0]),
        ]);
        let curves = VolParser.parse(&bytes).unwrap();

        assert_eq!(curves.len(), 2);
        assert_eq!(curves[0].name, "Pb 1");
        assert_eq!(curves[0].potential, vec![-500.0, -495.0, -490.0, -485.0]);
        assert_eq!(curves[0].time, vec![0.0, 20.0, 40.0, 60.0]);
        assert_eq!(curves[1].current, vec![5.0, 6.0, 7.0]);
        curves[1].check().unwrap();
    }

    #[test]
    fn truncated_files_are_rejected() {
        let bytes = encode(&[("Pb", params(4), vec![1.0, 2.0, 3.0, 4.0])]);
        assert!(matches!(
            VolParser.parse(&bytes[..bytes.len() - 4]),
            Err(Error::Parse(_))
        ));
    }

    #[test]
    fn curve_count_is_bounded() {
        let mut bytes = encode(&[("Pb", params(1), vec![1.0])]);
        bytes[0] = 51;
        assert!(matches!(VolParser.parse(&bytes), Err(Error::Parse(_))));
        bytes[0] = 0;
        assert!(matches!(VolParser.parse(&bytes), Err(Error::Parse(_))));
    }

    #[test]
    fn unknown_parameter_slots_are_rejected() {
        let mut params = params(1);
        params.push((Param::Ptnr, 1));
        let mut bytes = encode(&[("Pb", params, vec![1.0])]);
        // the duplicated slot becomes slot 64
        let offset = 2 + MAX_CURVES * NAME_LENGTH + 4 + 5 * 6;
        bytes[offset] = 64;
        assert!(matches!(VolParser.parse(&bytes), Err(Error::Parse(_))));
    }
}
