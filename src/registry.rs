//! Static manifest of the available methods.

use crate::method::{Method, MethodKind};
use crate::methods::analysis::{
    AsdStandardAddition, GaStandardAddition, RegularStandardAddition, TimeConstant,
};
use crate::methods::processing::{
    AutomaticBackgroundCorrection, CurveAveraging, FftLowPass, PolynomialBackground,
    SamplingWindow, SavitzkyGolay,
};
use crate::{Error, Result};

type Constructor = fn() -> Box<dyn Method>;

fn boxed<M: Method + Default + 'static>() -> Box<dyn Method> {
    Box::new(M::default())
}

const MANIFEST: &[(&str, Constructor)] = &[
    ("fft_low_pass", boxed::<FftLowPass>),
    ("savitzky_golay", boxed::<SavitzkyGolay>),
    (
        "automatic_background_correction",
        boxed::<AutomaticBackgroundCorrection>,
    ),
    ("polynomial_background", boxed::<PolynomialBackground>),
    ("curve_averaging", boxed::<CurveAveraging>),
    ("sampling_window", boxed::<SamplingWindow>),
    ("regular_standard_addition", boxed::<RegularStandardAddition>),
    ("asd_standard_addition", boxed::<AsdStandardAddition>),
    ("ga_standard_addition", boxed::<GaStandardAddition>),
    ("time_constant", boxed::<TimeConstant>),
];

/// Summary of a registered method
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MethodInfo {
    pub key: &'static str,
    pub display_name: &'static str,
    pub kind: MethodKind,
}

/// Instantiate the method registered under `key`
///
/// # Errors
/// Returns [`Error::DoesNotExist`] for unknown keys.
pub fn get(key: &str) -> Result<Box<dyn Method>> {
    MANIFEST
        .iter()
        .find(|(name, _)| *name == key)
        .map(|(_, construct)| construct())
        .ok_or_else(|| Error::DoesNotExist(format!("method {key}")))
}

/// Every registered method, processing before analysis in manifest order
pub fn list() -> Vec<MethodInfo> {
    MANIFEST
        .iter()
        .map(|&(key, construct)| {
            let method = construct();
            MethodInfo {
                key,
                display_name: method.display_name(),
                kind: method.kind(),
            }
        })
        .collect()
}

/// Registered methods of `kind`
pub fn list_kind(kind: MethodKind) -> Vec<MethodInfo> {
    list().into_iter().filter(|info| info.kind == kind).collect()
}

#[cfg(test)]
mod tests {
    use super::{get, list, list_kind};
    use crate::config::Config;
    use crate::method::MethodKind;
    use crate::Error;

    #[test]
    fn manifest_keys_match_the_methods() {
        for info in list() {
            assert_eq!(get(info.key).unwrap().key(), info.key);
            assert!(!get(info.key).unwrap().steps(&Config::default()).is_empty());
        }
    }

    #[test]
    fn catalogue_is_complete() {
        assert_eq!(list_kind(MethodKind::Processing).len(), 6);
        assert_eq!(list_kind(MethodKind::Analysis).len(), 4);
        assert!(matches!(get("unknown"), Err(Error::DoesNotExist(_))));
    }
}
