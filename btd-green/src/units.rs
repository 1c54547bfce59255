//! eV-denominated unit-suffix conversion (spec §6), the Rust equivalent
//! of `sisl.unit.siesta.unit_convert` calls in `DeviceGreen.from_fdf`'s
//! `read_electrode` closure (`_btd.py` lines 556-662).

use crate::error::{Error, Result};

/// Rydberg energy in eV (`CODATA` value, matching sisl's own constant).
const RY_TO_EV: f64 = 13.605_693_009;
const HARTREE_TO_EV: f64 = 2.0 * RY_TO_EV;
/// Boltzmann constant in eV/K, for converting a temperature-denominated
/// `eta` (`"300 K"`) into an energy.
const K_TO_EV: f64 = 8.617_333_262e-5;

/// Convert `value` expressed in `unit` into eV. Recognizes the unit
/// suffixes `from_fdf`'s `read_electrode` actually exercises: `eV`,
/// `Ry`, `Ha`/`Hartree`, `meV`, `K`.
pub fn to_ev(value: f64, unit: &str) -> Result<f64> {
    let factor = match unit {
        "eV" => 1.0,
        "meV" => 1e-3,
        "Ry" => RY_TO_EV,
        "Ha" | "Hartree" => HARTREE_TO_EV,
        "K" => K_TO_EV,
        other => {
            return Err(Error::Config(format!("unrecognized energy unit {other:?}")));
        }
    };
    Ok(value * factor)
}

/// Parse a `"<value> <unit>"` token (e.g. `"0.01 Ry"`) into eV, as used
/// for `eta`/chemical-potential fields in an fdf `%block`.
pub fn parse_ev(token: &str) -> Result<f64> {
    let token = token.trim();
    let mut parts = token.splitn(2, char::is_whitespace);
    let value = parts
        .next()
        .ok_or_else(|| Error::Config(format!("empty energy token {token:?}")))?;
    let value: f64 = value
        .parse()
        .map_err(|_| Error::Config(format!("invalid numeric value in energy token {token:?}")))?;
    match parts.next().map(str::trim).filter(|s| !s.is_empty()) {
        Some(unit) => to_ev(value, unit),
        None => Ok(value),
    }
}
