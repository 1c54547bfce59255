//! A minimal line-oriented parser for the `%block TBT.Elec.<name>` /
//! `TS.Elec.<name>` key-value grammar (spec §6), turning an
//! already-extracted text block into an [`ElectrodeConfig`].
//!
//! Ported from the `get_line`/`read_electrode` closures of
//! `DeviceGreen.from_fdf` in `original_source/toolbox/btd/_btd.py`
//! (lines 556-662). Locating and extracting the `%block` text from a
//! real `.fdf` file, and reading the referenced `.TSHS`/`.TBT.nc` files,
//! stays out of scope (spec §1); this module only interprets the block
//! body once a caller has it as a list of lines.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::pivot::SemiInfiniteDirection;
use crate::units::parse_ev;

/// Parsed `%block TBT.Elec.<name>` / `TS.Elec.<name>` content (spec §6):
/// the electrode's Hamiltonian/overlap path, semi-infinite direction,
/// Bloch expansion factors, bulk flag, and broadening η in eV.
#[derive(Debug, Clone, PartialEq)]
pub struct ElectrodeConfig {
    pub hs_path: String,
    pub semi_inf: SemiInfiniteDirection,
    pub bloch: (usize, usize, usize),
    pub bulk: bool,
    pub eta: f64,
}

/// Split each non-empty, non-comment line of a `%block` body into a
/// lowercased key and its trimmed value, matching `get_line`'s
/// `key, val = line.split(" ", 1)` plus `#`-comment stripping.
pub fn parse_fdf_block(lines: &[&str]) -> HashMap<String, String> {
    let mut dic = HashMap::new();
    for line in lines {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, val)) = line.split_once(char::is_whitespace) else {
            continue;
        };
        let val = val.split('#').next().unwrap_or("").trim();
        dic.insert(key.to_lowercase().trim().to_string(), val.to_string());
    }
    dic
}

/// Normalize `a1`/`a2`/`a3` (and their signed `+`/`-` forms) to the
/// sisl-style `±{a,b,c}` semi-infinite direction spelling, matching the
/// reference's `semi_inf[0] + {'a1': 'a', ...}` remap.
fn parse_semi_inf(raw: &str) -> Result<SemiInfiniteDirection> {
    let raw = raw.to_lowercase();
    let (sign, axis) = raw.split_at(1);
    let axis = match axis {
        "a1" | "a" => "a",
        "a2" | "b" => "b",
        "a3" | "c" => "c",
        other => {
            return Err(Error::Config(format!("unrecognized semi-inf-direction axis {other:?}")));
        }
    };
    use SemiInfiniteDirection::*;
    match (sign, axis) {
        ("+", "a") => Ok(PlusA),
        ("-", "a") => Ok(MinusA),
        ("+", "b") => Ok(PlusB),
        ("-", "b") => Ok(MinusB),
        ("+", "c") => Ok(PlusC),
        ("-", "c") => Ok(MinusC),
        (other, _) => Err(Error::Config(format!(
            "semi-inf-direction must start with '+' or '-', found {other:?}"
        ))),
    }
}

impl ElectrodeConfig {
    /// Build an [`ElectrodeConfig`] from an already-parsed key-value
    /// dictionary (see [`parse_fdf_block`]) plus the global `Eta`
    /// default (`TS.Elecs.Eta`/`TBT.Elecs.Eta`, already resolved to eV
    /// by the caller).
    pub fn from_dict(dic: &HashMap<String, String>, default_eta: f64) -> Result<Self> {
        let hs_path = dic
            .get("hs")
            .or_else(|| dic.get("tshs"))
            .ok_or_else(|| Error::Config("electrode block is missing an HS/TSHS path".to_string()))?
            .clone();

        let semi_inf = ["semi-inf-direction", "semi-inf-dir", "semi-inf"]
            .iter()
            .find_map(|k| dic.get(*k))
            .ok_or_else(|| Error::Config("electrode block is missing semi-inf-direction".to_string()))
            .and_then(|v| parse_semi_inf(v))?;

        let bulk = dic
            .get("bulk")
            .map(|v| matches!(v.to_lowercase().as_str(), "true" | "t" | "yes" | "1"))
            .unwrap_or(true);

        let mut bloch = [1usize, 1, 1];
        for (i, suf) in ["bloch-a", "bloch-b", "bloch-c"].iter().enumerate() {
            if let Some(v) = dic.get(*suf) {
                bloch[i] = v
                    .trim()
                    .parse()
                    .map_err(|_| Error::Config(format!("invalid {suf} value {v:?}")))?;
            }
        }
        if let Some(v) = dic.get("bloch") {
            let parts: Vec<&str> = v.split_whitespace().collect();
            if parts.len() != 3 {
                return Err(Error::Config(format!("bloch must have 3 components, got {v:?}")));
            }
            for (i, p) in parts.iter().enumerate() {
                bloch[i] = p
                    .parse()
                    .map_err(|_| Error::Config(format!("invalid bloch component {p:?}")))?;
            }
        }

        let eta = match dic.get("eta") {
            Some(v) => parse_ev(v)?,
            None => default_eta,
        };

        Ok(ElectrodeConfig {
            hs_path,
            semi_inf,
            bloch: (bloch[0], bloch[1], bloch[2]),
            bulk,
            eta,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BLOCK: &[&str] = &[
        "HS elec_L.TSHS",
        "semi-inf-direction -a1  # towards bulk",
        "bloch-a2 3",
        "eta 1e-4 eV",
    ];

    #[test]
    fn parses_a_typical_electrode_block() {
        let dic = parse_fdf_block(BLOCK);
        let cfg = ElectrodeConfig::from_dict(&dic, 1e-4).unwrap();
        assert_eq!(cfg.hs_path, "elec_L.TSHS");
        assert_eq!(cfg.semi_inf, SemiInfiniteDirection::MinusA);
        assert_eq!(cfg.bloch, (1, 3, 1));
        assert!(cfg.bulk);
        assert!((cfg.eta - 1e-4).abs() < 1e-12);
    }

    #[test]
    fn missing_hs_path_errors() {
        let dic = parse_fdf_block(&["semi-inf-direction -a1"]);
        assert!(matches!(ElectrodeConfig::from_dict(&dic, 1e-4), Err(Error::Config(_))));
    }

    #[test]
    fn missing_semi_inf_errors() {
        let dic = parse_fdf_block(&["HS elec_L.TSHS"]);
        assert!(matches!(ElectrodeConfig::from_dict(&dic, 1e-4), Err(Error::Config(_))));
    }

    #[test]
    fn default_eta_is_used_when_absent() {
        let dic = parse_fdf_block(&["HS elec_L.TSHS", "semi-inf-direction +c"]);
        let cfg = ElectrodeConfig::from_dict(&dic, 2.5e-4).unwrap();
        assert!((cfg.eta - 2.5e-4).abs() < 1e-12);
    }
}
