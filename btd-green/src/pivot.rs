//! Pivot metadata (spec §3, §6): device orbital ordering, per-electrode
//! orbital indices, BTD block sizes, and downfolding regions.
//!
//! Grounded on the `pivot`/`pivot_down`/`btd`/`a_elec`/`mu`/`eta`
//! accessors used throughout `PivotSelfEnergy`/`DownfoldSelfEnergy`/
//! `DeviceGreen` in `original_source/toolbox/btd/_btd.py`. Real pivot
//! metadata is produced by TBtrans-style file parsing (out of scope per
//! spec §1); [`InMemoryPivot`] is the in-memory fixture this crate's own
//! tests and examples build.

use std::collections::HashMap;

use crate::error::{Error, Result};

/// The semi-infinite direction an electrode extends along, one of the
/// six signed lattice directions (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SemiInfiniteDirection {
    PlusA,
    MinusA,
    PlusB,
    MinusB,
    PlusC,
    MinusC,
}

/// Per-electrode pivot metadata.
#[derive(Debug, Clone)]
pub struct ElectrodeInfo {
    /// Orbital indices of this electrode in the full (unpivoted)
    /// orbital index space, in device order.
    pub pivot_full: Vec<usize>,
    /// Orbital indices of the downfolding region in the full index
    /// space, ordered surface-first toward the device.
    pub pivot_down: Vec<usize>,
    /// Block sizes of the downfolding BTD chain; sums to
    /// `pivot_down.len()`.
    pub btd_down: Vec<usize>,
    /// Atom indices of the electrode surface layer.
    pub atoms: Vec<usize>,
    pub mu: f64,
    pub eta: f64,
    pub direction: SemiInfiniteDirection,
    /// Bloch expansion factors `(nx, ny, nz)`.
    pub bloch: (usize, usize, usize),
    pub bulk: bool,
}

/// Immutable pivot metadata for one device problem (spec §3).
pub trait Pivot: Send + Sync {
    /// Permutation mapping device positions to original orbital
    /// indices.
    fn pivot(&self) -> &[usize];

    /// BTD block sizes of the device region; sums to `pivot().len()`.
    fn btd(&self) -> &[usize];

    fn electrode_names(&self) -> Vec<&str>;

    fn electrode(&self, elec: &str) -> Result<&ElectrodeInfo>;

    /// Orbital indices of `elec` in the full orbital index space, or
    /// (with `in_device = true`) positions into the pivoted device
    /// region `0..N_device`.
    fn pivot_elec(&self, elec: &str, in_device: bool) -> Result<Vec<usize>> {
        let info = self.electrode(elec)?;
        if !in_device {
            return Ok(info.pivot_full.clone());
        }
        info.pivot_full
            .iter()
            .map(|&o| {
                self.device_position(o).ok_or_else(|| {
                    Error::invalid(format!(
                        "electrode {elec:?} orbital {o} is not part of the device pivot"
                    ))
                })
            })
            .collect()
    }

    /// Position of orbital `o` (full index space) within the device
    /// pivot, if present.
    fn device_position(&self, o: usize) -> Option<usize>;

    fn pivot_down(&self, elec: &str) -> Result<&[usize]> {
        Ok(&self.electrode(elec)?.pivot_down)
    }

    fn btd_down(&self, elec: &str) -> Result<&[usize]> {
        Ok(&self.electrode(elec)?.btd_down)
    }

    fn a_elec(&self, elec: &str) -> Result<&[usize]> {
        Ok(&self.electrode(elec)?.atoms)
    }

    fn mu(&self, elec: &str) -> Result<f64> {
        Ok(self.electrode(elec)?.mu)
    }

    fn eta(&self, elec: &str) -> Result<f64> {
        Ok(self.electrode(elec)?.eta)
    }
}

/// An in-memory [`Pivot`] built directly from block sizes and
/// electrode metadata, the fixture used by this crate's own tests.
#[derive(Debug, Clone)]
pub struct InMemoryPivot {
    pivot: Vec<usize>,
    btd: Vec<usize>,
    device_position: HashMap<usize, usize>,
    electrodes: HashMap<String, ElectrodeInfo>,
}

impl InMemoryPivot {
    /// `pivot` is the device-position -> full-orbital-index map; `btd`
    /// its block partition (must sum to `pivot.len()`).
    pub fn new(
        pivot: Vec<usize>,
        btd: Vec<usize>,
        electrodes: HashMap<String, ElectrodeInfo>,
    ) -> Result<Self> {
        let sum: usize = btd.iter().sum();
        if sum != pivot.len() {
            return Err(Error::invalid(format!(
                "BTD block sizes sum to {sum}, expected N_device = {}",
                pivot.len()
            )));
        }
        let device_position = pivot
            .iter()
            .enumerate()
            .map(|(pos, &orbital)| (orbital, pos))
            .collect();
        Ok(InMemoryPivot {
            pivot,
            btd,
            device_position,
            electrodes,
        })
    }
}

impl Pivot for InMemoryPivot {
    fn pivot(&self) -> &[usize] {
        &self.pivot
    }

    fn btd(&self) -> &[usize] {
        &self.btd
    }

    fn electrode_names(&self) -> Vec<&str> {
        self.electrodes.keys().map(|s| s.as_str()).collect()
    }

    fn electrode(&self, elec: &str) -> Result<&ElectrodeInfo> {
        self.electrodes
            .get(elec)
            .ok_or_else(|| Error::UnknownElectrode(elec.to_string()))
    }

    fn device_position(&self, o: usize) -> Option<usize> {
        self.device_position.get(&o).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(pivot_full: Vec<usize>) -> ElectrodeInfo {
        ElectrodeInfo {
            pivot_full: pivot_full.clone(),
            pivot_down: pivot_full,
            btd_down: vec![4],
            atoms: vec![0],
            mu: 0.0,
            eta: 1e-4,
            direction: SemiInfiniteDirection::MinusA,
            bloch: (1, 1, 1),
            bulk: false,
        }
    }

    #[test]
    fn block_size_mismatch_is_rejected() {
        let pivot = (0..12).collect::<Vec<_>>();
        let err = InMemoryPivot::new(pivot, vec![4, 4], HashMap::new());
        assert!(err.is_err());
    }

    #[test]
    fn pivot_elec_in_device_maps_positions() {
        let pivot = vec![10, 11, 12, 13, 20, 21, 22, 23];
        let mut electrodes = HashMap::new();
        electrodes.insert("L".to_string(), info(vec![10, 11]));
        let p = InMemoryPivot::new(pivot, vec![4, 4], electrodes).unwrap();
        assert_eq!(p.pivot_elec("L", false).unwrap(), vec![10, 11]);
        assert_eq!(p.pivot_elec("L", true).unwrap(), vec![0, 1]);
    }

    #[test]
    fn unknown_electrode_errors() {
        let pivot = (0..4).collect::<Vec<_>>();
        let p = InMemoryPivot::new(pivot, vec![4], HashMap::new()).unwrap();
        assert!(matches!(p.mu("R"), Err(Error::UnknownElectrode(_))));
    }
}
