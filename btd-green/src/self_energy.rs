//! Self-energy providers (spec §4.3, §9).
//!
//! `SelfEnergyProvider` is the capability trait spec §9's design notes
//! prescribe in place of the reference implementation's duck-typed
//! dispatch, with the `SelfEnergyKind` tag recording provenance (file,
//! live solver, or downfolded). [`PivotSelfEnergy`] is the façade over
//! an opaque primitive solver described in `original_source`'s
//! `PivotSelfEnergy.__init__`/`self_energy`/`scattering_matrix`; the
//! primitive recursive surface-Green iteration itself is out of scope
//! (spec §1) and modeled here as the [`OpaqueSigmaSolver`] trait object
//! a caller plugs in.

use faer::Mat;

use crate::error::{Error, Result};
use crate::linalg::C64;
use crate::pivot::Pivot;

/// Σ(E, k) on whatever block a provider is defined over, plus the
/// derived broadening matrix Γ = i(Σ - Σ^H) (spec §9's capability
/// trait).
pub trait SelfEnergyProvider: Send + Sync {
    fn self_energy(&self, e: C64, k: [f64; 3]) -> Result<Mat<C64>>;

    /// Γ(E, k); the default derives it from `self_energy` via
    /// [`se2scat`], matching `se2scat` in
    /// `original_source/toolbox/btd/_btd.py`.
    fn scattering_matrix(&self, e: C64, k: [f64; 3]) -> Result<Mat<C64>> {
        Ok(se2scat(&self.self_energy(e, k)?))
    }

    /// Bloch expansion factors `(nx, ny, nz)`; `(1, 1, 1)` when no
    /// Bloch unfolding is in play.
    fn bloch_factors(&self) -> (usize, usize, usize) {
        (1, 1, 1)
    }
}

/// Γ = i(Σ - Σ^H), the broadening matrix derived from a self-energy.
pub fn se2scat(se: &Mat<C64>) -> Mat<C64> {
    let i = C64::new(0.0, 1.0);
    (se - se.adjoint().to_owned()) * faer::Scale(i)
}

/// Provenance tag for a [`SelfEnergyProvider`], per spec §9's "tagged
/// variant {File, Live, Downfolded}".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelfEnergyKind {
    /// Read from a precomputed self-energy file.
    File,
    /// Computed on demand by a live recursive surface-Green solver.
    Live,
    /// Produced by [`crate::downfold::DownfoldSelfEnergy`].
    Downfolded,
}

/// The opaque primitive Σ solver this crate treats as an external
/// collaborator (spec §1): a recursive surface-Green-function
/// iteration, or a lookup against a precomputed self-energy file.
/// Returns Σ(E, k) on the electrode's surface block.
pub trait OpaqueSigmaSolver: Send + Sync {
    fn sigma(&self, e: C64, k: [f64; 3]) -> Result<Mat<C64>>;
}

/// Façade over an opaque Σ provider, carrying the pivoting indices
/// needed to place its output into the device/downfold orbital spaces
/// (spec §4.3).
pub struct PivotSelfEnergy {
    name: String,
    kind: SelfEnergyKind,
    /// Electrode orbital indices in the full orbital index space.
    pvt: Vec<usize>,
    /// Electrode orbital indices as positions in the pivoted device
    /// region.
    pvt_dev: Vec<usize>,
    /// Downfolding-region orbital indices in the full index space.
    pvt_down: Vec<usize>,
    /// BTD block partition of the downfolding region.
    btd_down: Vec<usize>,
    bloch: (usize, usize, usize),
    solver: Box<dyn OpaqueSigmaSolver>,
}

impl PivotSelfEnergy {
    pub fn new(
        name: impl Into<String>,
        pivot: &dyn Pivot,
        kind: SelfEnergyKind,
        solver: Box<dyn OpaqueSigmaSolver>,
    ) -> Result<Self> {
        let name = name.into();
        let info = pivot.electrode(&name)?;
        let pvt = info.pivot_full.clone();
        let pvt_down = info.pivot_down.clone();
        let btd_down = info.btd_down.clone();
        let bloch = info.bloch;
        let pvt_dev = pivot.pivot_elec(&name, true)?;
        Ok(PivotSelfEnergy {
            name,
            kind,
            pvt,
            pvt_dev,
            pvt_down,
            btd_down,
            bloch,
            solver,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> SelfEnergyKind {
        self.kind
    }

    /// Electrode orbital indices in the full orbital index space.
    pub fn pvt(&self) -> &[usize] {
        &self.pvt
    }

    /// Electrode orbital indices as positions in the pivoted device
    /// region.
    pub fn pvt_dev(&self) -> &[usize] {
        &self.pvt_dev
    }

    pub fn pvt_down(&self) -> &[usize] {
        &self.pvt_down
    }

    pub fn btd_down(&self) -> &[usize] {
        &self.btd_down
    }
}

impl SelfEnergyProvider for PivotSelfEnergy {
    fn self_energy(&self, e: C64, k: [f64; 3]) -> Result<Mat<C64>> {
        let se = self.solver.sigma(e, k)?;
        let n = self.pvt.len();
        if se.nrows() != n || se.ncols() != n {
            return Err(Error::invalid(format!(
                "electrode {:?} self-energy solver returned a {}x{} matrix, expected {n}x{n}",
                self.name,
                se.nrows(),
                se.ncols()
            )));
        }
        Ok(se)
    }

    fn bloch_factors(&self) -> (usize, usize, usize) {
        self.bloch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pivot::{ElectrodeInfo, InMemoryPivot, SemiInfiniteDirection};
    use std::collections::HashMap;

    struct ConstSigma(Mat<C64>);
    impl OpaqueSigmaSolver for ConstSigma {
        fn sigma(&self, _e: C64, _k: [f64; 3]) -> Result<Mat<C64>> {
            Ok(self.0.clone())
        }
    }

    fn pivot_with_electrode() -> InMemoryPivot {
        let pivot = vec![0, 1, 2, 3];
        let info = ElectrodeInfo {
            pivot_full: vec![0, 1],
            pivot_down: vec![0, 1],
            btd_down: vec![2],
            atoms: vec![0],
            mu: 0.0,
            eta: 1e-4,
            direction: SemiInfiniteDirection::MinusA,
            bloch: (1, 1, 1),
            bulk: false,
        };
        let mut electrodes = HashMap::new();
        electrodes.insert("L".to_string(), info);
        InMemoryPivot::new(pivot, vec![4], electrodes).unwrap()
    }

    #[test]
    fn gamma_is_hermitian_for_arbitrary_sigma() {
        let se = Mat::<C64>::from_fn(2, 2, |i, j| C64::new((i + 1) as f64, (j as f64) * 0.3));
        let gamma = se2scat(&se);
        let diff = (&gamma - gamma.adjoint().to_owned()).norm_l2();
        assert!(diff < 1e-12);
    }

    #[test]
    fn self_energy_shape_mismatch_errors() {
        let pivot = pivot_with_electrode();
        let bad = Mat::<C64>::zeros(3, 3);
        let pse = PivotSelfEnergy::new(
            "L",
            &pivot,
            SelfEnergyKind::Live,
            Box::new(ConstSigma(bad)),
        )
        .unwrap();
        assert!(pse.self_energy(C64::new(0.1, 1e-4), [0.0, 0.0, 0.0]).is_err());
    }

    #[test]
    fn pivot_self_energy_carries_device_positions() {
        let pivot = pivot_with_electrode();
        let se = Mat::<C64>::zeros(2, 2);
        let pse = PivotSelfEnergy::new("L", &pivot, SelfEnergyKind::File, Box::new(ConstSigma(se)))
            .unwrap();
        assert_eq!(pse.pvt_dev(), &[0, 1]);
        assert_eq!(pse.btd_down(), &[2]);
    }
}
