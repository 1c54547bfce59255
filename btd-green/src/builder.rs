//! `DeviceGreenBuilder` (spec §5): a cheap, `Clone`-able factory that
//! produces independent [`DeviceGreen`] instances sharing the same
//! Hamiltonian/pivot/electrode data via `Arc`, so a caller can sweep an
//! `(E, k)` grid and get one solver per grid point — each `DeviceGreen`
//! caches its own per-(E,k) tiles (spec §5: not safe to share across
//! threads doing independent solves) while the immutable problem data is
//! shared, not copied.
//!
//! Mirrors the embarrassingly-parallel shape of `calc_spinwave`'s
//! `into_par_iter()` sweep over q-points: this builder is the
//! `Arc`-sharing half of that shape, with the `rayon` sweep itself
//! living in `btd-green-py`'s `green_sweep`, the caller that actually
//! drives one builder per thread.

use std::sync::Arc;

use crate::device_green::DeviceGreen;
use crate::error::Result;
use crate::hamiltonian::HamiltonianProvider;
use crate::pivot::{ElectrodeInfo, Pivot};
use crate::self_energy::SelfEnergyProvider;

impl<T: HamiltonianProvider + ?Sized> HamiltonianProvider for Arc<T> {
    fn hk(&self, k: [f64; 3]) -> Result<crate::hamiltonian::Csr> {
        (**self).hk(k)
    }

    fn sk(&self, k: [f64; 3]) -> Result<crate::hamiltonian::Csr> {
        (**self).sk(k)
    }

    fn num_orbitals(&self) -> usize {
        (**self).num_orbitals()
    }
}

impl<T: Pivot + ?Sized> Pivot for Arc<T> {
    fn pivot(&self) -> &[usize] {
        (**self).pivot()
    }

    fn btd(&self) -> &[usize] {
        (**self).btd()
    }

    fn electrode_names(&self) -> Vec<&str> {
        (**self).electrode_names()
    }

    fn electrode(&self, elec: &str) -> Result<&ElectrodeInfo> {
        (**self).electrode(elec)
    }

    fn device_position(&self, o: usize) -> Option<usize> {
        (**self).device_position(o)
    }
}

impl<T: SelfEnergyProvider + ?Sized> SelfEnergyProvider for Arc<T> {
    fn self_energy(&self, e: crate::linalg::C64, k: [f64; 3]) -> Result<faer::Mat<crate::linalg::C64>> {
        (**self).self_energy(e, k)
    }

    fn scattering_matrix(&self, e: crate::linalg::C64, k: [f64; 3]) -> Result<faer::Mat<crate::linalg::C64>> {
        (**self).scattering_matrix(e, k)
    }

    fn bloch_factors(&self) -> (usize, usize, usize) {
        (**self).bloch_factors()
    }
}

/// `Arc`-backed Hamiltonian, used as the `H` type parameter of every
/// [`DeviceGreen`] a [`DeviceGreenBuilder`] produces.
pub type SharedHamiltonian = Arc<dyn HamiltonianProvider + Send + Sync>;

/// Factory for independent [`DeviceGreen`] solvers sharing the same
/// problem data. Cloning a builder is O(1) (an `Arc` bump per field);
/// each clone, or each call to [`Self::build`], is safe to hand to a
/// different thread.
#[derive(Clone)]
pub struct DeviceGreenBuilder {
    h: SharedHamiltonian,
    pivot: Arc<dyn Pivot>,
    elecs: Vec<(String, Arc<dyn SelfEnergyProvider>)>,
}

impl DeviceGreenBuilder {
    pub fn new(
        h: SharedHamiltonian,
        pivot: Arc<dyn Pivot>,
        elecs: Vec<(String, Arc<dyn SelfEnergyProvider>)>,
    ) -> Self {
        DeviceGreenBuilder { h, pivot, elecs }
    }

    /// Build one independent [`DeviceGreen`]; call once per `(E, k)`
    /// task in a parallel sweep (spec §5).
    pub fn build(&self) -> DeviceGreen<SharedHamiltonian> {
        let pivot: Box<dyn Pivot> = Box::new(Arc::clone(&self.pivot));
        let elecs: Vec<(String, Box<dyn SelfEnergyProvider>)> = self
            .elecs
            .iter()
            .map(|(name, se)| (name.clone(), Box::new(Arc::clone(se)) as Box<dyn SelfEnergyProvider>))
            .collect();
        DeviceGreen::new(Arc::clone(&self.h), pivot, elecs)
    }
}
