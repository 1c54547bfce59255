//! Block-tri-diagonal (BTD) Green function engine for non-equilibrium
//! quantum transport: Hamiltonian/self-energy downfolding, Green
//! function propagation, spectral functions, scattering states and
//! eigenchannels.
//!
//! The module layout mirrors the `DeviceGreen`/`Pivot`/`PivotSelfEnergy`
//! split in `original_source/toolbox/btd/_btd.py`: [`hamiltonian`] and
//! [`pivot`] describe the device geometry, [`self_energy`]/[`downfold`]
//! build electrode self-energies, [`device_green`] runs the BTD
//! recurrences and exposes `green`/`spectral`/`scattering_state`/
//! `eigenchannel`, and [`builder`] drives a parallel (E,k) sweep.

pub mod blocks;
pub mod builder;
pub mod config;
pub mod device_green;
pub mod downfold;
pub mod error;
pub mod hamiltonian;
pub mod linalg;
pub mod pivot;
pub mod self_energy;
pub mod units;

pub use builder::{DeviceGreenBuilder, SharedHamiltonian};
pub use device_green::{DeviceGreen, Eigenchannel, GreenFormat, ScatteringMethod, ScatteringState, SpectralFormat, SpectralMethod};
pub use error::{Error, Result};
pub use linalg::C64;
pub use pivot::{InMemoryPivot, Pivot};
