//! Eigenchannel decomposition `eigenchannel()` (spec §4.5).
//!
//! Ported from `DeviceGreen.eigenchannel` in
//! `original_source/toolbox/btd/_btd.py` (lines 1606-1669).

use faer::Mat;

use super::{DeviceGreen, ScatteringState};
use crate::error::Result;
use crate::hamiltonian::HamiltonianProvider;
use crate::linalg::{self, signsqrt, C64};

/// Transmission eigenchannels built from a [`ScatteringState`] (spec
/// §4.5): `state` holds the channels as columns, `transmission` the
/// corresponding eigenvalues of the summed electrode broadening matrix,
/// sorted descending to match.
pub struct Eigenchannel {
    pub state: Mat<C64>,
    pub transmission: Vec<f64>,
    pub elec_to: Vec<usize>,
    pub e: C64,
    pub k: [f64; 3],
}

impl<H: HamiltonianProvider> DeviceGreen<H> {
    /// `eigenchannel(state, elec_to)` (spec §4.5): diagonalizes the
    /// transmission matrix `t_u = sum_e <u|Gamma_e|u>` restricted to the
    /// DOS-weighted scattering states `state`, returning eigenvectors
    /// back-transformed into the original orbital basis together with
    /// their transmission eigenvalues (descending).
    pub fn eigenchannel(&self, state: &ScatteringState, elec_to: &[&str]) -> Result<Eigenchannel> {
        self.prepare_se(state.e, state.k)?;

        let elec_to: Vec<usize> = elec_to
            .iter()
            .map(|e| self.electrode_index(e))
            .collect::<Result<Vec<_>>>()?;

        // Scattering states store eig(A)/2pi in `dos`; rescale the
        // (orthonormal) states by sqrt(dos) so columns carry the proper
        // spectral weight for the transmission-matrix construction below.
        let ncols = state.state.ncols();
        let scale = faer::Col::<C64>::from_fn(ncols, |i| C64::from(signsqrt(state.dos[i])));
        let a = &state.state * scale.as_diagonal();

        let data_ref = self.data.borrow();
        let data = data_ref.as_ref().unwrap();

        let mut elecs = elec_to.iter();
        let first = *elecs.next().ok_or_else(|| {
            crate::error::Error::invalid("eigenchannel: elec_to must not be empty")
        })?;
        let idx = self.pvt_dev(first)?;
        let u = select_rows(a.as_ref(), &idx);
        let gamma = &data.gamma[first];
        let mut ut = &(u.adjoint() * gamma) * &u;
        for &el in elecs {
            let idx = self.pvt_dev(el)?;
            let u = select_rows(a.as_ref(), &idx);
            let gamma = &data.gamma[el];
            ut += &(u.adjoint() * gamma) * &u;
        }
        drop(data_ref);

        let (mut tt, ut) = linalg::eigh_destroy(ut)?;
        for t in tt.iter_mut() {
            *t *= 2.0 * std::f64::consts::PI;
        }

        let n = tt.len();
        let mut ut_rev = Mat::<C64>::zeros(n, n);
        let mut tt_rev = Vec::with_capacity(n);
        for j in 0..n {
            ut_rev.as_mut().col_mut(j).copy_from(ut.col(n - 1 - j));
            tt_rev.push(tt[n - 1 - j]);
        }

        let channels = &a * &ut_rev;

        Ok(Eigenchannel { state: channels, transmission: tt_rev, elec_to, e: state.e, k: state.k })
    }
}

/// `a[idx, :]` for a list of row indices, matching the reference's
/// `A[:, idx]` (there the state basis runs along columns; here it runs
/// along rows, see the module doc on [`ScatteringState`]).
fn select_rows(a: faer::MatRef<C64>, idx: &[usize]) -> Mat<C64> {
    let mut out = Mat::<C64>::zeros(idx.len(), a.ncols());
    for (i, &pi) in idx.iter().enumerate() {
        out.as_mut().row_mut(i).copy_from(a.row(pi));
    }
    out
}
