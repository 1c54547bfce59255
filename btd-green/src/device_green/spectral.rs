//! Spectral function `spectral()` and scattering-state construction
//! `scattering_state()` (spec §4.5).
//!
//! Ported from `DeviceGreen.spectral`/`_spectral_column*`/
//! `_spectral_propagate*` and `DeviceGreen.scattering_state`/
//! `_scattering_state_*`/`_scattering_state_reduce` in
//! `original_source/toolbox/btd/_btd.py` (lines 1134-1604).

use faer::Mat;

use super::DeviceGreen;
use crate::blocks::BlockMatrix;
use crate::error::{Error, Result};
use crate::hamiltonian::HamiltonianProvider;
use crate::linalg::{self, signsqrt, C64};

/// Output shape requested from [`DeviceGreen::spectral`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpectralFormat {
    Array,
    Btd,
    Bm,
}

/// Which identity to use for computing the spectral function (spec
/// §4.5): `column` extracts `G[:, pvt_dev(e)]` once and forms
/// `G Gamma_e G^H` directly; `propagate` instead computes the diagonal
/// tile(s) the electrode touches and fans the rest out through the
/// `tY`/`tX` recurrences.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpectralMethod {
    Column,
    Propagate,
}

pub enum SpectralResult {
    Array(Mat<C64>),
    Btd(BlockMatrix),
    Bm(BlockMatrix),
}

impl SpectralResult {
    pub fn into_array(self) -> Option<Mat<C64>> {
        match self {
            SpectralResult::Array(m) => Some(m),
            _ => None,
        }
    }

    pub fn into_block_matrix(self) -> Option<BlockMatrix> {
        match self {
            SpectralResult::Btd(m) | SpectralResult::Bm(m) => Some(m),
            _ => None,
        }
    }
}

/// Which method to use for computing scattering states (spec §4.5).
/// `Full` is quadratic in memory/time and intended for testing only;
/// `Svd` (the default) is the fastest method at full precision; `Propagate`
/// may be faster still for very large systems at the cost of some
/// precision, controlled by `cutoff`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScatteringMethod {
    Full,
    Svd,
    Propagate,
}

/// A scattering-state result (spec §4.5): `state` holds the states as
/// columns, `dos` the density-of-states weight each state carries
/// (`A_e u = 2*pi*dos*u`), both already reduced to the `N_electrode`
/// largest-|DOS| states and any requested cutoff.
pub struct ScatteringState {
    pub state: Mat<C64>,
    pub dos: Vec<f64>,
    pub method: ScatteringMethod,
    pub elec: usize,
    pub e: C64,
    pub k: [f64; 3],
}

/// Keep only the `n_elec` largest-DOS states (descending), then, if
/// `cutoff > 0`, further drop any state whose |DOS| falls below it.
/// Large-magnitude negative DOS survives the cutoff intentionally: it
/// signals a numerical issue to the caller rather than being silently
/// discarded (spec §4.5).
fn scattering_state_reduce(
    n_elec: usize,
    dos: Vec<f64>,
    state: Mat<C64>,
    cutoff: f64,
) -> (Vec<f64>, Mat<C64>) {
    let mut order: Vec<usize> = (0..dos.len()).collect();
    order.sort_by(|&a, &b| dos[b].partial_cmp(&dos[a]).unwrap_or(std::cmp::Ordering::Equal));
    order.truncate(n_elec.min(order.len()));

    let kept: Vec<usize> = if cutoff > 0.0 {
        order.into_iter().filter(|&i| dos[i].abs() >= cutoff).collect()
    } else {
        order
    };

    let mut out_dos = Vec::with_capacity(kept.len());
    let mut out_state = Mat::<C64>::zeros(state.nrows(), kept.len());
    for (col, &i) in kept.iter().enumerate() {
        out_dos.push(dos[i]);
        out_state.as_mut().col_mut(col).copy_from(state.col(i));
    }
    (out_dos, out_state)
}

impl<H: HamiltonianProvider> DeviceGreen<H> {
    /// `A_e(E,k) = G Gamma_e G^H` (spec §4.5).
    pub fn spectral(
        &self,
        elec: &str,
        e: C64,
        k: [f64; 3],
        format: SpectralFormat,
        method: SpectralMethod,
        herm: bool,
    ) -> Result<SpectralResult> {
        let ei = self.electrode_index(elec)?;
        self.prepare(e, k)?;
        match (format, method) {
            (SpectralFormat::Array, SpectralMethod::Column) => {
                Ok(SpectralResult::Array(self.spectral_column(ei)?))
            }
            (SpectralFormat::Array, SpectralMethod::Propagate) => {
                Ok(SpectralResult::Array(self.spectral_propagate(ei, herm)?))
            }
            (SpectralFormat::Btd, SpectralMethod::Column) => {
                Ok(SpectralResult::Btd(self.spectral_column_btd(ei, herm)?))
            }
            (SpectralFormat::Bm, SpectralMethod::Column) => {
                Ok(SpectralResult::Bm(self.spectral_column_bm(ei, herm)?))
            }
            (SpectralFormat::Btd, SpectralMethod::Propagate) => {
                // `_spectral_propagate_btd` is unimplemented upstream; this
                // conforming implementation picks option (b) from spec §9:
                // run the full propagate and project onto the BTD pattern.
                let dense = self.spectral_propagate(ei, herm)?;
                let blocks = self.pivot.btd().to_vec();
                Ok(SpectralResult::Btd(BlockMatrix::from_dense_tobtd(dense.as_ref(), blocks)))
            }
            (SpectralFormat::Bm, SpectralMethod::Propagate) => Err(Error::not_implemented(
                "spectral: format=bm is not supported with method=propagate",
            )),
        }
    }

    pub(crate) fn pvt_dev(&self, ei: usize) -> Result<Vec<usize>> {
        self.pivot.pivot_elec(&self.elec_names[ei], true)
    }

    fn spectral_column(&self, ei: usize) -> Result<Mat<C64>> {
        let idx = self.pvt_dev(ei)?;
        let g = self.green_column(&idx)?;
        let gamma = self.data.borrow().as_ref().unwrap().gamma[ei].clone();
        Ok(&(&g * &gamma) * g.adjoint())
    }

    /// Shared worker for [`Self::spectral_column_btd`]/
    /// [`Self::spectral_column_bm`]: fills column `jb` of the requested
    /// `row_range` of block rows (tridiagonal neighbors only, or every
    /// block, per caller), mirroring via `.adjoint()` for the rest of
    /// the column when `herm` is set.
    fn spectral_column_fill(
        &self,
        g: &Mat<C64>,
        gamma: &Mat<C64>,
        btd: &[usize],
        cum: &[usize],
        bm: &mut BlockMatrix,
        jb: usize,
        row_range: std::ops::Range<usize>,
        herm: bool,
    ) -> Result<()> {
        let slj = cum[jb]..cum[jb + 1];
        let gj = gamma * g.submatrix(slj.start, 0, slj.len(), g.ncols()).adjoint();
        let lo = row_range.start;
        let hi = if herm { jb } else { row_range.end.saturating_sub(1) };
        for ib in lo..=hi {
            let sli = cum[ib]..cum[ib + 1];
            let tile = g.submatrix(sli.start, 0, sli.len(), g.ncols()) * &gj;
            bm.set(ib, jb, tile.clone())?;
            if herm && ib != jb {
                bm.set(jb, ib, tile.adjoint().to_owned())?;
            }
        }
        let _ = btd;
        Ok(())
    }

    fn spectral_column_btd(&self, ei: usize, herm: bool) -> Result<BlockMatrix> {
        let idx = self.pvt_dev(ei)?;
        let g = self.green_column(&idx)?;
        let gamma = self.data.borrow().as_ref().unwrap().gamma[ei].clone();
        let btd = self.pivot.btd().to_vec();
        let nb = btd.len();
        let cum = self.cum_btd.clone();
        let mut bm = BlockMatrix::new(btd.clone());

        for jb in 0..nb {
            let row_lo = jb.saturating_sub(1);
            let row_hi = (jb + 1).min(nb - 1);
            self.spectral_column_fill(&g, &gamma, &btd, &cum, &mut bm, jb, row_lo..(row_hi + 1), herm)?;
        }
        Ok(bm)
    }

    fn spectral_column_bm(&self, ei: usize, herm: bool) -> Result<BlockMatrix> {
        let idx = self.pvt_dev(ei)?;
        let g = self.green_column(&idx)?;
        let gamma = self.data.borrow().as_ref().unwrap().gamma[ei].clone();
        let btd = self.pivot.btd().to_vec();
        let nb = btd.len();
        let cum = self.cum_btd.clone();
        let mut bm = BlockMatrix::new(btd.clone());

        for jb in 0..nb {
            self.spectral_column_fill(&g, &gamma, &btd, &cum, &mut bm, jb, 0..nb, herm)?;
        }
        Ok(bm)
    }

    /// Dense full-matrix spectral function via the `tY`/`tX` propagation
    /// identities (spec §4.5). Uses explicit loops over the BTD block
    /// index rather than the reference's recursive `left`/`right`/
    /// `above`/`below` closures, per spec §9's REDESIGN FLAG, so stack
    /// depth never depends on the number of blocks.
    fn spectral_propagate(&self, ei: usize, herm: bool) -> Result<Mat<C64>> {
        let idx = self.pvt_dev(ei)?;
        let (blocks, g_diag) = self.green_diag_block(&idx)?;
        let gamma = self.data.borrow().as_ref().unwrap().gamma[ei].clone();
        let a0 = &(&g_diag * &gamma) * g_diag.adjoint();

        let n = self.num_orbitals();
        let btd = self.pivot.btd();
        let nb = btd.len();
        let cum = &self.cum_btd;
        let mut s = Mat::<C64>::zeros(n, n);

        let r0 = blocks[0];
        let r1 = *blocks.last().unwrap();
        s.as_mut()
            .submatrix_mut(cum[r0], cum[r0], cum[r1 + 1] - cum[r0], cum[r1 + 1] - cum[r0])
            .copy_from(a0.as_ref());

        let data_ref = self.data.borrow();
        let data = data_ref.as_ref().unwrap();

        // Phase 1: propagate each region column fully up and down across
        // all row blocks, using the already-known region tiles as seed.
        for &jb in &blocks {
            // extend upward from the top of the region
            let mut src_row = r0;
            for i in (0..r0).rev() {
                let src = s.submatrix(cum[src_row], cum[jb], btd[src_row], btd[jb]).to_owned();
                let tile = data.t_y[i + 1].as_ref().unwrap() * faer::Scale(C64::new(-1.0, 0.0)) * &src;
                s.as_mut()
                    .submatrix_mut(cum[i], cum[jb], btd[i], btd[jb])
                    .copy_from(tile.as_ref());
                src_row = i;
            }
            // extend downward from the bottom of the region
            let mut src_row = r1;
            for i in (r1 + 1)..nb {
                let src = s.submatrix(cum[src_row], cum[jb], btd[src_row], btd[jb]).to_owned();
                let tile = data.t_x[i - 1].as_ref().unwrap() * faer::Scale(C64::new(-1.0, 0.0)) * &src;
                s.as_mut()
                    .submatrix_mut(cum[i], cum[jb], btd[i], btd[jb])
                    .copy_from(tile.as_ref());
                src_row = i;
            }
        }

        // Phase 2: every row block now has the region columns filled;
        // propagate each row outward across all remaining columns.
        for ib in 0..nb {
            let mut src_col = r0;
            for j in (0..r0).rev() {
                let src = s.submatrix(cum[ib], cum[src_col], btd[ib], btd[src_col]).to_owned();
                let tile = &src * data.t_y[j + 1].as_ref().unwrap().adjoint() * faer::Scale(C64::new(-1.0, 0.0));
                s.as_mut()
                    .submatrix_mut(cum[ib], cum[j], btd[ib], btd[j])
                    .copy_from(tile.as_ref());
                src_col = j;
            }
            let mut src_col = r1;
            for j in (r1 + 1)..nb {
                let src = s.submatrix(cum[ib], cum[src_col], btd[ib], btd[src_col]).to_owned();
                let tile = &src * data.t_x[j - 1].as_ref().unwrap().adjoint() * faer::Scale(C64::new(-1.0, 0.0));
                s.as_mut()
                    .submatrix_mut(cum[ib], cum[j], btd[ib], btd[j])
                    .copy_from(tile.as_ref());
                src_col = j;
            }
        }
        drop(data_ref);

        if herm {
            // Enforce exact Hermiticity: the block-tridiagonal recurrence
            // computes both triangles independently (floating-point noise
            // aside they agree, spec §8 property 2); overwrite the strict
            // upper triangle with the adjoint of the lower triangle so the
            // returned matrix is exactly Hermitian, mirroring the
            // reference's `copy_herm` shortcut.
            for ib in 0..nb {
                for jb in (ib + 1)..nb {
                    let lower = s.submatrix(cum[jb], cum[ib], btd[jb], btd[ib]).adjoint().to_owned();
                    s.as_mut()
                        .submatrix_mut(cum[ib], cum[jb], btd[ib], btd[jb])
                        .copy_from(lower.as_ref());
                }
            }
        }

        Ok(s)
    }

    /// `scattering_state(elec, E, k, cutoff, method)` (spec §4.5).
    pub fn scattering_state(
        &self,
        elec: &str,
        e: C64,
        k: [f64; 3],
        cutoff: [f64; 2],
        method: ScatteringMethod,
    ) -> Result<ScatteringState> {
        let ei = self.electrode_index(elec)?;
        self.prepare(e, k)?;
        let (dos, state) = match method {
            ScatteringMethod::Full => self.scattering_state_full(ei, cutoff[0])?,
            ScatteringMethod::Svd => self.scattering_state_svd(ei, cutoff[0])?,
            ScatteringMethod::Propagate => self.scattering_state_propagate(ei, cutoff[0], cutoff[1])?,
        };
        Ok(ScatteringState { state, dos, method, elec: ei, e, k })
    }

    fn n_elec(&self, ei: usize) -> usize {
        self.data.borrow().as_ref().unwrap().gamma[ei].nrows()
    }

    fn scattering_state_full(&self, ei: usize, cutoff: f64) -> Result<(Vec<f64>, Mat<C64>)> {
        let a = self.spectral_column(ei)?;
        let n = a.nrows();
        let mut a = a;
        for i in 0..n {
            a[(i, i)] += C64::new(0.1, 0.0);
        }
        let (mut dos, u) = linalg::eigh_destroy(a)?;
        for d in dos.iter_mut() {
            *d = (*d - 0.1) / (2.0 * std::f64::consts::PI);
        }
        Ok(scattering_state_reduce(self.n_elec(ei), dos, u, cutoff))
    }

    fn scattering_state_svd(&self, ei: usize, cutoff: f64) -> Result<(Vec<f64>, Mat<C64>)> {
        let idx = self.pvt_dev(ei)?;
        let g = self.green_column(&idx)?;
        let gamma = self.data.borrow().as_ref().unwrap().gamma[ei].clone();
        let gamma_sqrt = linalg::sqrtm_herm(gamma.as_ref())?;
        let a = &g * &gamma_sqrt;
        let (u, s, _vh) = linalg::svd_destroy(a, linalg::SvdDriver::Gesvd)?;
        let dos: Vec<f64> = s.iter().map(|&v| v * v / (2.0 * std::f64::consts::PI)).collect();
        Ok(scattering_state_reduce(self.n_elec(ei), dos, u, cutoff))
    }

    fn scattering_state_propagate(
        &self,
        ei: usize,
        cutoff_space: f64,
        cutoff: f64,
    ) -> Result<(Vec<f64>, Mat<C64>)> {
        let idx = self.pvt_dev(ei)?;
        let (blocks, g_diag) = self.green_diag_block(&idx)?;
        let gamma = self.data.borrow().as_ref().unwrap().gamma[ei].clone();
        let mut u = &(&g_diag * &gamma) * g_diag.adjoint();
        let n = u.nrows();
        for i in 0..n {
            u[(i, i)] += C64::new(0.1, 0.0);
        }
        let (mut dos, mut u) = linalg::eigh_destroy(u)?;
        for d in dos.iter_mut() {
            *d = (*d - 0.1) / (2.0 * std::f64::consts::PI);
        }
        let (dos, u_reduced) = scattering_state_reduce(self.n_elec(ei), dos, u, cutoff_space);
        let scale = faer::Col::<C64>::from_fn(dos.len(), |i| C64::from(signsqrt(dos[i] * 2.0 * std::f64::consts::PI)));
        u = &u_reduced * scale.as_diagonal();

        let btd = self.pivot.btd();
        let nb = btd.len();
        let cum = &self.cum_btd;
        let r0 = blocks[0];
        let r1 = *blocks.last().unwrap();

        let ncols = u.ncols();
        let mut blockwise: Vec<Mat<C64>> = vec![Mat::<C64>::zeros(0, ncols); nb];
        let region_n = cum[r1 + 1] - cum[r0];
        let _ = region_n;
        if blocks.len() == 1 {
            blockwise[r0] = u.clone();
        } else {
            blockwise[r0] = u.submatrix(0, 0, btd[r0], ncols).to_owned();
            blockwise[r1] = u.submatrix(btd[r0], 0, btd[r1], ncols).to_owned();
        }

        let data_ref = self.data.borrow();
        let data = data_ref.as_ref().unwrap();
        for b in (0..r0).rev() {
            let tile = data.t_y[b + 1].as_ref().unwrap() * faer::Scale(C64::new(-1.0, 0.0)) * &blockwise[b + 1];
            blockwise[b] = tile;
        }
        for b in (r1 + 1)..nb {
            let tile = data.t_x[b - 1].as_ref().unwrap() * faer::Scale(C64::new(-1.0, 0.0)) * &blockwise[b - 1];
            blockwise[b] = tile;
        }
        drop(data_ref);

        let full_n = self.num_orbitals();
        let mut full_u = Mat::<C64>::zeros(full_n, ncols);
        for b in 0..nb {
            full_u
                .as_mut()
                .submatrix_mut(cum[b], 0, btd[b], ncols)
                .copy_from(blockwise[b].as_ref());
        }

        let (uu, s, _vh) = linalg::svd_destroy(full_u, linalg::SvdDriver::Gesvd)?;
        let dos: Vec<f64> = s.iter().map(|&v| v * v / (2.0 * std::f64::consts::PI)).collect();
        Ok(scattering_state_reduce(self.n_elec(ei), dos, uu, cutoff))
    }
}
