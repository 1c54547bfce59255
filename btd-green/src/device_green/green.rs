//! `green(E, k, format)` and the column/diagonal-block extraction
//! helpers it and `spectral`/`scattering_state` build on (spec §4.5).
//!
//! Ported from `_green_array`/`_green_btd`/`_green_bm`/`_green_sparse`/
//! `_green_diag_block`/`_green_column` in
//! `original_source/toolbox/btd/_btd.py`.

use faer::Mat;

use super::DeviceGreen;
use crate::blocks::BlockMatrix;
use crate::error::{Error, Result};
use crate::hamiltonian::{Csr, HamiltonianProvider};
use crate::linalg::{self, C64};

/// Output shape requested from [`DeviceGreen::green`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GreenFormat {
    Array,
    Btd,
    Bm,
    Sparse,
}

/// The dense-or-structured Green function result.
pub enum GreenResult {
    Array(Mat<C64>),
    Btd(BlockMatrix),
    Bm(BlockMatrix),
    Sparse(Csr),
}

impl GreenResult {
    pub fn into_array(self) -> Option<Mat<C64>> {
        match self {
            GreenResult::Array(m) => Some(m),
            _ => None,
        }
    }

    pub fn into_block_matrix(self) -> Option<BlockMatrix> {
        match self {
            GreenResult::Btd(m) | GreenResult::Bm(m) => Some(m),
            _ => None,
        }
    }

    pub fn into_sparse(self) -> Option<Csr> {
        match self {
            GreenResult::Sparse(m) => Some(m),
            _ => None,
        }
    }
}

impl<H: HamiltonianProvider> DeviceGreen<H> {
    /// `G(E,k) = [S(k)E - H(k) - sum Sigma(E,k)]^-1`, in the requested
    /// format.
    pub fn green(&self, e: C64, k: [f64; 3], format: GreenFormat) -> Result<GreenResult> {
        self.prepare(e, k)?;
        match format {
            GreenFormat::Array => Ok(GreenResult::Array(self.green_array()?)),
            GreenFormat::Btd => Ok(GreenResult::Btd(self.green_btd()?)),
            GreenFormat::Bm => Ok(GreenResult::Bm(self.green_bm()?)),
            GreenFormat::Sparse => Ok(GreenResult::Sparse(self.green_sparse()?)),
        }
    }

    fn diag_tile(&self, b: usize) -> Result<Mat<C64>> {
        let data_ref = self.data.borrow();
        let data = data_ref.as_ref().expect("prepare() called");
        let nb = data.a.len();
        let m = if b == 0 {
            if nb == 1 {
                data.a[0].clone()
            } else {
                &data.a[0] - data.c[1].as_ref().unwrap() * data.t_x[0].as_ref().unwrap()
            }
        } else if b == nb - 1 {
            &data.a[b] - data.b[b - 1].as_ref().unwrap() * data.t_y[b].as_ref().unwrap()
        } else {
            &data.a[b]
                - data.b[b - 1].as_ref().unwrap() * data.t_y[b].as_ref().unwrap()
                - data.c[b + 1].as_ref().unwrap() * data.t_x[b].as_ref().unwrap()
        };
        linalg::inv_destroy(m)
    }

    fn green_array(&self) -> Result<Mat<C64>> {
        let n = self.num_orbitals();
        let mut g = Mat::<C64>::zeros(n, n);
        let btd = self.pivot.btd();
        let nb = btd.len();
        let cum = &self.cum_btd;

        for b in 0..nb {
            let g_bb = self.diag_tile(b)?;
            g.as_mut()
                .submatrix_mut(cum[b], cum[b], btd[b], btd[b])
                .copy_from(g_bb.as_ref());

            let data_ref = self.data.borrow();
            let data = data_ref.as_ref().unwrap();
            let mut prev = g_bb.clone();
            for a in (0..b).rev() {
                let tile = data.t_y[a + 1].as_ref().unwrap() * faer::Scale(C64::new(-1.0, 0.0)) * &prev;
                g.as_mut()
                    .submatrix_mut(cum[a], cum[b], btd[a], btd[b])
                    .copy_from(tile.as_ref());
                prev = tile;
            }
            let mut prev = g_bb;
            for a in (b + 1)..nb {
                let tile = data.t_x[a - 1].as_ref().unwrap() * faer::Scale(C64::new(-1.0, 0.0)) * &prev;
                g.as_mut()
                    .submatrix_mut(cum[a], cum[b], btd[a], btd[b])
                    .copy_from(tile.as_ref());
                prev = tile;
            }
        }
        Ok(g)
    }

    fn green_btd(&self) -> Result<BlockMatrix> {
        let btd = self.pivot.btd().to_vec();
        let nb = btd.len();
        let mut g = BlockMatrix::new(btd);
        for b in 0..nb {
            let g_bb = self.diag_tile(b)?;
            let data_ref = self.data.borrow();
            let data = data_ref.as_ref().unwrap();
            if b > 0 {
                let above = data.t_y[b].as_ref().unwrap() * faer::Scale(C64::new(-1.0, 0.0)) * &g_bb;
                g.set(b - 1, b, above)?;
            }
            if b < nb - 1 {
                let below = data.t_x[b].as_ref().unwrap() * faer::Scale(C64::new(-1.0, 0.0)) * &g_bb;
                g.set(b + 1, b, below)?;
            }
            drop(data_ref);
            g.set(b, b, g_bb)?;
        }
        Ok(g)
    }

    fn green_bm(&self) -> Result<BlockMatrix> {
        let mut g = self.green_btd()?;
        let nb = self.pivot.btd().len();
        for b in 0..nb {
            let mut g0 = g.get(b, b)?;
            for bb in (1..=b).rev() {
                let data_ref = self.data.borrow();
                let data = data_ref.as_ref().unwrap();
                g0 = data.t_y[bb].as_ref().unwrap() * faer::Scale(C64::new(-1.0, 0.0)) * &g0;
                drop(data_ref);
                g.set(bb - 1, b, g0.clone())?;
            }
            let mut g0 = g.get(b, b)?;
            for bb in b..nb - 1 {
                let data_ref = self.data.borrow();
                let data = data_ref.as_ref().unwrap();
                g0 = data.t_x[bb].as_ref().unwrap() * faer::Scale(C64::new(-1.0, 0.0)) * &g0;
                drop(data_ref);
                g.set(bb + 1, b, g0.clone())?;
            }
        }
        Ok(g)
    }

    fn green_sparse(&self) -> Result<Csr> {
        let sk = self.h.sk(self.data.borrow().as_ref().unwrap().k)?;
        let pivot = self.pivot.pivot();
        let pattern_dense = sk.pivot_dense(pivot);
        let n = pivot.len();
        let mut triplets = Vec::new();
        for i in 0..n {
            for j in 0..n {
                if pattern_dense[(i, j)] != C64::new(0.0, 0.0) {
                    triplets.push((i, j, C64::new(0.0, 0.0)));
                }
            }
        }

        let dense = self.green_array()?;
        for t in triplets.iter_mut() {
            t.2 = dense[(t.0, t.1)];
        }
        Ok(Csr::from_triplets(n, n, &triplets))
    }

    /// Diagonal (and adjacent) block rows for `idx`, restricted to
    /// `idx` columns; `idx` must fall within at most two consecutive
    /// BTD blocks.
    pub(crate) fn green_diag_block(&self, idx: &[usize]) -> Result<(Vec<usize>, Mat<C64>)> {
        let (blocks, block_of, local_idx) = self.partition_idx(idx)?;
        let btd = self.pivot.btd();
        let n: usize = blocks.iter().map(|&b| btd[b]).sum();
        let mut g = Mat::<C64>::zeros(n, idx.len());

        let row_offset_of_block: std::collections::HashMap<usize, usize> = {
            let mut acc = 0;
            blocks
                .iter()
                .map(|&b| {
                    let off = acc;
                    acc += btd[b];
                    (b, off)
                })
                .collect()
        };

        for &b in &blocks {
            let g_bb = self.diag_tile(b)?;
            let cols: Vec<usize> = local_idx
                .iter()
                .zip(block_of.iter())
                .filter(|&(_, &bl)| bl == b)
                .map(|(&li, _)| li)
                .collect();
            let row_off = row_offset_of_block[&b];
            for (out_col, &src_col) in cols.iter().enumerate() {
                let dest_col = idx_position_for_block(&local_idx, &block_of, b, out_col);
                for r in 0..btd[b] {
                    g[(row_off + r, dest_col)] = g_bb[(r, src_col)];
                }
            }

            if blocks.len() == 1 {
                break;
            }
            let data_ref = self.data.borrow();
            let data = data_ref.as_ref().unwrap();
            if b == blocks[0] {
                let other_off = row_offset_of_block[&blocks[1]];
                let dest_cols: Vec<usize> = (0..idx.len())
                    .filter(|&c| block_of[c] == b)
                    .collect();
                if !dest_cols.is_empty() {
                    let src = g.submatrix(row_off, dest_cols[0], btd[b], dest_cols.len());
                    let propagated = data.t_x[b].as_ref().unwrap() * faer::Scale(C64::new(-1.0, 0.0)) * src;
                    for (i, &dc) in dest_cols.iter().enumerate() {
                        for r in 0..btd[blocks[1]] {
                            g[(other_off + r, dc)] = propagated[(r, i)];
                        }
                    }
                }
            } else {
                let other_off = row_offset_of_block[&blocks[0]];
                let dest_cols: Vec<usize> = (0..idx.len())
                    .filter(|&c| block_of[c] == b)
                    .collect();
                if !dest_cols.is_empty() {
                    let src = g.submatrix(row_off, dest_cols[0], btd[b], dest_cols.len());
                    let propagated = data.t_y[b].as_ref().unwrap() * faer::Scale(C64::new(-1.0, 0.0)) * src;
                    for (i, &dc) in dest_cols.iter().enumerate() {
                        for r in 0..btd[blocks[0]] {
                            g[(other_off + r, dc)] = propagated[(r, i)];
                        }
                    }
                }
            }
        }

        Ok((blocks, g))
    }

    /// Full Green-function columns for `idx` (spanning at most two
    /// consecutive BTD blocks): the diagonal-block columns, propagated
    /// up and down across every remaining block.
    pub(crate) fn green_column(&self, idx: &[usize]) -> Result<Mat<C64>> {
        let (blocks, _block_of, _local_idx) = self.partition_idx(idx)?;
        let (_, diag_g) = self.green_diag_block(idx)?;
        let btd = self.pivot.btd();
        let n = self.num_orbitals();
        let cum = &self.cum_btd;
        let mut g = Mat::<C64>::zeros(n, idx.len());

        g.as_mut()
            .submatrix_mut(cum[blocks[0]], 0, btd[blocks[0]], idx.len())
            .copy_from(diag_g.submatrix(0, 0, btd[blocks[0]], idx.len()));
        if blocks.len() > 1 {
            g.as_mut()
                .submatrix_mut(cum[blocks[1]], 0, btd[blocks[1]], idx.len())
                .copy_from(diag_g.submatrix(btd[blocks[0]], 0, btd[blocks[1]], idx.len()));
        }

        let data_ref = self.data.borrow();
        let data = data_ref.as_ref().unwrap();

        let mut slp = blocks[0];
        for b in (0..blocks[0]).rev() {
            let src = g.submatrix(cum[slp], 0, btd[slp], idx.len());
            let tile = data.t_y[b + 1].as_ref().unwrap() * faer::Scale(C64::new(-1.0, 0.0)) * src;
            g.as_mut()
                .submatrix_mut(cum[b], 0, btd[b], idx.len())
                .copy_from(tile.as_ref());
            slp = b;
        }

        let last = *blocks.last().unwrap();
        let mut slp = last;
        for b in (last + 1)..btd.len() {
            let src = g.submatrix(cum[slp], 0, btd[slp], idx.len());
            let tile = data.t_x[b - 1].as_ref().unwrap() * faer::Scale(C64::new(-1.0, 0.0)) * src;
            g.as_mut()
                .submatrix_mut(cum[b], 0, btd[b], idx.len())
                .copy_from(tile.as_ref());
            slp = b;
        }

        Ok(g)
    }

    /// Validate `idx` spans at most two consecutive BTD blocks and
    /// return `(blocks, block_of[i], local_index[i])` for each entry of
    /// `idx`.
    fn partition_idx(&self, idx: &[usize]) -> Result<(Vec<usize>, Vec<usize>, Vec<usize>)> {
        let btd = self.pivot.btd();
        let cum = &self.cum_btd;
        let block_for = |o: usize| -> usize {
            cum.windows(2).position(|w| o >= w[0] && o < w[1]).unwrap()
        };
        let mut block_of = Vec::with_capacity(idx.len());
        let mut local_idx = Vec::with_capacity(idx.len());
        for &o in idx {
            let b = block_for(o);
            block_of.push(b);
            local_idx.push(o - cum[b]);
        }
        let mut blocks: Vec<usize> = block_of.clone();
        blocks.sort_unstable();
        blocks.dedup();
        if blocks.len() > 2 || (blocks.len() == 2 && blocks[1] != blocks[0] + 1) {
            return Err(Error::invalid(
                "Green column/diag-block indices must span at most two consecutive BTD blocks",
            ));
        }
        let _ = btd;
        Ok((blocks, block_of, local_idx))
    }
}

/// Position of the `out_col`'th column (within block `b`) among `idx`'s
/// original column order.
fn idx_position_for_block(
    _local_idx: &[usize],
    block_of: &[usize],
    b: usize,
    out_col: usize,
) -> usize {
    block_of
        .iter()
        .enumerate()
        .filter(|&(_, &bl)| bl == b)
        .nth(out_col)
        .map(|(pos, _)| pos)
        .expect("out_col within range")
}
