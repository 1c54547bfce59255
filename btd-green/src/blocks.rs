//! Block-tridiagonal container (spec §4.2), a dense matrix stored as a
//! sparse dictionary of `(block_row, block_col) -> tile` entries.
//!
//! Grounded on `BlockMatrix`/`BlockMatrixIndexer` in
//! `original_source/toolbox/btd/_btd.py`; `tile_shape`/`get`/`set` play
//! the role of `BlockMatrixIndexer.__getitem__`/`__setitem__`.

use std::collections::HashMap;

use faer::Mat;

use crate::error::{Error, Result};
use crate::linalg::C64;

/// A logically dense matrix stored as a map from block-index pair to
/// dense tile. Missing entries are implicitly zero.
#[derive(Debug, Clone)]
pub struct BlockMatrix {
    blocks: Vec<usize>,
    tiles: HashMap<(usize, usize), Mat<C64>>,
}

impl BlockMatrix {
    pub fn new(blocks: Vec<usize>) -> Self {
        BlockMatrix {
            blocks,
            tiles: HashMap::new(),
        }
    }

    pub fn blocks(&self) -> &[usize] {
        &self.blocks
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    fn check_index(&self, i: usize, j: usize) -> Result<()> {
        if i >= self.blocks.len() || j >= self.blocks.len() {
            return Err(Error::invalid(format!(
                "BlockMatrix index ({i}, {j}) out of range for {} blocks",
                self.blocks.len()
            )));
        }
        Ok(())
    }

    /// Fetch tile `(i, j)`, returning a zero tile of the correct shape if
    /// absent.
    pub fn get(&self, i: usize, j: usize) -> Result<Mat<C64>> {
        self.check_index(i, j)?;
        Ok(match self.tiles.get(&(i, j)) {
            Some(m) => m.clone(),
            None => Mat::<C64>::zeros(self.blocks[i], self.blocks[j]),
        })
    }

    /// Set tile `(i, j)`. The tile's shape is trusted to be
    /// `blocks[i] x blocks[j]`; this is an internal-use container, not a
    /// validated public API surface in the original either.
    pub fn set(&mut self, i: usize, j: usize, tile: Mat<C64>) -> Result<()> {
        self.check_index(i, j)?;
        self.tiles.insert((i, j), tile);
        Ok(())
    }

    fn offsets(&self) -> Vec<usize> {
        let mut offsets = Vec::with_capacity(self.blocks.len() + 1);
        let mut acc = 0;
        offsets.push(0);
        for &b in &self.blocks {
            acc += b;
            offsets.push(acc);
        }
        offsets
    }

    /// Dense materialization of the full matrix.
    pub fn toarray(&self) -> Mat<C64> {
        let offsets = self.offsets();
        let n = *offsets.last().unwrap_or(&0);
        let mut out = Mat::<C64>::zeros(n, n);
        for i in 0..self.blocks.len() {
            for j in 0..self.blocks.len() {
                if let Some(tile) = self.tiles.get(&(i, j)) {
                    out.as_mut()
                        .submatrix_mut(offsets[i], offsets[j], self.blocks[i], self.blocks[j])
                        .copy_from(tile);
                }
            }
        }
        out
    }

    /// Retain only tiles on the main diagonal and the two adjacent
    /// diagonals (`|i - j| <= 1`).
    pub fn tobtd(&self) -> BlockMatrix {
        let mut ret = BlockMatrix::new(self.blocks.clone());
        for (&(i, j), tile) in &self.tiles {
            if i.abs_diff(j) <= 1 {
                ret.tiles.insert((i, j), tile.clone());
            }
        }
        ret
    }

    /// Build a `BlockMatrix` by slicing the `|i-j| <= 1` tiles out of an
    /// already-dense matrix laid out according to `blocks`' offsets.
    /// Used to project a densely-propagated spectral matrix down to its
    /// block-tridiagonal representation (spec §9's "(b) implement as
    /// `_spectral_propagate` followed by tridiagonal projection").
    pub fn from_dense_tobtd(dense: faer::MatRef<C64>, blocks: Vec<usize>) -> BlockMatrix {
        let mut ret = BlockMatrix::new(blocks);
        let offsets = ret.offsets();
        let nb = ret.blocks.len();
        for i in 0..nb {
            for j in i.saturating_sub(1)..=(i + 1).min(nb - 1) {
                let tile = dense
                    .submatrix(offsets[i], offsets[j], ret.blocks[i], ret.blocks[j])
                    .to_owned();
                ret.tiles.insert((i, j), tile);
            }
        }
        ret
    }

    /// Concatenation of the diagonal tiles' own diagonals.
    pub fn diagonal(&self) -> Result<Vec<C64>> {
        let mut out = Vec::new();
        for b in 0..self.blocks.len() {
            let tile = self.get(b, b)?;
            let d = tile.nrows().min(tile.ncols());
            for i in 0..d {
                out.push(tile[(i, i)]);
            }
        }
        Ok(out)
    }
}
