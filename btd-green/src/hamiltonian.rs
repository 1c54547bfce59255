//! Sparse `H(k)`/`S(k)` provider trait and a small in-memory
//! implementation (spec §3, §6 "Hamiltonian provider").
//!
//! Real Hamiltonian/overlap I/O (TBtrans `.TSHS`/`.nc` files) is an
//! out-of-scope external collaborator per spec §1; [`CsrHamiltonian`] is
//! the in-memory fixture this crate's own tests and examples build
//! against, and the shape any real parser's output must be converted
//! into to satisfy [`HamiltonianProvider`].

use std::collections::BTreeSet;

use faer::Mat;

use crate::error::{Error, Result};
use crate::linalg::C64;

/// A complex sparse matrix in compressed-sparse-row form.
#[derive(Debug, Clone)]
pub struct Csr {
    nrows: usize,
    ncols: usize,
    indptr: Vec<usize>,
    indices: Vec<usize>,
    data: Vec<C64>,
}

impl Csr {
    pub fn from_triplets(nrows: usize, ncols: usize, triplets: &[(usize, usize, C64)]) -> Self {
        let mut rows: Vec<Vec<(usize, C64)>> = vec![Vec::new(); nrows];
        for &(r, c, v) in triplets {
            rows[r].push((c, v));
        }
        let mut indptr = Vec::with_capacity(nrows + 1);
        let mut indices = Vec::new();
        let mut data = Vec::new();
        indptr.push(0);
        for row in rows.iter_mut() {
            row.sort_by_key(|&(c, _)| c);
            for (c, v) in row.drain(..) {
                indices.push(c);
                data.push(v);
            }
            indptr.push(indices.len());
        }
        Csr {
            nrows,
            ncols,
            indptr,
            indices,
            data,
        }
    }

    pub fn nrows(&self) -> usize {
        self.nrows
    }

    pub fn ncols(&self) -> usize {
        self.ncols
    }

    pub fn get(&self, i: usize, j: usize) -> C64 {
        let start = self.indptr[i];
        let end = self.indptr[i + 1];
        for idx in start..end {
            if self.indices[idx] == j {
                return self.data[idx];
            }
        }
        C64::new(0.0, 0.0)
    }

    pub fn to_dense(&self) -> Mat<C64> {
        Mat::<C64>::from_fn(self.nrows, self.ncols, |i, j| self.get(i, j))
    }

    /// Dense `M[pivot, :][:, pivot]`: reorder and restrict rows/columns
    /// by the pivot permutation, matching `inv_G[self.pvt, :][:, self.pvt]`
    /// in the Python reference.
    pub fn pivot_dense(&self, pivot: &[usize]) -> Mat<C64> {
        Mat::<C64>::from_fn(pivot.len(), pivot.len(), |i, j| self.get(pivot[i], pivot[j]))
    }

    /// The (row, col) index pattern, used by `green(format = sparse)` to
    /// restrict fill-in to the same sparsity pattern as `S(k)` pivoted.
    pub fn pattern(&self) -> Vec<(usize, usize)> {
        let mut out = Vec::with_capacity(self.data.len());
        for i in 0..self.nrows {
            for idx in self.indptr[i]..self.indptr[i + 1] {
                out.push((i, self.indices[idx]));
            }
        }
        out
    }

    pub fn indptr(&self) -> &[usize] {
        &self.indptr
    }

    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    pub fn data(&self) -> &[C64] {
        &self.data
    }
}

/// Orbital <-> atom bookkeeping (spec §6: `H.geometry.o2a`/`a2o`).
#[derive(Debug, Clone)]
pub struct Geometry {
    /// `orbital_atom[o]` is the atom index orbital `o` belongs to.
    orbital_atom: Vec<usize>,
    /// `atom_orbitals[a] = (first_orbital, count)`.
    atom_orbitals: Vec<(usize, usize)>,
}

impl Geometry {
    pub fn new(orbitals_per_atom: &[usize]) -> Self {
        let mut orbital_atom = Vec::new();
        let mut atom_orbitals = Vec::with_capacity(orbitals_per_atom.len());
        let mut offset = 0;
        for (a, &n) in orbitals_per_atom.iter().enumerate() {
            atom_orbitals.push((offset, n));
            for _ in 0..n {
                orbital_atom.push(a);
            }
            offset += n;
        }
        Geometry {
            orbital_atom,
            atom_orbitals,
        }
    }

    pub fn num_orbitals(&self) -> usize {
        self.orbital_atom.len()
    }

    pub fn num_atoms(&self) -> usize {
        self.atom_orbitals.len()
    }

    /// Unique, sorted atom indices hosting the given orbitals.
    pub fn o2a(&self, orbitals: &[usize]) -> Vec<usize> {
        let set: BTreeSet<usize> = orbitals.iter().map(|&o| self.orbital_atom[o]).collect();
        set.into_iter().collect()
    }

    /// All orbitals (sorted) belonging to the given atoms.
    pub fn a2o(&self, atoms: &[usize]) -> Vec<usize> {
        let mut out = Vec::new();
        for &a in atoms {
            let (start, n) = self.atom_orbitals[a];
            out.extend(start..start + n);
        }
        out.sort_unstable();
        out.dedup();
        out
    }
}

/// A lattice direction along which a Hamiltonian may carry periodic
/// images, used by `set_nsc` to sever couplings along a semi-infinite
/// electrode direction (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    A,
    B,
    C,
}

impl Axis {
    fn index(self) -> usize {
        match self {
            Axis::A => 0,
            Axis::B => 1,
            Axis::C => 2,
        }
    }
}

/// Abstract `H(k)`, `S(k)` provider (spec §6). A real implementation
/// reads these from a TBtrans/HSX file; [`CsrHamiltonian`] is the
/// in-memory fixture used by this crate's own tests.
pub trait HamiltonianProvider {
    fn hk(&self, k: [f64; 3]) -> Result<Csr>;
    fn sk(&self, k: [f64; 3]) -> Result<Csr>;
    fn num_orbitals(&self) -> usize;
}

/// A real-space tight-binding Hamiltonian/overlap pair: `H_R`, `S_R` for
/// each lattice vector `R`, Bloch-summed into `H(k) = sum_R H_R
/// exp(2 pi i k.R)` on request. This is the conventional periodic
/// tight-binding convention used throughout the sisl/TBtrans ecosystem
/// this spec is drawn from.
#[derive(Debug, Clone)]
pub struct CsrHamiltonian {
    n: usize,
    geometry: Geometry,
    /// Supercell coupling range along each axis, `(na, nb, nc)`; each is
    /// an odd count `2*r+1` of unit cells (including R=0) the
    /// Hamiltonian couples to along that axis.
    nsc: [usize; 3],
    hoppings: Vec<([i32; 3], Csr, Csr)>,
}

impl CsrHamiltonian {
    pub fn new(
        geometry: Geometry,
        nsc: [usize; 3],
        hoppings: Vec<([i32; 3], Csr, Csr)>,
    ) -> Self {
        let n = geometry.num_orbitals();
        CsrHamiltonian {
            n,
            geometry,
            nsc,
            hoppings,
        }
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    pub fn nsc(&self) -> [usize; 3] {
        self.nsc
    }

    /// Kill couplings along `axis` beyond the `n`-cell range (spec §6:
    /// `H.set_nsc(axis, 1)` removes all periodic images along `axis`,
    /// leaving only the R=0 block, to prevent fake self-coupling once an
    /// electrode's semi-infinite direction is folded into a finite
    /// downfolding chain).
    pub fn set_nsc(&mut self, axis: Axis, n: usize) {
        let idx = axis.index();
        self.nsc[idx] = n;
        let max_r = (n as i32 - 1) / 2;
        self.hoppings.retain(|(r, _, _)| r[idx].abs() <= max_r);
    }

    /// Shift all onsite (R=0) energies by `mu` (chemical potential
    /// alignment, spec §6 `H.shift(mu)`).
    pub fn shift(&mut self, mu: f64) {
        for (r, h, _s) in self.hoppings.iter_mut() {
            if *r == [0, 0, 0] {
                let mut triplets: Vec<(usize, usize, C64)> = h.pattern().iter().map(|&(i, j)| (i, j, h.get(i, j))).collect();
                for t in triplets.iter_mut() {
                    if t.0 == t.1 {
                        t.2 += C64::from(mu);
                    }
                }
                for i in 0..self.n {
                    if !triplets.iter().any(|&(r, c, _)| r == i && c == i) {
                        triplets.push((i, i, C64::from(mu)));
                    }
                }
                *h = Csr::from_triplets(self.n, self.n, &triplets);
            }
        }
    }

    /// Restrict this Hamiltonian to the orbitals of `atoms`, renumbering
    /// orbitals consecutively in `atoms` order (spec §6 `H.sub(atoms)`,
    /// used by `DownfoldSelfEnergy` to build the downfolding-region
    /// device sub-Hamiltonian).
    pub fn sub(&self, atoms: &[usize]) -> Result<CsrHamiltonian> {
        let orbitals = self.geometry.a2o(atoms);
        let orbitals_per_atom: Vec<usize> = atoms
            .iter()
            .map(|&a| self.geometry.atom_orbitals[a].1)
            .collect();
        let sub_geometry = Geometry::new(&orbitals_per_atom);

        let mut old_to_new = vec![None; self.n];
        for (new_idx, &old_idx) in orbitals.iter().enumerate() {
            old_to_new[old_idx] = Some(new_idx);
        }

        let mut hoppings = Vec::new();
        for (r, h, s) in &self.hoppings {
            let mut h_triplets = Vec::new();
            let mut s_triplets = Vec::new();
            for &(i, j) in &h.pattern() {
                if let (Some(ni), Some(nj)) = (old_to_new[i], old_to_new[j]) {
                    h_triplets.push((ni, nj, h.get(i, j)));
                }
            }
            for &(i, j) in &s.pattern() {
                if let (Some(ni), Some(nj)) = (old_to_new[i], old_to_new[j]) {
                    s_triplets.push((ni, nj, s.get(i, j)));
                }
            }
            if !h_triplets.is_empty() || !s_triplets.is_empty() {
                hoppings.push((
                    *r,
                    Csr::from_triplets(orbitals.len(), orbitals.len(), &h_triplets),
                    Csr::from_triplets(orbitals.len(), orbitals.len(), &s_triplets),
                ));
            }
        }

        Ok(CsrHamiltonian::new(sub_geometry, self.nsc, hoppings))
    }

    fn bloch_sum(&self, k: [f64; 3], select: impl Fn(&Csr, &Csr) -> Csr) -> Csr {
        let mut triplets: Vec<(usize, usize, C64)> = Vec::new();
        for (r, h, s) in &self.hoppings {
            let phase = 2.0 * std::f64::consts::PI
                * (r[0] as f64 * k[0] + r[1] as f64 * k[1] + r[2] as f64 * k[2]);
            let factor = C64::new(phase.cos(), phase.sin());
            let m = select(h, s);
            for &(i, j) in &m.pattern() {
                triplets.push((i, j, m.get(i, j) * factor));
            }
        }
        // accumulate duplicate (i, j) contributions from distinct R
        let mut merged: std::collections::HashMap<(usize, usize), C64> = std::collections::HashMap::new();
        for (i, j, v) in triplets {
            *merged.entry((i, j)).or_insert(C64::new(0.0, 0.0)) += v;
        }
        let triplets: Vec<(usize, usize, C64)> =
            merged.into_iter().map(|((i, j), v)| (i, j, v)).collect();
        Csr::from_triplets(self.n, self.n, &triplets)
    }
}

impl HamiltonianProvider for CsrHamiltonian {
    fn hk(&self, k: [f64; 3]) -> Result<Csr> {
        Ok(self.bloch_sum(k, |h, _s| h.clone()))
    }

    fn sk(&self, k: [f64; 3]) -> Result<Csr> {
        Ok(self.bloch_sum(k, |_h, s| s.clone()))
    }

    fn num_orbitals(&self) -> usize {
        self.n
    }
}
