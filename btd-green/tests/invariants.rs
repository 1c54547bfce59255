//! Cross-module invariants (testable properties): Γ Hermiticity, the
//! spectral function's Hermiticity, agreement between the `column` and
//! `propagate` spectral methods, the block-tridiagonal pattern agreement
//! between `green(format=array)` and `green(format=btd)`, and the
//! downfolding Schur reduction.

use std::collections::HashMap;

use btd_green::hamiltonian::{CsrHamiltonian, Geometry};
use btd_green::pivot::{ElectrodeInfo, InMemoryPivot, Pivot, SemiInfiniteDirection};
use btd_green::self_energy::{se2scat, OpaqueSigmaSolver, PivotSelfEnergy, SelfEnergyKind, SelfEnergyProvider};
use btd_green::{DeviceGreen, GreenFormat, SpectralFormat, SpectralMethod, C64};
use faer::Mat;

struct ConstSigma(Mat<C64>);
impl OpaqueSigmaSolver for ConstSigma {
    fn sigma(&self, _e: C64, _k: [f64; 3]) -> btd_green::Result<Mat<C64>> {
        Ok(self.0.clone())
    }
}

fn electrode_info(pivot_full: Vec<usize>) -> ElectrodeInfo {
    ElectrodeInfo {
        pivot_full: pivot_full.clone(),
        pivot_down: pivot_full,
        btd_down: vec![1],
        atoms: vec![0],
        mu: 0.0,
        eta: 1e-4,
        direction: SemiInfiniteDirection::MinusA,
        bloch: (1, 1, 1),
        bulk: false,
    }
}

/// A 1-D tight-binding chain of `n` single-orbital sites, nearest-neighbor
/// hopping `-1`, orthogonal overlap.
fn chain(n: usize) -> CsrHamiltonian {
    let geometry = Geometry::new(&vec![1; n]);
    let mut h_triplets = Vec::new();
    let mut s_triplets = Vec::new();
    for i in 0..n {
        s_triplets.push((i, i, C64::new(1.0, 0.0)));
        if i + 1 < n {
            h_triplets.push((i, i + 1, C64::new(-1.0, 0.0)));
            h_triplets.push((i + 1, i, C64::new(-1.0, 0.0)));
        }
    }
    let h0 = btd_green::hamiltonian::Csr::from_triplets(n, n, &h_triplets);
    let s0 = btd_green::hamiltonian::Csr::from_triplets(n, n, &s_triplets);
    CsrHamiltonian::new(geometry, [1, 1, 1], vec![([0, 0, 0], h0, s0)])
}

/// A 12-orbital, 3-block (4 each) chain with electrodes `L` (orbital 0)
/// and `R` (orbital 11), each with a constant, energy-independent
/// broadening `gamma0`.
fn two_electrode_chain(gamma0: f64) -> DeviceGreen<CsrHamiltonian> {
    let h = chain(12);
    let pivot: Vec<usize> = (0..12).collect();
    let mut electrodes = HashMap::new();
    electrodes.insert("L".to_string(), electrode_info(vec![0]));
    electrodes.insert("R".to_string(), electrode_info(vec![11]));
    let pivot = InMemoryPivot::new(pivot, vec![4, 4, 4], electrodes).unwrap();

    let sigma = Mat::<C64>::from_fn(1, 1, |_, _| C64::new(0.0, -gamma0 / 2.0));
    let l = PivotSelfEnergy::new(
        "L",
        &pivot,
        SelfEnergyKind::Live,
        Box::new(ConstSigma(sigma.clone())),
    )
    .unwrap();
    let r = PivotSelfEnergy::new("R", &pivot, SelfEnergyKind::Live, Box::new(ConstSigma(sigma))).unwrap();

    DeviceGreen::new(
        h,
        Box::new(pivot),
        vec![("L".to_string(), Box::new(l) as _), ("R".to_string(), Box::new(r) as _)],
    )
}

fn hermiticity_defect(m: &Mat<C64>) -> f64 {
    (m - m.adjoint().to_owned()).norm_l2()
}

#[test]
fn gamma_is_hermitian_for_any_self_energy() {
    let se = Mat::<C64>::from_fn(3, 3, |i, j| C64::new((i + 1) as f64 * 0.7, (j as f64 - 1.0) * 1.3));
    let gamma = se2scat(&se);
    assert!(hermiticity_defect(&gamma) < 1e-10);
}

#[test]
fn spectral_function_is_hermitian() {
    let dg = two_electrode_chain(0.2);
    let e = C64::new(0.1, 1e-4);
    let k = [0.0, 0.0, 0.0];
    let a = dg
        .spectral("L", e, k, SpectralFormat::Array, SpectralMethod::Column, false)
        .unwrap()
        .into_array()
        .unwrap();
    let norm = a.norm_l2();
    assert!(hermiticity_defect(&a) <= 1e-8 * norm.max(1.0));
}

#[test]
fn spectral_column_and_propagate_methods_agree() {
    let dg = two_electrode_chain(0.3);
    let e = C64::new(0.2, 1e-4);
    let k = [0.0, 0.0, 0.0];
    let a_col = dg
        .spectral("L", e, k, SpectralFormat::Array, SpectralMethod::Column, false)
        .unwrap()
        .into_array()
        .unwrap();
    let a_prop = dg
        .spectral("L", e, k, SpectralFormat::Array, SpectralMethod::Propagate, false)
        .unwrap()
        .into_array()
        .unwrap();
    let diff = (&a_col - &a_prop).norm_l2();
    assert!(diff <= 1e-8 * a_col.norm_l2().max(1.0), "diff={diff}");
}

#[test]
fn green_array_and_btd_agree_on_tridiagonal_pattern() {
    let dg = two_electrode_chain(0.15);
    let e = C64::new(0.05, 1e-4);
    let k = [0.0, 0.0, 0.0];
    let array = dg.green(e, k, GreenFormat::Array).unwrap().into_array().unwrap();
    let btd = dg.green(e, k, GreenFormat::Btd).unwrap().into_block_matrix().unwrap();

    let blocks = dg.pivot().btd().to_vec();
    let mut offsets = vec![0usize];
    for &b in &blocks {
        offsets.push(offsets.last().unwrap() + b);
    }

    for i in 0..blocks.len() {
        for j in 0..blocks.len() {
            if i.abs_diff(j) > 1 {
                continue;
            }
            let expected = array.submatrix(offsets[i], offsets[j], blocks[i], blocks[j]).to_owned();
            let got = btd.get(i, j).unwrap();
            let diff = (&expected - &got).norm_l2();
            assert!(diff < 1e-8, "block ({i},{j}) mismatch: {diff}");
        }
    }
}

#[test]
fn downfolding_is_the_schur_complement_of_the_shifted_chain() {
    use btd_green::downfold::{DownfoldSelfEnergy, IdentityBloch};

    let geometry = Geometry::new(&[1, 1]);
    let h0 = btd_green::hamiltonian::Csr::from_triplets(
        2,
        2,
        &[
            (0, 0, C64::new(1.0, 0.0)),
            (1, 1, C64::new(2.0, 0.0)),
            (0, 1, C64::new(0.3, 0.1)),
            (1, 0, C64::new(0.3, -0.1)),
        ],
    );
    let s0 = btd_green::hamiltonian::Csr::from_triplets(
        2,
        2,
        &[(0, 0, C64::new(1.0, 0.0)), (1, 1, C64::new(1.0, 0.0))],
    );
    let h_down = CsrHamiltonian::new(geometry, [1, 1, 1], vec![([0, 0, 0], h0, s0)]);

    let mut electrodes = HashMap::new();
    electrodes.insert(
        "L".to_string(),
        ElectrodeInfo {
            pivot_full: vec![0],
            pivot_down: vec![0, 1],
            btd_down: vec![1, 1],
            atoms: vec![0],
            mu: 0.0,
            eta: 1e-4,
            direction: SemiInfiniteDirection::MinusA,
            bloch: (1, 1, 1),
            bulk: false,
        },
    );
    let pivot = InMemoryPivot::new(vec![0, 1], vec![1, 1], electrodes).unwrap();

    let sigma0 = Mat::<C64>::from_fn(1, 1, |_, _| C64::new(0.05, -0.02));
    let inner = PivotSelfEnergy::new(
        "L",
        &pivot,
        SelfEnergyKind::Live,
        Box::new(ConstSigma(sigma0.clone())),
    )
    .unwrap();

    let downfold = DownfoldSelfEnergy::new(
        "L",
        &pivot,
        inner,
        h_down.clone(),
        h_down,
        false,
        Box::new(IdentityBloch),
    )
    .unwrap();

    let e = C64::new(0.2, 1e-4);
    let k = [0.0, 0.0, 0.0];
    let got = downfold.self_energy(e, k).unwrap();

    // Manual Schur complement: M = E*S - H, M[0,0] -= sigma0, then
    // M10 * (M00')^-1 * M01.
    let m00 = e * C64::new(1.0, 0.0) - C64::new(1.0, 0.0) - sigma0[(0, 0)];
    let m01 = C64::new(0.0, 0.0) - C64::new(0.3, 0.1);
    let m10 = C64::new(0.0, 0.0) - C64::new(0.3, -0.1);
    let expected = m10 * (m01 / m00);
    let diff = (got[(0, 0)] - expected).norm();
    assert!(diff < 1e-10, "diff={diff}");
}
