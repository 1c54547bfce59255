//! Benchmarks for the BTD recurrences on a multi-block tight-binding
//! chain: `green` in `array` vs `btd` format, and `spectral` in its
//! `column` vs `propagate` methods, mirroring the fixtures in
//! `tests/invariants.rs`.

use std::collections::HashMap;
use std::hint::black_box;

use btd_green::hamiltonian::{Csr, CsrHamiltonian, Geometry};
use btd_green::pivot::{ElectrodeInfo, InMemoryPivot, SemiInfiniteDirection};
use btd_green::self_energy::{OpaqueSigmaSolver, PivotSelfEnergy, SelfEnergyKind};
use btd_green::{DeviceGreen, GreenFormat, SpectralFormat, SpectralMethod, C64};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
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
/// hopping `-1`, orthogonal overlap, tiled into `n_blocks` equal BTD blocks.
fn chain_device(n: usize, n_blocks: usize, gamma0: f64) -> DeviceGreen<CsrHamiltonian> {
    assert_eq!(n % n_blocks, 0);
    let block = n / n_blocks;

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
    let h0 = Csr::from_triplets(n, n, &h_triplets);
    let s0 = Csr::from_triplets(n, n, &s_triplets);
    let h = CsrHamiltonian::new(geometry, [1, 1, 1], vec![([0, 0, 0], h0, s0)]);

    let pivot: Vec<usize> = (0..n).collect();
    let mut electrodes = HashMap::new();
    electrodes.insert("L".to_string(), electrode_info(vec![0]));
    electrodes.insert("R".to_string(), electrode_info(vec![n - 1]));
    let pivot = InMemoryPivot::new(pivot, vec![block; n_blocks], electrodes).unwrap();

    let sigma = Mat::<C64>::from_fn(1, 1, |_, _| C64::new(0.0, -gamma0 / 2.0));
    let l = PivotSelfEnergy::new("L", &pivot, SelfEnergyKind::Live, Box::new(ConstSigma(sigma.clone()))).unwrap();
    let r = PivotSelfEnergy::new("R", &pivot, SelfEnergyKind::Live, Box::new(ConstSigma(sigma))).unwrap();

    DeviceGreen::new(
        h,
        Box::new(pivot),
        vec![("L".to_string(), Box::new(l) as _), ("R".to_string(), Box::new(r) as _)],
    )
}

fn bench_green(c: &mut Criterion) {
    let mut group = c.benchmark_group("green");
    for &n_blocks in &[4usize, 8, 16] {
        let dg = chain_device(n_blocks * 8, n_blocks, 0.2);
        let e = C64::new(0.1, 1e-4);
        let k = [0.0, 0.0, 0.0];

        group.bench_with_input(BenchmarkId::new("array", n_blocks), &n_blocks, |b, _| {
            b.iter(|| black_box(dg.green(e, k, GreenFormat::Array).unwrap()));
        });
        group.bench_with_input(BenchmarkId::new("btd", n_blocks), &n_blocks, |b, _| {
            b.iter(|| black_box(dg.green(e, k, GreenFormat::Btd).unwrap()));
        });
    }
    group.finish();
}

fn bench_spectral(c: &mut Criterion) {
    let mut group = c.benchmark_group("spectral");
    let dg = chain_device(64, 8, 0.2);
    let e = C64::new(0.1, 1e-4);
    let k = [0.0, 0.0, 0.0];

    group.bench_function("column", |b| {
        b.iter(|| {
            black_box(
                dg.spectral("L", e, k, SpectralFormat::Array, SpectralMethod::Column, false)
                    .unwrap(),
            )
        });
    });
    group.bench_function("propagate", |b| {
        b.iter(|| {
            black_box(
                dg.spectral("L", e, k, SpectralFormat::Array, SpectralMethod::Propagate, false)
                    .unwrap(),
            )
        });
    });
    group.finish();
}

criterion_group!(benches, bench_green, bench_spectral);
criterion_main!(benches);
