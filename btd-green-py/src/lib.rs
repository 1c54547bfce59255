//! Python bindings for [`btd_green`]: device `H(k)`/`S(k)` and electrode
//! self-energies are supplied by Python callables, `DeviceGreen`'s public
//! surface (`green`/`spectral`/`scattering_state`/`eigenchannel`) comes
//! back out as numpy arrays/dicts.
//!
//! Structured the way `examples/SpinW-pySpinW/src/lib.rs` is structured:
//! one `lib.rs` of `#[pyclass]`/`#[pyfunction]` bindings over a pure-Rust
//! computation crate, using the same `faer_ext::IntoFaer` numpy-bridging
//! idiom for the numpy -> faer direction. The reverse direction (faer ->
//! numpy) is done by hand via `numpy::PyArray2::from_vec2` rather than a
//! `faer_ext` trait, since the teacher itself never demonstrates that
//! direction (its own `spinwave_calculation` only ever returns plain
//! `Vec<f64>` energies).

use std::collections::HashMap;
use std::sync::Arc;

use faer::{Mat, MatRef};
use faer_ext::IntoFaer;
use numpy::{PyArray1, PyArray2, PyReadonlyArray2, ToPyArray};
use pyo3::exceptions::{PyRuntimeError, PyValueError};
use pyo3::prelude::*;
use rayon::iter::{IntoParallelIterator, ParallelIterator};
use indicatif::ParallelProgressIterator;

use btd_green::builder::{DeviceGreenBuilder, SharedHamiltonian};
use btd_green::hamiltonian::{Csr, HamiltonianProvider};
use btd_green::pivot::{ElectrodeInfo, InMemoryPivot, Pivot, SemiInfiniteDirection};
use btd_green::self_energy::{se2scat, SelfEnergyProvider};
use btd_green::{
    DeviceGreen, Eigenchannel, Error as BtdError, GreenFormat, ScatteringMethod, ScatteringState,
    SpectralFormat, SpectralMethod, C64,
};

fn btd_err(e: BtdError) -> PyErr {
    PyRuntimeError::new_err(e.to_string())
}

fn pyerr_to_btd(e: PyErr) -> BtdError {
    BtdError::Config(e.to_string())
}

fn parse_format(s: &str) -> PyResult<GreenFormat> {
    match s {
        "array" => Ok(GreenFormat::Array),
        "btd" => Ok(GreenFormat::Btd),
        "bm" => Ok(GreenFormat::Bm),
        "sparse" => Ok(GreenFormat::Sparse),
        other => Err(PyValueError::new_err(format!("unknown green format {other:?}"))),
    }
}

fn parse_spectral_format(s: &str) -> PyResult<SpectralFormat> {
    match s {
        "array" => Ok(SpectralFormat::Array),
        "btd" => Ok(SpectralFormat::Btd),
        "bm" => Ok(SpectralFormat::Bm),
        other => Err(PyValueError::new_err(format!("unknown spectral format {other:?}"))),
    }
}

fn parse_spectral_method(s: &str) -> PyResult<SpectralMethod> {
    match s {
        "column" => Ok(SpectralMethod::Column),
        "propagate" => Ok(SpectralMethod::Propagate),
        other => Err(PyValueError::new_err(format!("unknown spectral method {other:?}"))),
    }
}

fn parse_scattering_method(s: &str) -> PyResult<ScatteringMethod> {
    match s {
        "full" => Ok(ScatteringMethod::Full),
        "svd" => Ok(ScatteringMethod::Svd),
        "propagate" => Ok(ScatteringMethod::Propagate),
        other => Err(PyValueError::new_err(format!("unknown scattering method {other:?}"))),
    }
}

fn parse_direction(s: &str) -> PyResult<SemiInfiniteDirection> {
    use SemiInfiniteDirection::*;
    match s {
        "+a" => Ok(PlusA),
        "-a" => Ok(MinusA),
        "+b" => Ok(PlusB),
        "-b" => Ok(MinusB),
        "+c" => Ok(PlusC),
        "-c" => Ok(MinusC),
        other => Err(PyValueError::new_err(format!(
            "semi-inf direction must be one of +a/-a/+b/-b/+c/-c, got {other:?}"
        ))),
    }
}

fn mat_to_pyarray(py: Python<'_>, m: &Mat<C64>) -> PyResult<Py<PyArray2<C64>>> {
    let rows: Vec<Vec<C64>> = (0..m.nrows())
        .map(|i| (0..m.ncols()).map(|j| m[(i, j)]).collect())
        .collect();
    Ok(PyArray2::from_vec2(py, &rows)
        .map_err(|e| PyValueError::new_err(e.to_string()))?
        .unbind())
}

/// Dense-matrix -> `Csr` conversion for whatever `H(k)`/`S(k)` a Python
/// `hk`/`sk` callback returns; drops exact zeros so the BTD tiling
/// (`Csr::pivot_dense`) still reflects real sparsity where the caller's
/// matrix has any.
fn dense_to_csr(m: MatRef<C64>) -> Csr {
    let mut triplets = Vec::with_capacity(m.nrows() * m.ncols());
    for i in 0..m.nrows() {
        for j in 0..m.ncols() {
            let v = m[(i, j)];
            if v != C64::new(0.0, 0.0) {
                triplets.push((i, j, v));
            }
        }
    }
    Csr::from_triplets(m.nrows(), m.ncols(), &triplets)
}

/// Adapts a Python object exposing `hk(k: list[float]) -> ndarray` and
/// `sk(k: list[float]) -> ndarray` (dense, `num_orbitals x num_orbitals`)
/// to [`HamiltonianProvider`]. `num_orbitals` is cached at construction
/// time rather than re-queried on every call.
#[pyclass(name = "Hamiltonian")]
struct PyHamiltonian {
    obj: Py<PyAny>,
    n: usize,
}

#[pymethods]
impl PyHamiltonian {
    #[new]
    fn new(obj: Py<PyAny>) -> PyResult<Self> {
        let n: usize = Python::with_gil(|py| obj.bind(py).call_method0("num_orbitals")?.extract())?;
        Ok(PyHamiltonian { obj, n })
    }
}

impl PyHamiltonian {
    fn call_dense(&self, method: &str, k: [f64; 3]) -> btd_green::Result<Csr> {
        Python::with_gil(|py| -> PyResult<Csr> {
            let obj = self.obj.bind(py);
            let arr = obj.call_method1(method, (k.to_vec(),))?;
            let ro: PyReadonlyArray2<C64> = arr.extract()?;
            Ok(dense_to_csr(ro.into_faer()))
        })
        .map_err(pyerr_to_btd)
    }
}

impl HamiltonianProvider for PyHamiltonian {
    fn hk(&self, k: [f64; 3]) -> btd_green::Result<Csr> {
        self.call_dense("hk", k)
    }

    fn sk(&self, k: [f64; 3]) -> btd_green::Result<Csr> {
        self.call_dense("sk", k)
    }

    fn num_orbitals(&self) -> usize {
        self.n
    }
}

/// Adapts a Python object exposing `self_energy(e_re, e_im, k) -> ndarray`
/// (and, optionally, `scattering_matrix`/`bloch_factors`) to
/// [`SelfEnergyProvider`] — the Python-side counterpart of the opaque
/// recursive surface-Green solver or precomputed-file reader spec §1
/// treats as an external collaborator.
#[pyclass(name = "SelfEnergy")]
#[derive(Clone)]
struct PySelfEnergy {
    obj: Py<PyAny>,
}

#[pymethods]
impl PySelfEnergy {
    #[new]
    fn new(obj: Py<PyAny>) -> Self {
        PySelfEnergy { obj }
    }
}

impl SelfEnergyProvider for PySelfEnergy {
    fn self_energy(&self, e: C64, k: [f64; 3]) -> btd_green::Result<Mat<C64>> {
        Python::with_gil(|py| -> PyResult<Mat<C64>> {
            let obj = self.obj.bind(py);
            let arr = obj.call_method1("self_energy", (e.re, e.im, k.to_vec()))?;
            let ro: PyReadonlyArray2<C64> = arr.extract()?;
            Ok(ro.into_faer().to_owned())
        })
        .map_err(pyerr_to_btd)
    }

    fn scattering_matrix(&self, e: C64, k: [f64; 3]) -> btd_green::Result<Mat<C64>> {
        let provided = Python::with_gil(|py| -> PyResult<Option<Mat<C64>>> {
            let obj = self.obj.bind(py);
            if obj.hasattr("scattering_matrix")? {
                let arr = obj.call_method1("scattering_matrix", (e.re, e.im, k.to_vec()))?;
                let ro: PyReadonlyArray2<C64> = arr.extract()?;
                Ok(Some(ro.into_faer().to_owned()))
            } else {
                Ok(None)
            }
        })
        .map_err(pyerr_to_btd)?;
        match provided {
            Some(gamma) => Ok(gamma),
            None => Ok(se2scat(&self.self_energy(e, k)?)),
        }
    }

    fn bloch_factors(&self) -> (usize, usize, usize) {
        Python::with_gil(|py| {
            let obj = self.obj.bind(py);
            obj.call_method0("bloch_factors")
                .ok()
                .and_then(|r| r.extract::<(usize, usize, usize)>().ok())
                .unwrap_or((1, 1, 1))
        })
    }
}

/// Per-electrode pivot metadata (spec §3), built from Python-side pivot
/// discovery (a TBtrans `.nc` pivot table or equivalent, out of scope
/// per spec §1 to parse here).
#[pyclass(name = "ElectrodeInfo")]
#[derive(Clone)]
struct PyElectrodeInfo {
    info: ElectrodeInfo,
}

#[pymethods]
impl PyElectrodeInfo {
    #[new]
    #[pyo3(signature = (pivot_full, pivot_down, btd_down, atoms, mu, eta, direction, bloch=(1, 1, 1), bulk=true))]
    fn new(
        pivot_full: Vec<usize>,
        pivot_down: Vec<usize>,
        btd_down: Vec<usize>,
        atoms: Vec<usize>,
        mu: f64,
        eta: f64,
        direction: &str,
        bloch: (usize, usize, usize),
        bulk: bool,
    ) -> PyResult<Self> {
        Ok(PyElectrodeInfo {
            info: ElectrodeInfo {
                pivot_full,
                pivot_down,
                btd_down,
                atoms,
                mu,
                eta,
                direction: parse_direction(direction)?,
                bloch,
                bulk,
            },
        })
    }
}

/// Device-wide pivot metadata (spec §3): the device orbital permutation,
/// its BTD block sizes, and one [`PyElectrodeInfo`] per electrode.
#[pyclass(name = "Pivot")]
#[derive(Clone)]
struct PyPivot {
    inner: Arc<InMemoryPivot>,
}

#[pymethods]
impl PyPivot {
    #[new]
    fn new(pivot: Vec<usize>, btd: Vec<usize>, electrodes: Vec<(String, PyElectrodeInfo)>) -> PyResult<Self> {
        let electrodes: HashMap<String, ElectrodeInfo> =
            electrodes.into_iter().map(|(name, e)| (name, e.info)).collect();
        let inner = InMemoryPivot::new(pivot, btd, electrodes).map_err(btd_err)?;
        Ok(PyPivot { inner: Arc::new(inner) })
    }

    fn num_orbitals(&self) -> usize {
        self.inner.pivot().len()
    }

    fn electrode_names(&self) -> Vec<String> {
        self.inner.electrode_names().into_iter().map(str::to_string).collect()
    }
}

/// Transmission eigenchannels (spec §4.5), returned from
/// [`PyDeviceGreen::eigenchannel`].
#[pyclass(name = "Eigenchannel")]
struct PyEigenchannel {
    inner: Eigenchannel,
}

#[pymethods]
impl PyEigenchannel {
    #[getter]
    fn transmission<'py>(&self, py: Python<'py>) -> Bound<'py, PyArray1<f64>> {
        self.inner.transmission.to_pyarray(py)
    }

    #[getter]
    fn state(&self, py: Python<'_>) -> PyResult<Py<PyArray2<C64>>> {
        mat_to_pyarray(py, &self.inner.state)
    }
}

/// A scattering-state result (spec §4.5), returned from
/// [`PyDeviceGreen::scattering_state`] and consumed by
/// [`PyDeviceGreen::eigenchannel`].
#[pyclass(name = "ScatteringState")]
struct PyScatteringState {
    inner: ScatteringState,
}

#[pymethods]
impl PyScatteringState {
    #[getter]
    fn dos<'py>(&self, py: Python<'py>) -> Bound<'py, PyArray1<f64>> {
        self.inner.dos.to_pyarray(py)
    }

    #[getter]
    fn state(&self, py: Python<'_>) -> PyResult<Py<PyArray2<C64>>> {
        mat_to_pyarray(py, &self.inner.state)
    }
}

/// Emit a `green`/`spectral` block-structured result (`btd`/`bm` format)
/// as a Python `dict[(int, int), ndarray]`, one entry per stored tile.
fn block_matrix_to_dict<'py>(
    py: Python<'py>,
    bm: &btd_green::blocks::BlockMatrix,
) -> PyResult<Bound<'py, pyo3::types::PyDict>> {
    let dict = pyo3::types::PyDict::new(py);
    let nb = bm.num_blocks();
    for i in 0..nb {
        for j in i.saturating_sub(1)..=(i + 1).min(nb - 1) {
            let tile = bm.get(i, j).map_err(btd_err)?;
            if tile.nrows() > 0 && tile.ncols() > 0 {
                dict.set_item((i, j), mat_to_pyarray(py, &tile)?)?;
            }
        }
    }
    Ok(dict)
}

/// Top-level BTD Green-function solver (spec §4.5) over Python-supplied
/// `H(k)`/`S(k)` and electrode self-energies. Each call builds a fresh
/// [`DeviceGreen`] from the shared [`DeviceGreenBuilder`] (spec §5: one
/// solver instance per `(E, k)` solve; the underlying Hamiltonian/pivot/
/// self-energy data is shared via `Arc`, not re-parsed per call).
#[pyclass(name = "DeviceGreen")]
#[derive(Clone)]
struct PyDeviceGreen {
    builder: DeviceGreenBuilder,
}

#[pymethods]
impl PyDeviceGreen {
    #[new]
    fn new(hamiltonian: Py<PyHamiltonian>, pivot: PyPivot, electrodes: Vec<(String, PySelfEnergy)>) -> PyResult<Self> {
        let h: SharedHamiltonian = Python::with_gil(|py| -> PyResult<SharedHamiltonian> {
            let h = hamiltonian.borrow(py);
            Ok(Arc::new(PyHamiltonian { obj: h.obj.clone_ref(py), n: h.n }))
        })?;
        let pivot: Arc<dyn Pivot> = pivot.inner;
        let elecs: Vec<(String, Arc<dyn SelfEnergyProvider>)> = electrodes
            .into_iter()
            .map(|(name, se)| (name, Arc::new(se) as Arc<dyn SelfEnergyProvider>))
            .collect();
        Ok(PyDeviceGreen { builder: DeviceGreenBuilder::new(h, pivot, elecs) })
    }

    /// `green(E, k, format='array')` (spec §4.5). `format` is one of
    /// `array` (dense ndarray), `btd`/`bm` (`dict[(int,int), ndarray]`),
    /// `sparse` (`(indptr, indices, data)` CSR triple).
    #[pyo3(signature = (e_re, e_im, k, format="array"))]
    fn green(&self, py: Python<'_>, e_re: f64, e_im: f64, k: [f64; 3], format: &str) -> PyResult<PyObject> {
        let dg = self.builder.build();
        let fmt = parse_format(format)?;
        let result = dg.green(C64::new(e_re, e_im), k, fmt).map_err(btd_err)?;
        match fmt {
            GreenFormat::Array => Ok(mat_to_pyarray(py, &result.into_array().unwrap())?.into_any()),
            GreenFormat::Btd | GreenFormat::Bm => {
                Ok(block_matrix_to_dict(py, &result.into_block_matrix().unwrap())?.into_any().unbind())
            }
            GreenFormat::Sparse => {
                let csr = result.into_sparse().unwrap();
                // numpy has no portable `usize` dtype; widen to `u64`.
                let indptr: Vec<u64> = csr.indptr().iter().map(|&x| x as u64).collect();
                let indices: Vec<u64> = csr.indices().iter().map(|&x| x as u64).collect();
                let indptr = indptr.to_pyarray(py);
                let indices = indices.to_pyarray(py);
                let data = csr.data().to_vec().to_pyarray(py);
                Ok((indptr, indices, data).into_pyobject(py)?.into_any().unbind())
            }
        }
    }

    /// `spectral(elec, E, k, format='array', method='column', herm=false)`
    /// (spec §4.5).
    #[pyo3(signature = (elec, e_re, e_im, k, format="array", method="column", herm=false))]
    #[allow(clippy::too_many_arguments)]
    fn spectral(
        &self,
        py: Python<'_>,
        elec: &str,
        e_re: f64,
        e_im: f64,
        k: [f64; 3],
        format: &str,
        method: &str,
        herm: bool,
    ) -> PyResult<PyObject> {
        let dg = self.builder.build();
        let fmt = parse_spectral_format(format)?;
        let meth = parse_spectral_method(method)?;
        let result = dg
            .spectral(elec, C64::new(e_re, e_im), k, fmt, meth, herm)
            .map_err(btd_err)?;
        match fmt {
            SpectralFormat::Array => Ok(mat_to_pyarray(py, &result.into_array().unwrap())?.into_any()),
            SpectralFormat::Btd | SpectralFormat::Bm => {
                Ok(block_matrix_to_dict(py, &result.into_block_matrix().unwrap())?.into_any().unbind())
            }
        }
    }

    /// `scattering_state(elec, E, k, cutoff=(0.0, 0.0), method='svd')`
    /// (spec §4.5). `cutoff` is `(pre_propagation, post_svd)`; only the
    /// first entry is used for `method in {full, svd}`.
    #[pyo3(signature = (elec, e_re, e_im, k, cutoff=(0.0, 0.0), method="svd"))]
    fn scattering_state(
        &self,
        elec: &str,
        e_re: f64,
        e_im: f64,
        k: [f64; 3],
        cutoff: (f64, f64),
        method: &str,
    ) -> PyResult<PyScatteringState> {
        let dg = self.builder.build();
        let meth = parse_scattering_method(method)?;
        let inner = dg
            .scattering_state(elec, C64::new(e_re, e_im), k, [cutoff.0, cutoff.1], meth)
            .map_err(btd_err)?;
        Ok(PyScatteringState { inner })
    }

    /// `eigenchannel(state, elec_to)` (spec §4.5).
    fn eigenchannel(&self, state: &PyScatteringState, elec_to: Vec<String>) -> PyResult<PyEigenchannel> {
        let dg = self.builder.build();
        let elec_to: Vec<&str> = elec_to.iter().map(String::as_str).collect();
        let inner = dg.eigenchannel(&state.inner, &elec_to).map_err(btd_err)?;
        Ok(PyEigenchannel { inner })
    }
}

/// Parallel `(E, k)` sweep (spec §5: "a conforming implementation may
/// provide a builder function to produce independent solver instances
/// for parallel (E,k) sweeps"), dense `green(format='array')` only.
/// Releases the GIL around the `rayon` fan-out so worker threads can
/// re-acquire it to call back into any Python self-energy/Hamiltonian
/// object; progress is reported the same way
/// `examples/SpinW-pySpinW/src/spinwave.rs`'s own q-point sweep does.
#[pyfunction]
fn green_sweep<'py>(
    py: Python<'py>,
    dg: &PyDeviceGreen,
    points: Vec<(f64, f64, [f64; 3])>,
    format: &str,
) -> PyResult<Vec<Py<PyArray2<C64>>>> {
    if parse_format(format)? != GreenFormat::Array {
        return Err(PyValueError::new_err("green_sweep only supports format='array'"));
    }
    let builder = dg.builder.clone();
    let n = points.len() as u64;
    let results: Vec<btd_green::Result<Mat<C64>>> = py.allow_threads(|| {
        points
            .into_par_iter()
            .progress_count(n)
            .map(|(e_re, e_im, k)| {
                let solver = builder.build();
                solver
                    .green(C64::new(e_re, e_im), k, GreenFormat::Array)
                    .map(|g| g.into_array().unwrap())
            })
            .collect()
    });
    results
        .into_iter()
        .map(|r| r.map_err(btd_err).and_then(|m| mat_to_pyarray(py, &m)))
        .collect()
}

/// A Python module implemented in Rust.
#[pymodule]
fn rust(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<PyHamiltonian>()?;
    m.add_class::<PySelfEnergy>()?;
    m.add_class::<PyElectrodeInfo>()?;
    m.add_class::<PyPivot>()?;
    m.add_class::<PyDeviceGreen>()?;
    m.add_class::<PyScatteringState>()?;
    m.add_class::<PyEigenchannel>()?;
    m.add_function(wrap_pyfunction!(green_sweep, m)?)?;
    Ok(())
}
