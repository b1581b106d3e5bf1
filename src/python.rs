use crate::catalog::{RunConfig, Species};
use crate::record::FieldElement;
use ndarray::Array4;
use numpy::{Element, IntoPyArray, PyArray4};
use pyo3::exceptions::{PyIOError, PyValueError};
use pyo3::prelude::*;
use pyo3::wrap_pyfunction;

type PyRecords<T> = Vec<(usize, f64, Py<PyArray4<T>>)>;

fn to_py_err(e: crate::PartitionError) -> PyErr {
    match e {
        crate::PartitionError::Io(io) => PyIOError::new_err(io.to_string()),
        other => PyValueError::new_err(other.to_string()),
    }
}

fn parse_species(species: Option<&str>) -> PyResult<Option<Species>> {
    species
        .map(|s| s.parse::<Species>().map_err(PyValueError::new_err))
        .transpose()
}

fn read_all<T: FieldElement + Element>(
    run: &RunConfig,
    species: Option<Species>,
) -> crate::Result<Vec<(usize, f64, Array4<T>)>> {
    let diag = run.select(species)?;
    let layout = run.layout()?;
    let mut stream = diag.open(&layout)?;
    stream
        .records::<T>(layout, diag.nprd, run.clock(diag))
        .map(|r| r.map(|t| (t.it, t.time, t.record.to_valid_owned())))
        .collect()
}

fn into_py<T: FieldElement + Element>(
    py: Python<'_>,
    records: Vec<(usize, f64, Array4<T>)>,
) -> PyRecords<T> {
    records
        .into_iter()
        .map(|(it, time, arr)| (it, time, arr.into_pyarray(py).to_owned().into()))
        .collect()
}

#[pyclass(name = "FluidRun")]
pub struct PyFluidRun {
    inner: RunConfig,
    path: String,
}

#[pymethods]
impl PyFluidRun {
    #[new]
    fn new(path: &str) -> PyResult<Self> {
        RunConfig::load(path)
            .map(|inner| Self {
                inner,
                path: path.to_string(),
            })
            .map_err(|e| PyIOError::new_err(format!("Failed to open '{}': {}", path, e)))
    }

    fn __repr__(&self) -> String {
        format!("FluidRun(path='{}')", self.path)
    }

    fn list_diagnostics(&self) -> Vec<String> {
        self.inner
            .diagnostics
            .iter()
            .map(|d| d.species.to_string())
            .collect()
    }

    /// `(nx, ny, nz, kyp, kzp, kyb, kzb, nyv, nzv)`
    fn layout(&self) -> PyResult<(usize, usize, usize, usize, usize, usize, usize, usize, usize)> {
        let l = self.inner.layout().map_err(to_py_err)?;
        Ok((
            l.grid.nx, l.grid.ny, l.grid.nz, l.kyp, l.kzp, l.kyb, l.kzb, l.nyv, l.nzv,
        ))
    }

    #[pyo3(signature = (species=None))]
    fn read_records_f32(&self, py: Python<'_>, species: Option<&str>) -> PyResult<PyRecords<f32>> {
        let species = parse_species(species)?;
        let records = read_all::<f32>(&self.inner, species).map_err(to_py_err)?;
        Ok(into_py(py, records))
    }

    #[pyo3(signature = (species=None))]
    fn read_records_f64(&self, py: Python<'_>, species: Option<&str>) -> PyResult<PyRecords<f64>> {
        let species = parse_species(species)?;
        let records = read_all::<f64>(&self.inner, species).map_err(to_py_err)?;
        Ok(into_py(py, records))
    }
}

#[pyfunction]
#[pyo3(signature = (path, species=None))]
fn read_fluid_records_f32(
    py: Python<'_>,
    path: &str,
    species: Option<&str>,
) -> PyResult<PyRecords<f32>> {
    let species = parse_species(species)?;
    let run = RunConfig::load(path)
        .map_err(|e| PyIOError::new_err(format!("open '{}': {}", path, e)))?;
    let records = read_all::<f32>(&run, species).map_err(to_py_err)?;
    Ok(into_py(py, records))
}

#[pymodule]
fn pfieldrs(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<PyFluidRun>()?;
    m.add_function(wrap_pyfunction!(read_fluid_records_f32, m)?)?;
    Ok(())
}
