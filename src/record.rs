use crate::error::{PartitionError, Result};
use crate::layout::PartitionLayout;
use bytemuck::Pod;
use ndarray::{Array4, ArrayView3, ArrayView4, ArrayViewMut4, Axis, ShapeBuilder, s};
use num_traits::Float;
use std::ops::Range;
use std::str::FromStr;

/// Element types a record can be decoded into.
pub trait FieldElement:
    Float + Pod + Send + Sync + Sized + std::fmt::Debug + std::fmt::Display
{
}

impl<T> FieldElement for T where
    T: Float + Pod + Send + Sync + Sized + std::fmt::Debug + std::fmt::Display
{
}

/// Fluid moments stored, in this order, in a fluid diagnostic record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MomentKind {
    Density,
    Velocity,
    Pressure,
    Energy,
    HeatFlux,
}

impl MomentKind {
    pub const ALL: [MomentKind; 5] = [
        MomentKind::Density,
        MomentKind::Velocity,
        MomentKind::Pressure,
        MomentKind::Energy,
        MomentKind::HeatFlux,
    ];

    pub fn name(self) -> &'static str {
        match self {
            MomentKind::Density => "density",
            MomentKind::Velocity => "velocity field",
            MomentKind::Pressure => "pressure tensor",
            MomentKind::Energy => "energy",
            MomentKind::HeatFlux => "heat flux",
        }
    }

    pub fn components(self, ndim: usize) -> usize {
        match self {
            MomentKind::Density | MomentKind::Energy => 1,
            MomentKind::Velocity | MomentKind::HeatFlux => ndim,
            MomentKind::Pressure => 2 * ndim,
        }
    }

    /// Components this moment occupies in a full fluid-moment record.
    pub fn component_range(self, ndim: usize) -> Range<usize> {
        let start = match self {
            MomentKind::Density => 0,
            MomentKind::Velocity => 1,
            MomentKind::Pressure => 1 + ndim,
            MomentKind::Energy => 1 + 3 * ndim,
            MomentKind::HeatFlux => 2 + 3 * ndim,
        };
        start..start + self.components(ndim)
    }

    /// Lowest processing level (`npro`) at which the moment is written.
    pub fn min_processing_level(self) -> u32 {
        match self {
            MomentKind::Density => 1,
            MomentKind::Velocity => 2,
            MomentKind::Pressure => 3,
            MomentKind::Energy | MomentKind::HeatFlux => 4,
        }
    }
}

impl FromStr for MomentKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "density" => Ok(MomentKind::Density),
            "velocity" => Ok(MomentKind::Velocity),
            "pressure" => Ok(MomentKind::Pressure),
            "energy" => Ok(MomentKind::Energy),
            "heat-flux" | "heatflux" => Ok(MomentKind::HeatFlux),
            other => Err(format!(
                "unknown moment '{other}', expected density, velocity, pressure, energy or heat-flux"
            )),
        }
    }
}

/// One timestep of a field, reassembled over the whole grid.
///
/// The buffer has shape `(components, nx, nyv, nzv)` in column-major order;
/// cells past `ny`/`nz` are padding and are never written by the reader.
#[derive(Debug, Clone)]
pub struct FieldRecord<T = f32> {
    data: Array4<T>,
    ny: usize,
    nz: usize,
}

impl<T: FieldElement> FieldRecord<T> {
    pub fn new(layout: &PartitionLayout, ncomp: usize) -> Self {
        Self {
            data: Array4::zeros(layout.padded_shape(ncomp).f()),
            ny: layout.grid.ny,
            nz: layout.grid.nz,
        }
    }

    /// Like [`Self::new`], but fails instead of panicking when the padded
    /// buffer cannot be allocated for `ncomp` components.
    pub fn try_new(layout: &PartitionLayout, ncomp: usize) -> Result<Self> {
        layout.checked_record_bytes(ncomp)?;
        Ok(Self::new(layout, ncomp))
    }

    pub fn components(&self) -> usize {
        self.data.dim().0
    }

    pub fn padded(&self) -> ArrayView4<'_, T> {
        self.data.view()
    }

    pub(crate) fn padded_mut(&mut self) -> ArrayViewMut4<'_, T> {
        self.data.view_mut()
    }

    /// The record restricted to the true grid, `(components, nx, ny, nz)`.
    pub fn valid(&self) -> ArrayView4<'_, T> {
        self.data.slice(s![.., .., ..self.ny, ..self.nz])
    }

    pub fn component(&self, c: usize) -> Option<ArrayView3<'_, T>> {
        (c < self.components()).then(|| self.valid().index_axis_move(Axis(0), c))
    }

    /// Components of `kind` when this record carries the full moment set
    /// up to that kind.
    pub fn moment(&self, kind: MomentKind, ndim: usize) -> Option<ArrayView4<'_, T>> {
        let r = kind.component_range(ndim);
        if r.end > self.components() {
            return None;
        }
        Some(self.valid().slice_move(s![r.start..r.end, .., .., ..]))
    }

    pub fn to_valid_owned(&self) -> Array4<T> {
        self.valid().to_owned()
    }

    pub(crate) fn check_shape(&self, layout: &PartitionLayout, ncomp: usize) -> Result<()> {
        if self.data.dim() != layout.padded_shape(ncomp)
            || self.ny != layout.grid.ny
            || self.nz != layout.grid.nz
        {
            return Err(PartitionError::invalid(format!(
                "record buffer of shape {:?} does not fit layout shape {:?}",
                self.data.dim(),
                layout.padded_shape(ncomp)
            )));
        }
        Ok(())
    }
}
