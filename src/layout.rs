//! Partition geometry of a y/z domain decomposition.
//!
//! The x axis is never decomposed. Along y and z every process owns a slab of
//! `kyp` (`kzp`) cells; the last slab along an axis may run past the end of
//! the grid, so buffers are sized to the padded extents `nyv`/`nzv`.

use crate::error::{PartitionError, Result};

/// Size in bytes of one stored element (single precision).
pub const ELEMENT_BYTES: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GlobalGridSpec {
    pub nx: usize,
    pub ny: usize,
    pub nz: usize,
}

impl GlobalGridSpec {
    pub fn new(nx: usize, ny: usize, nz: usize) -> Self {
        Self { nx, ny, nz }
    }

    /// Grid sizes given as base-2 logarithms, `nx = 2^indx` and so on.
    pub fn from_log2(indx: u32, indy: u32, indz: u32) -> Result<Self> {
        let pow2 = |axis: &str, e: u32| {
            1usize.checked_shl(e).ok_or_else(|| {
                PartitionError::invalid(format!("{axis} exponent {e} overflows the grid size"))
            })
        };
        Ok(Self {
            nx: pow2("indx", indx)?,
            ny: pow2("indy", indy)?,
            nz: pow2("indz", indz)?,
        })
    }

    pub fn cells(&self) -> usize {
        self.nx * self.ny * self.nz
    }
}

/// Number of processes decomposing the y and z axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessGrid {
    pub nvpy: usize,
    pub nvpz: usize,
}

impl ProcessGrid {
    pub fn new(nvpy: usize, nvpz: usize) -> Self {
        Self { nvpy, nvpz }
    }

    pub fn processes(&self) -> usize {
        self.nvpy * self.nvpz
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PartitionLayout {
    pub grid: GlobalGridSpec,
    pub processes: ProcessGrid,
    /// Cells per partition in y and z.
    pub kyp: usize,
    pub kzp: usize,
    /// Partitions stored on disk along y and z.
    pub kyb: usize,
    pub kzb: usize,
    /// Padded buffer extents, `kyp*kyb` and `kzp*kzb`.
    pub nyv: usize,
    pub nzv: usize,
}

/// One partition of a record, in stream order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Partition {
    /// Position of the block inside a record, `pz*kyb + py`.
    pub block: usize,
    pub py: usize,
    pub pz: usize,
    pub y_start: usize,
    pub z_start: usize,
    /// Extents of the partition that fall inside the global grid.
    pub valid_kyp: usize,
    pub valid_kzp: usize,
}

fn ceil_div(a: usize, b: usize) -> usize {
    (a - 1) / b + 1
}

/// Computes the partition geometry for a grid decomposed over `processes`.
///
/// Fails before any stream I/O when a dimension is zero or when a padded
/// record cannot be addressed in memory.
pub fn compute_layout(grid: GlobalGridSpec, processes: ProcessGrid) -> Result<PartitionLayout> {
    for (name, v) in [
        ("nx", grid.nx),
        ("ny", grid.ny),
        ("nz", grid.nz),
        ("nvpy", processes.nvpy),
        ("nvpz", processes.nvpz),
    ] {
        if v == 0 {
            return Err(PartitionError::invalid(format!("{name} must be positive")));
        }
    }

    let kyp = ceil_div(grid.ny, processes.nvpy);
    let kzp = ceil_div(grid.nz, processes.nvpz);
    if kyp == 0 || kzp == 0 {
        return Err(PartitionError::invalid(format!(
            "empty partition extent kyp={kyp} kzp={kzp}"
        )));
    }
    let kyb = ceil_div(grid.ny, kyp);
    let kzb = ceil_div(grid.nz, kzp);

    let layout = PartitionLayout {
        grid,
        processes,
        kyp,
        kzp,
        kyb,
        kzb,
        nyv: kyp
            .checked_mul(kyb)
            .ok_or_else(|| PartitionError::invalid("padded y extent overflows"))?,
        nzv: kzp
            .checked_mul(kzb)
            .ok_or_else(|| PartitionError::invalid("padded z extent overflows"))?,
    };
    layout.checked_record_bytes(1)?;
    tracing::debug!(
        kyp,
        kzp,
        kyb,
        kzb,
        nyv = layout.nyv,
        nzv = layout.nzv,
        "computed partition layout"
    );
    Ok(layout)
}

impl PartitionLayout {
    /// Partition blocks making up one record.
    pub fn blocks_per_record(&self) -> usize {
        self.kyb * self.kzb
    }

    /// Elements in one partition block holding `ncomp` components.
    pub fn block_len(&self, ncomp: usize) -> usize {
        ncomp * self.grid.nx * self.kyp * self.kzp
    }

    pub fn block_bytes(&self, ncomp: usize) -> usize {
        self.block_len(ncomp) * ELEMENT_BYTES
    }

    pub fn record_len(&self, ncomp: usize) -> usize {
        self.block_len(ncomp) * self.blocks_per_record()
    }

    pub fn record_bytes(&self, ncomp: usize) -> usize {
        self.record_len(ncomp) * ELEMENT_BYTES
    }

    /// Bytes of one record of `ncomp` components, which is also the size of
    /// its padded buffer. Fails when that exceeds `isize::MAX`.
    pub fn checked_record_bytes(&self, ncomp: usize) -> Result<usize> {
        [self.grid.nx, self.nyv, self.nzv, ELEMENT_BYTES]
            .into_iter()
            .try_fold(ncomp, usize::checked_mul)
            .filter(|&n| n <= isize::MAX as usize)
            .ok_or_else(|| {
                PartitionError::invalid(format!(
                    "a record of {ncomp} components over {}x{}x{} cells is too large",
                    self.grid.nx, self.nyv, self.nzv
                ))
            })
    }

    /// Shape of a padded record buffer, `(ncomp, nx, nyv, nzv)`.
    pub fn padded_shape(&self, ncomp: usize) -> (usize, usize, usize, usize) {
        (ncomp, self.grid.nx, self.nyv, self.nzv)
    }

    pub fn valid_shape(&self, ncomp: usize) -> (usize, usize, usize, usize) {
        (ncomp, self.grid.nx, self.grid.ny, self.grid.nz)
    }

    /// Complete records held by `partition_records` blocks; a trailing
    /// incomplete record is ignored.
    pub fn complete_records(&self, partition_records: usize) -> usize {
        partition_records / self.blocks_per_record()
    }

    pub fn partition(&self, py: usize, pz: usize) -> Partition {
        let y_start = py * self.kyp;
        let z_start = pz * self.kzp;
        Partition {
            block: pz * self.kyb + py,
            py,
            pz,
            y_start,
            z_start,
            valid_kyp: self.grid.ny.saturating_sub(y_start).min(self.kyp),
            valid_kzp: self.grid.nz.saturating_sub(z_start).min(self.kzp),
        }
    }

    /// Partitions of one record in stream order: z index outer, y index inner.
    pub fn partitions(&self) -> impl Iterator<Item = Partition> + '_ {
        (0..self.kzb).flat_map(move |pz| (0..self.kyb).map(move |py| self.partition(py, pz)))
    }
}
