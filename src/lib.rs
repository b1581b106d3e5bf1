//! Reassembly of 3D fluid diagnostics written by domain-decomposed PIC runs.
//!
//! Each process of a run owns a y/z slab of the grid and the diagnostic
//! streams hold, per timestep, one block per slab. [`compute_layout`] fixes
//! the slab geometry once; a [`PartitionStream`] then gathers every record
//! back into one [`FieldRecord`] covering the whole grid.

pub mod catalog;
pub mod error;
pub mod layout;
pub mod record;
pub mod stream;

#[cfg(feature = "python")]
mod python;

pub use catalog::{DiagnosticDescriptor, RunConfig, Species};
pub use error::{PartitionError, Result};
pub use layout::{GlobalGridSpec, Partition, PartitionLayout, ProcessGrid, compute_layout};
pub use record::{FieldElement, FieldRecord, MomentKind};
pub use stream::{
    ByteOrder, MappedFile, PartitionStream, RecordClock, RecordStatus, Records, TimedRecord,
    open_partitioned_stream,
};
