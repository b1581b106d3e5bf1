#![allow(dead_code)]

use ndarray::Array4;
use pfieldrs::{ByteOrder, PartitionLayout};

/// Value stored in padding cells of synthetic streams.
pub const PAD: f32 = -1.0e30;

pub fn sample_field(layout: &PartitionLayout, ncomp: usize, record: usize) -> Array4<f32> {
    Array4::from_shape_fn(layout.valid_shape(ncomp), |(c, x, y, z)| {
        (record * 100_000 + c * 10_000 + x * 1_000 + y * 10) as f32 + z as f32 * 0.5
    })
}

/// Splits `field` into partition blocks in stream order.
pub fn encode_record(layout: &PartitionLayout, field: &Array4<f32>, order: ByteOrder) -> Vec<u8> {
    let (ncomp, nx, ny, nz) = field.dim();
    let mut out = Vec::with_capacity(layout.record_bytes(ncomp));
    for p in layout.partitions() {
        for lz in 0..layout.kzp {
            for ly in 0..layout.kyp {
                for x in 0..nx {
                    for c in 0..ncomp {
                        let (y, z) = (p.y_start + ly, p.z_start + lz);
                        let v = if y < ny && z < nz { field[[c, x, y, z]] } else { PAD };
                        let bytes = match order {
                            ByteOrder::Native => v.to_ne_bytes(),
                            ByteOrder::Little => v.to_le_bytes(),
                            ByteOrder::Big => v.to_be_bytes(),
                        };
                        out.extend_from_slice(&bytes);
                    }
                }
            }
        }
    }
    out
}

pub fn encode_records(
    layout: &PartitionLayout,
    ncomp: usize,
    count: usize,
    order: ByteOrder,
) -> Vec<u8> {
    (0..count)
        .flat_map(|k| encode_record(layout, &sample_field(layout, ncomp, k), order))
        .collect()
}
