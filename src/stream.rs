//! Forward-only reader for partitioned field streams.
//!
//! A stream is a bare sequence of records with no length prefixes. Each
//! record is `kyb*kzb` partition blocks in the order `pz*kyb + py`, and each
//! block holds `ncomp*nx*kyp*kzp` single precision values with the component
//! index varying fastest, then x, local y and local z.

use crate::error::{PartitionError, Result};
use crate::layout::{ELEMENT_BYTES, PartitionLayout};
use crate::record::{FieldElement, FieldRecord};
use memmap2::Mmap;
use ndarray::{ArrayView4, ShapeBuilder, Zip, s};
use std::io::{self, Read};
use std::iter::FusedIterator;
use std::marker::PhantomData;
use std::path::Path;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ByteOrder {
    #[default]
    Native,
    Little,
    Big,
}

impl ByteOrder {
    fn decode_into(self, bytes: &[u8], out: &mut Vec<f32>) {
        out.clear();
        out.extend(bytes.chunks_exact(ELEMENT_BYTES).map(|chunk| match self {
            ByteOrder::Native => bytemuck::pod_read_unaligned::<f32>(chunk),
            ByteOrder::Little | ByteOrder::Big => {
                let mut buffer: [u8; 4] = [0; 4];
                buffer.copy_from_slice(chunk);
                if self == ByteOrder::Little {
                    f32::from_le_bytes(buffer)
                } else {
                    f32::from_be_bytes(buffer)
                }
            }
        }));
    }
}

impl FromStr for ByteOrder {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "native" | "" => Ok(ByteOrder::Native),
            "little" | "le" => Ok(ByteOrder::Little),
            "big" | "be" => Ok(ByteOrder::Big),
            other => Err(format!("unknown byte order '{other}'")),
        }
    }
}

/// Outcome of a successful read call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordStatus {
    Record,
    EndOfStream,
}

/// Read-only memory map of a stream file, consumed front to back.
#[derive(Debug)]
pub struct MappedFile {
    map: Option<Mmap>,
    pos: usize,
}

impl MappedFile {
    fn as_slice(&self) -> &[u8] {
        self.map.as_deref().unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Read for MappedFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let start = self.pos.min(self.len());
        let src = &self.as_slice()[start..];
        let n = src.len().min(buf.len());
        buf[..n].copy_from_slice(&src[..n]);
        self.pos = start + n;
        Ok(n)
    }
}

/// Maps `path` and positions the cursor at the first record, `offset` bytes in.
pub fn open_partitioned_stream(
    path: impl AsRef<Path>,
    offset: usize,
) -> Result<PartitionStream<MappedFile>> {
    let path = path.as_ref();
    let f = std::fs::File::open(path)?;
    let map = if f.metadata()?.len() == 0 {
        None
    } else {
        Some(unsafe { Mmap::map(&f)? })
    };
    let source = MappedFile { map, pos: offset };
    let len = source.len();
    if offset > len {
        return Err(PartitionError::invalid(format!(
            "first record offset {offset} lies past the end of {} ({len} bytes)",
            path.display()
        )));
    }
    tracing::debug!(path = %path.display(), bytes = len, offset, "opened partitioned stream");
    Ok(PartitionStream::new(source, Some((len - offset) as u64)))
}

/// Cursor over the records of one stream.
///
/// One cursor owns its source exclusively. After an error the position in
/// the source is unspecified and the cursor must not be read again.
#[derive(Debug)]
pub struct PartitionStream<R> {
    reader: R,
    remaining: Option<u64>,
    byte_order: ByteOrder,
    records_read: usize,
    record_limit: Option<usize>,
    bytes: Vec<u8>,
    values: Vec<f32>,
}

impl<R: Read> PartitionStream<R> {
    /// `len` is the number of bytes left in `reader`, when known. Without it
    /// the end of the stream is detected on the first block of a record.
    pub fn new(reader: R, len: Option<u64>) -> Self {
        Self {
            reader,
            remaining: len,
            byte_order: ByteOrder::default(),
            records_read: 0,
            record_limit: None,
            bytes: Vec::new(),
            values: Vec::new(),
        }
    }

    pub fn with_byte_order(mut self, byte_order: ByteOrder) -> Self {
        self.byte_order = byte_order;
        self
    }

    /// Stops after `limit` records even if the source holds more bytes.
    pub fn with_record_limit(mut self, limit: usize) -> Self {
        self.record_limit = Some(limit);
        self
    }

    pub fn records_read(&self) -> usize {
        self.records_read
    }

    pub fn remaining_bytes(&self) -> Option<u64> {
        self.remaining
    }

    /// Reads the next record into `record`, which fixes the component count.
    ///
    /// Only the part of each partition block inside the global grid is
    /// copied; padding cells of `record` are left untouched.
    pub fn read_record_into<T: FieldElement>(
        &mut self,
        layout: &PartitionLayout,
        record: &mut FieldRecord<T>,
    ) -> Result<RecordStatus> {
        let ncomp = record.components();
        if ncomp == 0 {
            return Err(PartitionError::invalid("records need at least one component"));
        }
        record.check_shape(layout, ncomp)?;

        if self.record_limit.is_some_and(|n| self.records_read >= n) {
            return Ok(RecordStatus::EndOfStream);
        }
        let index = self.records_read;
        let record_bytes = layout.checked_record_bytes(ncomp)? as u64;
        match self.remaining {
            Some(0) => return Ok(RecordStatus::EndOfStream),
            Some(rem) if rem < record_bytes => {
                return Err(PartitionError::corrupt(
                    index,
                    format!("{rem} bytes remain but a record needs {record_bytes}"),
                ));
            }
            _ => {}
        }

        let block_bytes = layout.block_bytes(ncomp);
        let block_shape = (ncomp, layout.grid.nx, layout.kyp, layout.kzp);
        self.bytes.resize(block_bytes, 0);
        let mut dst = record.padded_mut();

        for part in layout.partitions() {
            let got = read_full(&mut self.reader, &mut self.bytes)?;
            if let Some(rem) = self.remaining.as_mut() {
                *rem = rem.saturating_sub(got as u64);
            }
            if got < block_bytes {
                if got == 0 && part.block == 0 && self.remaining.is_none() {
                    return Ok(RecordStatus::EndOfStream);
                }
                return Err(PartitionError::corrupt(
                    index,
                    format!(
                        "partition block {} holds {got} of {block_bytes} bytes",
                        part.block
                    ),
                ));
            }

            self.byte_order.decode_into(&self.bytes, &mut self.values);
            let block = ArrayView4::from_shape(block_shape.f(), &self.values[..])
                .map_err(|e| PartitionError::corrupt(index, e.to_string()))?;
            let src = block.slice(s![.., .., ..part.valid_kyp, ..part.valid_kzp]);
            let target = dst.slice_mut(s![
                ..,
                ..,
                part.y_start..part.y_start + part.valid_kyp,
                part.z_start..part.z_start + part.valid_kzp
            ]);
            Zip::from(target)
                .and(&src)
                .for_each(|d, &v| *d = T::from(v).unwrap_or_else(T::nan));
        }

        self.records_read += 1;
        Ok(RecordStatus::Record)
    }

    /// Allocating variant of [`Self::read_record_into`]; `None` at the end.
    pub fn read_record<T: FieldElement>(
        &mut self,
        layout: &PartitionLayout,
        ncomp: usize,
    ) -> Result<Option<FieldRecord<T>>> {
        let mut record = FieldRecord::try_new(layout, ncomp)?;
        match self.read_record_into(layout, &mut record)? {
            RecordStatus::Record => Ok(Some(record)),
            RecordStatus::EndOfStream => Ok(None),
        }
    }

    /// Iterates the remaining records, tagging each with its timestep.
    ///
    /// Every step allocates a fresh [`FieldRecord`]; loops that keep one
    /// buffer for the whole stream should call [`Self::read_record_into`].
    pub fn records<T: FieldElement>(
        &mut self,
        layout: PartitionLayout,
        ncomp: usize,
        clock: RecordClock,
    ) -> Records<'_, R, T> {
        Records {
            stream: self,
            layout,
            ncomp,
            clock,
            done: false,
            _elem: PhantomData,
        }
    }
}

fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Maps record indices to simulation timesteps and times.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecordClock {
    /// Simulation time step.
    pub dt: f64,
    /// Timesteps between two records.
    pub nts: usize,
}

impl RecordClock {
    pub fn new(dt: f64, nts: usize) -> Self {
        Self { dt, nts }
    }

    pub fn timestep(&self, index: usize) -> usize {
        self.nts * index
    }

    pub fn time(&self, index: usize) -> f64 {
        self.dt * self.nts as f64 * index as f64
    }
}

#[derive(Debug, Clone)]
pub struct TimedRecord<T = f32> {
    pub index: usize,
    pub it: usize,
    pub time: f64,
    pub record: FieldRecord<T>,
}

/// Iterator returned by [`PartitionStream::records`]. Ends at the end of the
/// stream and after the first error.
pub struct Records<'a, R, T> {
    stream: &'a mut PartitionStream<R>,
    layout: PartitionLayout,
    ncomp: usize,
    clock: RecordClock,
    done: bool,
    _elem: PhantomData<T>,
}

impl<R: Read, T: FieldElement> Iterator for Records<'_, R, T> {
    type Item = Result<TimedRecord<T>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let index = self.stream.records_read();
        match self.stream.read_record(&self.layout, self.ncomp) {
            Ok(Some(record)) => Some(Ok(TimedRecord {
                index,
                it: self.clock.timestep(index),
                time: self.clock.time(index),
                record,
            })),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

impl<R: Read, T: FieldElement> FusedIterator for Records<'_, R, T> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{GlobalGridSpec, ProcessGrid, compute_layout};
    use ndarray::Array4;
    use std::io::Cursor;

    const PAD: f32 = -999.0;

    fn layout(nx: usize, ny: usize, nz: usize, nvpy: usize, nvpz: usize) -> PartitionLayout {
        compute_layout(GlobalGridSpec::new(nx, ny, nz), ProcessGrid::new(nvpy, nvpz)).unwrap()
    }

    fn global(l: &PartitionLayout, ncomp: usize, seed: f32) -> Array4<f32> {
        Array4::from_shape_fn(l.valid_shape(ncomp), |(c, x, y, z)| {
            seed + (c * 1000 + x * 100 + y * 10 + z) as f32
        })
    }

    /// Writes `field` the way the partitioned writer lays it out, filling
    /// padding cells with `PAD`.
    fn encode(l: &PartitionLayout, field: &Array4<f32>, order: ByteOrder) -> Vec<u8> {
        let (ncomp, nx, ny, nz) = field.dim();
        let mut out = Vec::new();
        for p in l.partitions() {
            for lz in 0..l.kzp {
                for ly in 0..l.kyp {
                    for x in 0..nx {
                        for c in 0..ncomp {
                            let (y, z) = (p.y_start + ly, p.z_start + lz);
                            let v = if y < ny && z < nz {
                                field[[c, x, y, z]]
                            } else {
                                PAD
                            };
                            match order {
                                ByteOrder::Native => out.extend_from_slice(&v.to_ne_bytes()),
                                ByteOrder::Little => out.extend_from_slice(&v.to_le_bytes()),
                                ByteOrder::Big => out.extend_from_slice(&v.to_be_bytes()),
                            }
                        }
                    }
                }
            }
        }
        out
    }

    fn stream(bytes: Vec<u8>) -> PartitionStream<Cursor<Vec<u8>>> {
        let len = bytes.len() as u64;
        PartitionStream::new(Cursor::new(bytes), Some(len))
    }

    #[test]
    fn reassembles_evenly_divided_grid() {
        let l = layout(4, 6, 4, 2, 1);
        let field = global(&l, 3, 0.0);
        let mut s = stream(encode(&l, &field, ByteOrder::Native));
        let rec = s.read_record::<f32>(&l, 3).unwrap().unwrap();
        assert_eq!(rec.valid(), field.view());
    }

    #[test]
    fn short_partitions_do_not_misalign() {
        let l = layout(3, 5, 7, 2, 3);
        assert!(l.nyv > 5 && l.nzv > 7);
        let field = global(&l, 2, 0.5);
        let mut bytes = encode(&l, &field, ByteOrder::Native);
        let second = global(&l, 2, 7.0);
        bytes.extend(encode(&l, &second, ByteOrder::Native));
        let mut s = stream(bytes);

        let first = s.read_record::<f32>(&l, 2).unwrap().unwrap();
        assert_eq!(first.valid(), field.view());
        assert!(first.padded().iter().all(|v| *v != PAD));
        let next = s.read_record::<f32>(&l, 2).unwrap().unwrap();
        assert_eq!(next.valid(), second.view());
    }

    #[test]
    fn end_of_stream_after_complete_records() {
        let l = layout(4, 5, 4, 2, 1);
        let mut bytes = Vec::new();
        for k in 0..3 {
            bytes.extend(encode(&l, &global(&l, 1, k as f32), ByteOrder::Native));
        }
        let mut s = stream(bytes);
        let mut rec = FieldRecord::<f32>::new(&l, 1);
        for k in 0..3 {
            assert_eq!(s.read_record_into(&l, &mut rec).unwrap(), RecordStatus::Record);
            assert_eq!(rec.valid(), global(&l, 1, k as f32).view());
        }
        assert_eq!(s.read_record_into(&l, &mut rec).unwrap(), RecordStatus::EndOfStream);
        assert_eq!(s.read_record_into(&l, &mut rec).unwrap(), RecordStatus::EndOfStream);
        assert_eq!(s.records_read(), 3);
    }

    #[test]
    fn truncated_record_is_corrupt() {
        let l = layout(4, 5, 4, 2, 1);
        let mut bytes = encode(&l, &global(&l, 1, 0.0), ByteOrder::Native);
        let second = encode(&l, &global(&l, 1, 1.0), ByteOrder::Native);
        bytes.extend_from_slice(&second[..l.block_bytes(1) + 6]);
        let mut s = stream(bytes);
        assert!(s.read_record::<f32>(&l, 1).unwrap().is_some());
        let err = s.read_record::<f32>(&l, 1).unwrap_err();
        assert!(matches!(err, PartitionError::CorruptStream { record: 1, .. }));
    }

    #[test]
    fn unknown_length_detects_end_and_truncation() {
        let l = layout(2, 4, 2, 2, 1);
        let rec = encode(&l, &global(&l, 2, 0.0), ByteOrder::Native);

        let mut s = PartitionStream::new(Cursor::new(rec.clone()), None);
        assert!(s.read_record::<f32>(&l, 2).unwrap().is_some());
        assert!(s.read_record::<f32>(&l, 2).unwrap().is_none());

        let cut = rec[..rec.len() - 4].to_vec();
        let mut s = PartitionStream::new(Cursor::new(cut), None);
        let err = s.read_record::<f32>(&l, 2).unwrap_err();
        assert!(matches!(err, PartitionError::CorruptStream { record: 0, .. }));
    }

    #[test]
    fn decodes_big_endian_into_f64() {
        let l = layout(2, 3, 2, 2, 1);
        let field = global(&l, 1, 0.25);
        let mut s = stream(encode(&l, &field, ByteOrder::Big)).with_byte_order(ByteOrder::Big);
        let rec = s.read_record::<f64>(&l, 1).unwrap().unwrap();
        assert_eq!(rec.valid(), field.mapv(f64::from).view());
    }

    #[test]
    fn record_limit_ends_iteration() {
        let l = layout(2, 2, 2, 1, 1);
        let mut bytes = encode(&l, &global(&l, 1, 0.0), ByteOrder::Native);
        bytes.extend(encode(&l, &global(&l, 1, 1.0), ByteOrder::Native));
        let mut s = stream(bytes).with_record_limit(1);
        assert!(s.read_record::<f32>(&l, 1).unwrap().is_some());
        assert!(s.read_record::<f32>(&l, 1).unwrap().is_none());
    }

    #[test]
    fn records_carry_time() {
        let l = layout(2, 4, 2, 2, 1);
        let mut bytes = Vec::new();
        for k in 0..3 {
            bytes.extend(encode(&l, &global(&l, 1, k as f32), ByteOrder::Little));
        }
        let mut s = stream(bytes).with_byte_order(ByteOrder::Little);
        let recs: Vec<_> = s
            .records::<f32>(l, 1, RecordClock::new(0.5, 10))
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(recs.len(), 3);
        assert_eq!(recs[2].index, 2);
        assert_eq!(recs[2].it, 20);
        assert!((recs[2].time - 10.0).abs() < 1e-12);
        assert_eq!(recs[1].record.valid(), global(&l, 1, 1.0).view());
    }

    #[test]
    fn iterator_stops_after_error() {
        let l = layout(2, 4, 2, 2, 1);
        let bytes = encode(&l, &global(&l, 1, 0.0), ByteOrder::Native);
        let mut s = stream(bytes[..bytes.len() - 1].to_vec());
        let mut it = s.records::<f32>(l, 1, RecordClock::new(1.0, 1));
        assert!(it.next().unwrap().is_err());
        assert!(it.next().is_none());
    }

    #[test]
    fn rejects_buffer_for_other_layout() {
        let l = layout(2, 4, 2, 2, 1);
        let other = layout(2, 6, 2, 2, 1);
        let mut rec = FieldRecord::<f32>::new(&other, 1);
        let mut s = stream(encode(&l, &global(&l, 1, 0.0), ByteOrder::Native));
        let err = s.read_record_into(&l, &mut rec).unwrap_err();
        assert!(matches!(err, PartitionError::InvalidConfig(_)));
    }

    #[test]
    fn mapped_file_reads_from_offset() {
        use std::io::Write;
        let l = layout(2, 3, 2, 2, 1);
        let field = global(&l, 2, 1.5);
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(&[7u8; 12]).unwrap();
        f.write_all(&encode(&l, &field, ByteOrder::Native)).unwrap();
        f.flush().unwrap();

        let mut s = open_partitioned_stream(f.path(), 12).unwrap();
        assert_eq!(s.remaining_bytes(), Some(l.record_bytes(2) as u64));
        let rec = s.read_record::<f32>(&l, 2).unwrap().unwrap();
        assert_eq!(rec.valid(), field.view());
        assert!(s.read_record::<f32>(&l, 2).unwrap().is_none());
    }

    #[test]
    fn oversized_component_count_fails_before_reading() {
        let l = layout(2, 4, 2, 2, 1);
        let mut s = stream(encode(&l, &global(&l, 1, 0.0), ByteOrder::Native));
        let err = s.read_record::<f32>(&l, usize::MAX / 4).unwrap_err();
        assert!(matches!(err, PartitionError::InvalidConfig(_)));
        assert_eq!(s.remaining_bytes(), Some(l.record_bytes(1) as u64));
    }

    #[test]
    fn parses_byte_order() {
        assert_eq!("BE".parse::<ByteOrder>(), Ok(ByteOrder::Big));
        assert_eq!("little".parse::<ByteOrder>(), Ok(ByteOrder::Little));
        assert!("middle".parse::<ByteOrder>().is_err());
    }
}
