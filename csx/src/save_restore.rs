//! Binary serialization of a tuned matrix.
//!
//! The format is a flat little-endian field sequence:
//!
//! 1. `nr_threads` (u64), `symmetric` (u8).
//! 2. Per thread: `cpu` (u32), `id` (u32), `node` (i32); under the
//!    `numa` feature additionally `nnz` and `ctl_size` (u64 each), used
//!    to recompute the interleave plan on restore.
//! 3. Per thread, the partition: `nnz`, `ncols`, `nrows`, `ctl_size`,
//!    `row_start` (u64 each), raw `values`, raw `ctl`, the 64-entry
//!    id map (i64, −1 sentinel), `row_jumps` (u8) and `nrows` row-info
//!    triples (u64 each).
//! 4. Symmetric: `dvalues[nrows]` and the reduction map (`length` u32,
//!    `cpus`, `elems_pos`).
//! 5. `reordered` (u8) and, when set, the permutation (u64 per column).

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use log::info;

use crate::error::{Result, SparseError};
use crate::matrix::{CsxMatrix, CsxSymMatrix, RowInfo, ID_MAP_SIZE};
use crate::mt::{CompiledCsx, ReductionMap, SpmMt, SpmThread};
use crate::runtime::alloc;
use crate::runtime::config::RuntimeConfig;

/// Little-endian field writes over any byte sink.
trait WriteLe: Write {
    fn write_u8_le(&mut self, v: u8) -> std::io::Result<()> {
        self.write_all(&[v])
    }

    fn write_u32_le(&mut self, v: u32) -> std::io::Result<()> {
        self.write_all(&v.to_le_bytes())
    }

    fn write_i32_le(&mut self, v: i32) -> std::io::Result<()> {
        self.write_all(&v.to_le_bytes())
    }

    fn write_u64_le(&mut self, v: u64) -> std::io::Result<()> {
        self.write_all(&v.to_le_bytes())
    }

    fn write_i64_le(&mut self, v: i64) -> std::io::Result<()> {
        self.write_all(&v.to_le_bytes())
    }

    fn write_f64_le(&mut self, v: f64) -> std::io::Result<()> {
        self.write_all(&v.to_le_bytes())
    }

    fn write_f64_slice(&mut self, vs: &[f64]) -> std::io::Result<()> {
        for &v in vs {
            self.write_f64_le(v)?;
        }
        Ok(())
    }
}

impl<W: Write> WriteLe for W {}

/// Little-endian field reads over any byte source.
trait ReadLe: Read {
    fn read_u8_le(&mut self) -> std::io::Result<u8> {
        let mut buf = [0u8; 1];
        self.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    fn read_u32_le(&mut self) -> std::io::Result<u32> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    fn read_i32_le(&mut self) -> std::io::Result<i32> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(i32::from_le_bytes(buf))
    }

    fn read_u64_le(&mut self) -> std::io::Result<u64> {
        let mut buf = [0u8; 8];
        self.read_exact(&mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    fn read_i64_le(&mut self) -> std::io::Result<i64> {
        let mut buf = [0u8; 8];
        self.read_exact(&mut buf)?;
        Ok(i64::from_le_bytes(buf))
    }

    fn read_f64_le(&mut self) -> std::io::Result<f64> {
        let mut buf = [0u8; 8];
        self.read_exact(&mut buf)?;
        Ok(f64::from_le_bytes(buf))
    }

    fn read_f64_vec(&mut self, len: usize) -> std::io::Result<Vec<f64>> {
        (0..len).map(|_| self.read_f64_le()).collect()
    }
}

impl<R: Read> ReadLe for R {}

/// Writes a tuned matrix and its optional permutation to `path`.
pub fn save_csx<P: AsRef<Path>>(
    mt: &SpmMt,
    path: P,
    permutation: Option<&[usize]>,
) -> Result<()> {
    let file = File::create(path.as_ref())?;
    let mut w = BufWriter::new(file);

    w.write_u64_le(mt.nr_threads() as u64)?;
    w.write_u8_le(mt.symmetric as u8)?;

    for t in &mt.threads {
        w.write_u32_le(t.cpu as u32)?;
        w.write_u32_le(t.id as u32)?;
        w.write_i32_le(t.node)?;
        #[cfg(feature = "numa")]
        {
            let csx = t.matrix.lower();
            w.write_u64_le(csx.nnz as u64)?;
            w.write_u64_le(csx.ctl_size as u64)?;
        }
    }

    let mut ncols = 0;
    for t in &mt.threads {
        let csx = t.matrix.lower();
        ncols = csx.ncols;
        w.write_u64_le(csx.nnz as u64)?;
        w.write_u64_le(csx.ncols as u64)?;
        w.write_u64_le(csx.nrows as u64)?;
        w.write_u64_le(csx.ctl_size as u64)?;
        w.write_u64_le(csx.row_start as u64)?;
        w.write_f64_slice(&csx.values)?;
        w.write_all(&csx.ctl)?;
        for &id in &csx.id_map {
            w.write_i64_le(id)?;
        }
        w.write_u8_le(csx.row_jumps as u8)?;
        for ri in csx.rows_info.iter() {
            w.write_u64_le(ri.rowptr as u64)?;
            w.write_u64_le(ri.valptr as u64)?;
            w.write_u64_le(ri.span as u64)?;
        }

        if let CompiledCsx::Sym { csx, .. } = &t.matrix {
            w.write_f64_slice(&csx.dvalues)?;
            let map = t.map.as_ref().expect("symmetric thread without a map");
            w.write_u32_le(map.len() as u32)?;
            for &cpu in &map.cpus {
                w.write_u32_le(cpu)?;
            }
            for &pos in &map.elems_pos {
                w.write_u32_le(pos)?;
            }
        }
    }

    match permutation {
        Some(perm) => {
            w.write_u8_le(1)?;
            debug_assert_eq!(perm.len(), ncols);
            for &p in perm {
                w.write_u64_le(p as u64)?;
            }
        }
        None => w.write_u8_le(0)?,
    }

    w.flush()?;
    Ok(())
}

/// Reads a tuned matrix back and recompiles its kernels. The ctl column
/// mode (`full_colind`) is not part of the format and must match the
/// configuration the matrix was saved under.
pub fn restore_csx<P: AsRef<Path>>(
    path: P,
    config: &RuntimeConfig,
) -> Result<(SpmMt, Option<Vec<usize>>)> {
    let file = File::open(path.as_ref())?;
    let mut r = BufReader::new(file);

    let nr_threads = r.read_u64_le()? as usize;
    let symmetric = r.read_u8_le()? != 0;
    if nr_threads == 0 {
        return Err(SparseError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "zero threads in matrix file",
        )));
    }

    struct ThreadHeader {
        cpu: usize,
        id: usize,
        node: i32,
    }

    let mut headers = Vec::with_capacity(nr_threads);
    for _ in 0..nr_threads {
        let cpu = r.read_u32_le()? as usize;
        let id = r.read_u32_le()? as usize;
        let node = r.read_i32_le()?;
        // The per-thread sizes drive the node binding of the buffers
        // allocated below; reading them here keeps the cursor aligned.
        #[cfg(feature = "numa")]
        {
            let _nnz = r.read_u64_le()? as usize;
            let _ctl_size = r.read_u64_le()? as usize;
        }
        headers.push(ThreadHeader { cpu, id, node });
    }

    let mut threads = Vec::with_capacity(nr_threads);
    let mut total_rows = 0usize;
    let mut ncols = 0usize;

    for header in headers {
        let nnz = r.read_u64_le()? as usize;
        let csx_ncols = r.read_u64_le()? as usize;
        let nrows = r.read_u64_le()? as usize;
        let ctl_size = r.read_u64_le()? as usize;
        let row_start = r.read_u64_le()? as usize;

        let mut values = alloc::alloc_on_node(nnz, header.node);
        for v in values.iter_mut() {
            *v = r.read_f64_le()?;
        }
        let mut ctl = vec![0u8; ctl_size];
        r.read_exact(&mut ctl)?;

        let mut id_map = [-1i64; ID_MAP_SIZE];
        for slot in id_map.iter_mut() {
            *slot = r.read_i64_le()?;
        }
        let row_jumps = r.read_u8_le()? != 0;
        let mut rows_info = Vec::with_capacity(nrows);
        for _ in 0..nrows {
            rows_info.push(RowInfo {
                rowptr: r.read_u64_le()? as usize,
                valptr: r.read_u64_le()? as usize,
                span: r.read_u64_le()? as usize,
            });
        }

        let csx = CsxMatrix {
            nnz,
            ncols: csx_ncols,
            nrows,
            ctl_size,
            row_start,
            values: values.into_boxed_slice(),
            ctl: ctl.into_boxed_slice(),
            row_jumps,
            full_colind: config.full_colind,
            id_map,
            rows_info: rows_info.into_boxed_slice(),
        };

        let (matrix, map) = if symmetric {
            let dvalues = r.read_f64_vec(nrows)?.into_boxed_slice();
            let length = r.read_u32_le()? as usize;
            let mut map = ReductionMap::default();
            for _ in 0..length {
                map.cpus.push(r.read_u32_le()?);
            }
            for _ in 0..length {
                map.elems_pos.push(r.read_u32_le()?);
            }
            (
                CompiledCsx::sym(CsxSymMatrix { lower: csx, dvalues }),
                Some(map),
            )
        } else {
            (CompiledCsx::plain(csx), None)
        };

        total_rows += nrows;
        ncols = csx_ncols;
        threads.push(SpmThread {
            cpu: header.cpu,
            id: header.id,
            node: header.node,
            row_start,
            nr_rows: nrows,
            matrix,
            map,
        });
    }

    let reordered = r.read_u8_le()? != 0;
    let permutation = if reordered {
        let mut perm = Vec::with_capacity(ncols);
        for _ in 0..ncols {
            perm.push(r.read_u64_le()? as usize);
        }
        Some(perm)
    } else {
        None
    };

    info!(
        "restored tuned matrix: {nr_threads} threads, {total_rows} rows{}",
        if symmetric { " (symmetric)" } else { "" }
    );
    Ok((SpmMt::new(threads, symmetric, total_rows), permutation))
}
