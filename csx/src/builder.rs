//! The tuning pipeline: partition the input across workers, then on
//! each worker's own thread run the encoding search, emit the CSX form
//! and compile the specialized kernel, so every buffer is first-touched
//! on the node that will use it.

use std::time::Instant;

use log::info;

use crate::encoder::EncodingManager;
use crate::error::{Result, SparseError};
use crate::mt::{make_map, CompiledCsx, SpmMt, SpmThread};
use crate::partition::{SparsePartition, SparsePartitionSym};
use crate::runtime::affinity::set_affinity;
use crate::runtime::alloc::node_of_cpu;
use crate::runtime::config::RuntimeConfig;
use crate::writer::{make_csx_sym, CsxWriter};

/// Splits sorted 1-based points into `nr_threads` nnz-balanced
/// partitions covering all `nrows` rows.
fn partition_points(
    points: Vec<(usize, usize, f64)>,
    nrows: usize,
    ncols: usize,
    nnz: usize,
    nr_threads: usize,
) -> Vec<SparsePartition> {
    let mut iter = points.into_iter().peekable();
    let mut parts = Vec::with_capacity(nr_threads);
    let mut first_row = 1;
    let mut consumed = 0usize;

    for i in 0..nr_threads {
        let limit = if i + 1 == nr_threads {
            0
        } else {
            (nnz - consumed) / (nr_threads - i)
        };
        let mut part = SparsePartition::from_points(&mut iter, first_row, limit, ncols);
        let next_first = iter.peek().map_or(nrows + 1, |&(r, _, _)| r);
        part.set_nr_rows(next_first - first_row);
        consumed += part.nr_nonzeros();
        first_row = next_first;
        parts.push(part);
    }

    parts
}

/// Symmetric variant: partitions hold the lower triangle plus the
/// diagonal slice of their row range; balancing counts both.
fn partition_points_sym(
    points: Vec<(usize, usize, f64)>,
    nrows: usize,
    ncols: usize,
    nr_threads: usize,
) -> Vec<SparsePartitionSym> {
    let nnz_half: usize = points.iter().filter(|&&(r, c, _)| r >= c).count();
    let mut iter = points.into_iter().peekable();
    let mut parts = Vec::with_capacity(nr_threads);
    let mut first_row = 1;
    let mut consumed = 0usize;

    for i in 0..nr_threads {
        let limit = if i + 1 == nr_threads {
            0
        } else {
            (nnz_half - consumed) / (nr_threads - i)
        };
        let mut part = SparsePartitionSym::from_points(&mut iter, first_row, limit, ncols);
        let next_first = iter.peek().map_or(nrows + 1, |&(r, _, _)| r);
        let nr_rows = next_first - first_row;
        part.lower_mut().set_nr_rows(nr_rows);
        part.pad_diagonal(nr_rows);
        consumed += part.nr_nonzeros();
        first_row = next_first;
        parts.push(part);
    }

    parts
}

/// One worker's preprocessing: encoding search, CSX emission, kernel
/// compilation. Runs pinned on the worker's CPU.
fn preprocess_thread(
    mut spm: SparsePartition,
    config: &RuntimeConfig,
    id: usize,
    cpu: usize,
) -> Result<SpmThread> {
    set_affinity(cpu);
    info!("==> thread #{id}");

    let encode_start = Instant::now();
    let encseq = config.parsed_xform()?;
    {
        let mut mgr = EncodingManager::new(&mut spm, config)?;
        if encseq.is_explicit() {
            mgr.encode_serial(&encseq);
        } else {
            mgr.encode_all();
        }
    }
    let encode_time = encode_start.elapsed();

    let csx_start = Instant::now();
    let row_start = spm.row_start();
    let nr_rows = spm.nr_rows();
    let csx = CsxWriter::new(&spm, config.full_colind).make_csx(false);
    let matrix = CompiledCsx::plain(csx);
    info!(
        "thread #{id}: encoding {:.4}s, csx {:.4}s",
        encode_time.as_secs_f64(),
        csx_start.elapsed().as_secs_f64()
    );

    Ok(SpmThread {
        cpu,
        id,
        node: node_of_cpu(cpu),
        row_start,
        nr_rows,
        matrix,
        map: None,
    })
}

fn preprocess_thread_sym(
    mut spm_sym: SparsePartitionSym,
    config: &RuntimeConfig,
    id: usize,
    cpu: usize,
) -> Result<SpmThread> {
    set_affinity(cpu);
    info!("==> thread #{id}");

    let encseq = config.parsed_xform()?;
    let (mut m1, mut m2) = spm_sym.divide();
    for half in [&mut m1, &mut m2] {
        let mut mgr = EncodingManager::new(half, config)?;
        if encseq.is_explicit() {
            mgr.encode_serial(&encseq);
        } else {
            mgr.encode_all();
        }
    }
    spm_sym.merge(m1, m2);

    let row_start = spm_sym.lower().row_start();
    let nr_rows = spm_sym.lower().nr_rows();
    let csx = make_csx_sym(&spm_sym, config.full_colind);
    let matrix = CompiledCsx::sym(csx);

    Ok(SpmThread {
        cpu,
        id,
        node: node_of_cpu(cpu),
        row_start,
        nr_rows,
        matrix,
        map: None,
    })
}

/// Builds the tuned multithreaded matrix from sorted 1-based points.
///
/// For a symmetric build the points must describe the full matrix or
/// its lower triangle; upper-triangle points are dropped.
pub fn build_csx(
    points: Vec<(usize, usize, f64)>,
    nrows: usize,
    ncols: usize,
    config: &RuntimeConfig,
) -> Result<SpmMt> {
    let affinity = config.affinity()?;
    let nr_threads = affinity.len();
    set_affinity(affinity[0]);

    if config.symmetric {
        if nrows != ncols {
            return Err(SparseError::ArgInvalid(
                "symmetric matrices must be square",
            ));
        }
        let parts = partition_points_sym(points, nrows, ncols, nr_threads);
        let mut maps = make_map(&parts, ncols);

        let mut threads_out: Vec<Result<SpmThread>> = Vec::with_capacity(nr_threads);
        std::thread::scope(|scope| {
            let mut handles = Vec::new();
            for (i, part) in parts.into_iter().enumerate().rev() {
                if i == 0 {
                    threads_out.push(preprocess_thread_sym(part, config, 0, affinity[0]));
                } else {
                    let cpu = affinity[i];
                    handles.push((
                        i,
                        scope.spawn(move || preprocess_thread_sym(part, config, i, cpu)),
                    ));
                }
            }
            handles.sort_by_key(|&(i, _)| i);
            for (_, handle) in handles {
                threads_out.push(handle.join().expect("preprocessing thread panicked"));
            }
        });

        let mut threads = threads_out.into_iter().collect::<Result<Vec<_>>>()?;
        threads.sort_by_key(|t| t.id);
        for t in threads.iter_mut() {
            t.map = Some(std::mem::take(&mut maps[t.id]));
        }

        let mt = SpmMt::new(threads, true, nrows);
        mt.log_balance();
        Ok(mt)
    } else {
        let nnz = points.len();
        let parts = partition_points(points, nrows, ncols, nnz, nr_threads);

        let mut threads_out: Vec<Result<SpmThread>> = Vec::with_capacity(nr_threads);
        std::thread::scope(|scope| {
            let mut handles = Vec::new();
            for (i, part) in parts.into_iter().enumerate().rev() {
                if i == 0 {
                    threads_out.push(preprocess_thread(part, config, 0, affinity[0]));
                } else {
                    let cpu = affinity[i];
                    handles.push((
                        i,
                        scope.spawn(move || preprocess_thread(part, config, i, cpu)),
                    ));
                }
            }
            handles.sort_by_key(|&(i, _)| i);
            for (_, handle) in handles {
                threads_out.push(handle.join().expect("preprocessing thread panicked"));
            }
        });

        let mut threads = threads_out.into_iter().collect::<Result<Vec<_>>>()?;
        threads.sort_by_key(|t| t.id);

        let mt = SpmMt::new(threads, false, nrows);
        mt.log_balance();
        Ok(mt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_points_covers_all_rows() {
        let points: Vec<(usize, usize, f64)> =
            (1..=10).map(|r| (r, 1, r as f64)).collect();
        let parts = partition_points(points, 12, 4, 10, 3);
        assert_eq!(parts.len(), 3);
        let total_rows: usize = parts.iter().map(|p| p.nr_rows()).sum();
        assert_eq!(total_rows, 12);
        let total_nnz: usize = parts.iter().map(|p| p.nr_nonzeros()).sum();
        assert_eq!(total_nnz, 10);
        // Partitions are contiguous.
        assert_eq!(parts[0].row_start(), 0);
        assert_eq!(
            parts[1].row_start(),
            parts[0].row_start() + parts[0].nr_rows()
        );
    }

    #[test]
    fn test_partition_points_sym_diag_alignment() {
        // 4x4 lower + full diagonal split over 2 threads.
        let points = vec![
            (1, 1, 1.0),
            (2, 1, 0.5),
            (2, 2, 2.0),
            (3, 3, 3.0),
            (4, 2, 0.25),
            (4, 4, 4.0),
        ];
        let parts = partition_points_sym(points, 4, 4, 2);
        assert_eq!(parts.len(), 2);
        let total_rows: usize = parts.iter().map(|p| p.lower().nr_rows()).sum();
        assert_eq!(total_rows, 4);
        for p in &parts {
            assert_eq!(p.diagonal().len(), p.lower().nr_rows());
        }
        // Diagonal sum preserved (missing entries padded with zero).
        let dsum: f64 = parts.iter().flat_map(|p| p.diagonal()).sum();
        assert_eq!(dsum, 10.0);
    }

    #[test]
    fn test_build_csx_single_thread() {
        let points = vec![(1, 1, 1.0), (1, 3, 2.0), (2, 2, 3.0), (3, 1, 4.0), (3, 3, 5.0)];
        let config = RuntimeConfig::default();
        let mt = build_csx(points, 3, 3, &config).unwrap();
        assert_eq!(mt.nr_threads(), 1);
        assert_eq!(mt.nnz(), 5);
        assert!(!mt.symmetric);
    }

    #[test]
    fn test_build_csx_multi_thread() {
        let mut points = Vec::new();
        for r in 1..=40usize {
            for c in 1..=4usize {
                points.push((r, c + (r % 3), (r * c) as f64));
            }
        }
        let nnz = points.len();
        let mut config = RuntimeConfig::default();
        config.nr_threads = 4;
        let mt = build_csx(points, 40, 8, &config).unwrap();
        assert_eq!(mt.nr_threads(), 4);
        assert_eq!(mt.nnz(), nnz);
        let rows: usize = mt.threads.iter().map(|t| t.nr_rows).sum();
        assert_eq!(rows, 40);
    }
}
