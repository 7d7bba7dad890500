//! The user-facing surface: input handles, the tuned matrix, and the
//! multiply entry points.

use std::path::Path;

use log::warn;

use crate::builder::build_csx;
use crate::csr::{CsrMatrix, Indexing, PartitionPlan};
use crate::error::{Result, SparseError};
use crate::get_set;
use crate::mmf::MmfMatrix;
use crate::mt::{CompiledCsx, SpmMt, SpmvJob};
use crate::runtime::config::RuntimeConfig;
use crate::runtime::pool::ThreadPool;
use crate::vector::Vector;

/// An input matrix, loaded but not yet tuned.
#[derive(Debug, Clone)]
pub struct Input {
    nrows: usize,
    ncols: usize,
    /// 1-based, row-major sorted. For a symmetric matrix-market file
    /// only the stored triangle.
    points: Vec<(usize, usize, f64)>,
    /// The source was a symmetric matrix-market file.
    file_symmetric: bool,
}

impl Input {
    /// Wraps caller-provided CSR arrays, validating them.
    pub fn from_csr(
        rowptr: &[usize],
        colind: &[usize],
        values: &[f64],
        nrows: usize,
        ncols: usize,
        indexing: Indexing,
    ) -> Result<Input> {
        let csr = CsrMatrix::new(rowptr, colind, values, nrows, ncols, indexing)?;
        Ok(Input {
            nrows,
            ncols,
            points: csr.points(),
            file_symmetric: false,
        })
    }

    /// Loads a matrix-market file.
    pub fn from_mmf<P: AsRef<Path>>(path: P) -> Result<Input> {
        let mmf = MmfMatrix::read(path)?;
        let file_symmetric = mmf.symmetric;
        let points = if file_symmetric {
            mmf.stored_points().to_vec()
        } else {
            mmf.full_points()
        };
        Ok(Input {
            nrows: mmf.nrows,
            ncols: mmf.ncols,
            points,
            file_symmetric,
        })
    }

    pub fn nrows(&self) -> usize {
        self.nrows
    }

    pub fn ncols(&self) -> usize {
        self.ncols
    }

    /// Points of the represented matrix under the requested view.
    fn points_for(&self, symmetric: bool) -> Vec<(usize, usize, f64)> {
        if self.file_symmetric && !symmetric {
            // Mirror the stored triangle into a full matrix.
            let mut points = self.points.clone();
            for &(r, c, v) in &self.points {
                if r != c {
                    points.push((c, r, v));
                }
            }
            points.sort_by_key(|&(r, c, _)| (r, c));
            points
        } else {
            // The symmetric builder drops upper-triangle points itself.
            self.points.clone()
        }
    }
}

/// The tuned matrix handle: per-thread CSX partitions, their kernels
/// and the persistent worker pool that executes them.
pub struct Matrix {
    mt: SpmMt,
    pool: ThreadPool,
    nrows: usize,
    ncols: usize,
    nnz: usize,
    symmetric: bool,
    permutation: Option<Vec<usize>>,
}

impl Matrix {
    /// Preprocesses `input` into CSX form per `config` and compiles the
    /// per-partition kernels.
    pub fn tune(input: &Input, config: &RuntimeConfig) -> Result<Matrix> {
        Matrix::do_tune(input, config, None)
    }

    /// Like [`Matrix::tune`] but first applies a row/column permutation
    /// (e.g. an RCM ordering computed elsewhere). The permutation maps
    /// old 0-based indices to new ones and is honored by entry access
    /// and persisted by [`Matrix::save`].
    pub fn tune_reordered(
        input: &Input,
        config: &RuntimeConfig,
        permutation: Vec<usize>,
    ) -> Result<Matrix> {
        if permutation.len() != input.ncols {
            return Err(SparseError::ArgInvalid("permutation size mismatch"));
        }
        Matrix::do_tune(input, config, Some(permutation))
    }

    fn do_tune(
        input: &Input,
        config: &RuntimeConfig,
        permutation: Option<Vec<usize>>,
    ) -> Result<Matrix> {
        config.check()?;
        let mut points = input.points_for(config.symmetric);
        if let Some(perm) = &permutation {
            if config.symmetric {
                // Keep the lower-triangle property under relabeling.
                for p in points.iter_mut() {
                    let (r, c) = (perm[p.0 - 1] + 1, perm[p.1 - 1] + 1);
                    *p = (r.max(c), r.min(c), p.2);
                }
            } else {
                for p in points.iter_mut() {
                    *p = (perm[p.0 - 1] + 1, perm[p.1 - 1] + 1, p.2);
                }
            }
            points.sort_by_key(|&(r, c, _)| (r, c));
        }

        let nnz = if config.symmetric {
            points
                .iter()
                .filter(|&&(r, c, _)| r > c)
                .count()
                .checked_mul(2)
                .unwrap()
                + points.iter().filter(|&&(r, c, _)| r == c).count()
        } else {
            points.len()
        };

        let mt = build_csx(points, input.nrows, input.ncols, config)?;
        let pool = ThreadPool::new(&config.affinity()?);
        Ok(Matrix {
            mt,
            pool,
            nrows: input.nrows,
            ncols: input.ncols,
            nnz,
            symmetric: config.symmetric,
            permutation,
        })
    }

    pub fn nrows(&self) -> usize {
        self.nrows
    }

    pub fn ncols(&self) -> usize {
        self.ncols
    }

    pub fn nnz(&self) -> usize {
        self.nnz
    }

    pub fn permutation(&self) -> Option<&[usize]> {
        self.permutation.as_deref()
    }

    /// The row split across workers with each part's NUMA node.
    pub fn partition(&self) -> PartitionPlan {
        PartitionPlan {
            parts: self.mt.threads.iter().map(|t| t.nr_rows).collect(),
            nodes: self.mt.threads.iter().map(|t| t.node).collect(),
        }
    }

    /// Compressed size in bytes.
    pub fn size_bytes(&self) -> usize {
        self.mt.size_bytes()
    }

    /// The per-thread partitions, for inspection.
    pub(crate) fn mt(&self) -> &SpmMt {
        &self.mt
    }

    fn check_entry_args(&self, row: usize, col: usize, indexing: Indexing) -> Result<(usize, usize)> {
        let base = indexing.base();
        if row < base || col < base {
            return Err(SparseError::ArgInvalid("entry index below base"));
        }
        let (mut row, mut col) = (row + 1 - base, col + 1 - base);
        if row == 0 || row > self.nrows || col == 0 || col > self.ncols {
            return Err(SparseError::ArgInvalid("entry index out of bounds"));
        }
        if let Some(perm) = &self.permutation {
            row = perm[row - 1] + 1;
            col = perm[col - 1] + 1;
        }
        Ok((row, col))
    }

    fn owning_thread(&self, row: usize) -> usize {
        self.mt
            .threads
            .iter()
            .position(|t| row <= t.row_start + t.nr_rows)
            .expect("row not covered by any partition")
    }

    /// Reads one entry. A structurally-zero entry reads as 0.
    pub fn get_entry(&self, row: usize, col: usize, indexing: Indexing) -> Result<f64> {
        let (mut row, mut col) = self.check_entry_args(row, col, indexing)?;
        if self.symmetric && row < col {
            std::mem::swap(&mut row, &mut col);
        }

        let t = &self.mt.threads[self.owning_thread(row)];
        match &t.matrix {
            CompiledCsx::Plain { csx, .. } => Ok(get_set::get_value(csx, row, col).unwrap_or(0.0)),
            CompiledCsx::Sym { csx, .. } => {
                if row == col {
                    Ok(csx.dvalues[row - csx.lower.row_start - 1])
                } else {
                    Ok(get_set::get_value(&csx.lower, row, col).unwrap_or(0.0))
                }
            }
        }
    }

    /// Overwrites one entry in place. Fails with
    /// [`SparseError::EntryNotFound`] for a structurally-zero entry; the
    /// matrix structure never changes.
    pub fn set_entry(&mut self, row: usize, col: usize, value: f64, indexing: Indexing) -> Result<()> {
        let (mut row, mut col) = self.check_entry_args(row, col, indexing)?;
        if self.symmetric && row < col {
            std::mem::swap(&mut row, &mut col);
        }

        let tid = self.owning_thread(row);
        let t = &mut self.mt.threads[tid];
        let found = match &mut t.matrix {
            CompiledCsx::Plain { csx, .. } => get_set::set_value(csx, row, col, value),
            CompiledCsx::Sym { csx, .. } => {
                if row == col {
                    csx.dvalues[row - csx.lower.row_start - 1] = value;
                    true
                } else {
                    get_set::set_value(&mut csx.lower, row, col, value)
                }
            }
        };

        if found {
            Ok(())
        } else {
            warn!("set_entry({row}, {col}): entry not found");
            Err(SparseError::EntryNotFound)
        }
    }

    /// Persists the tuned matrix.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        crate::save_restore::save_csx(&self.mt, path, self.permutation.as_deref())
    }

    /// Reloads a tuned matrix saved with [`Matrix::save`]. The
    /// configuration supplies the worker placement and must match the
    /// ctl column mode the matrix was saved under.
    pub fn restore<P: AsRef<Path>>(path: P, config: &RuntimeConfig) -> Result<Matrix> {
        let (mt, permutation) = crate::save_restore::restore_csx(path, config)?;
        let nrows = mt.threads.iter().map(|t| t.nr_rows).sum();
        let ncols = mt
            .threads
            .first()
            .map(|t| t.matrix.lower().ncols)
            .unwrap_or(0);
        let nnz = mt.nnz();
        let symmetric = mt.symmetric;

        let cpus: Vec<usize> = mt.threads.iter().map(|t| t.cpu).collect();
        let pool = ThreadPool::new(&cpus);
        Ok(Matrix {
            mt,
            pool,
            nrows,
            ncols,
            nnz,
            symmetric,
            permutation,
        })
    }
}

impl std::fmt::Debug for Matrix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Matrix")
            .field("nrows", &self.nrows)
            .field("ncols", &self.ncols)
            .field("nnz", &self.nnz)
            .field("symmetric", &self.symmetric)
            .field("nr_threads", &self.mt.nr_threads())
            .finish()
    }
}

fn check_vectors(a: &Matrix, x: &Vector, y: &Vector) -> Result<()> {
    if x.len() != a.ncols {
        return Err(SparseError::ArgInvalid("x does not match matrix columns"));
    }
    if y.len() != a.nrows {
        return Err(SparseError::ArgInvalid("y does not match matrix rows"));
    }
    Ok(())
}

/// `y = alpha * A * x`.
pub fn matvec_mult(alpha: f64, a: &Matrix, x: &Vector, y: &mut Vector) -> Result<()> {
    matvec(alpha, a, x, 0.0, y)
}

/// `y = alpha * A * x + beta * y`.
pub fn matvec_kernel(alpha: f64, a: &Matrix, x: &Vector, beta: f64, y: &mut Vector) -> Result<()> {
    matvec(alpha, a, x, beta, y)
}

fn matvec(alpha: f64, a: &Matrix, x: &Vector, beta: f64, y: &mut Vector) -> Result<()> {
    check_vectors(a, x, y)?;
    let job = SpmvJob {
        mt: &a.mt,
        x: x.as_slice().as_ptr(),
        x_len: x.len(),
        y: y.as_mut_slice().as_mut_ptr(),
        y_len: y.len(),
        alpha,
        beta,
    };
    a.pool.run(job);
    Ok(())
}

/// The CSR fallback kernel: `y = alpha * A * x + beta * y` straight off
/// the caller's CSR arrays, used as the reference path.
#[allow(clippy::too_many_arguments)]
pub fn csr_matvec_kernel(
    rowptr: &[usize],
    colind: &[usize],
    values: &[f64],
    nrows: usize,
    ncols: usize,
    indexing: Indexing,
    alpha: f64,
    x: &Vector,
    beta: f64,
    y: &mut Vector,
) -> Result<()> {
    let csr = CsrMatrix::new(rowptr, colind, values, nrows, ncols, indexing)?;
    if x.len() != ncols || y.len() != nrows {
        return Err(SparseError::ArgInvalid("vector dimension mismatch"));
    }
    csr.spmv(alpha, x.as_slice(), beta, y.as_mut_slice());
    Ok(())
}
