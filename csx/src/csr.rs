//! CSR input handling: validation, iteration in coordinate form, the
//! reference multiply kernel and the nnz-balanced row partitioner.

use crate::error::{Result, SparseError};

/// How the caller's index arrays are based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Indexing {
    #[default]
    ZeroBased,
    OneBased,
}

impl Indexing {
    pub fn base(self) -> usize {
        match self {
            Indexing::ZeroBased => 0,
            Indexing::OneBased => 1,
        }
    }
}

/// A validated CSR matrix (indices normalized to 0-based).
#[derive(Debug, Clone)]
pub struct CsrMatrix {
    pub nrows: usize,
    pub ncols: usize,
    rowptr: Vec<usize>,
    colind: Vec<usize>,
    values: Vec<f64>,
}

impl CsrMatrix {
    pub fn new(
        rowptr: &[usize],
        colind: &[usize],
        values: &[f64],
        nrows: usize,
        ncols: usize,
        indexing: Indexing,
    ) -> Result<CsrMatrix> {
        if nrows == 0 || ncols == 0 {
            return Err(SparseError::ArgInvalid("zero matrix dimension"));
        }
        if rowptr.len() != nrows + 1 {
            return Err(SparseError::InputMatrix(format!(
                "rowptr holds {} entries for {} rows",
                rowptr.len(),
                nrows
            )));
        }

        let base = indexing.base();
        if rowptr[0] != base {
            return Err(SparseError::InputMatrix(format!(
                "rowptr starts at {}, expected {base}",
                rowptr[0]
            )));
        }
        for w in rowptr.windows(2) {
            if w[1] < w[0] {
                return Err(SparseError::InputMatrix(
                    "rowptr is not monotonically non-decreasing".to_string(),
                ));
            }
        }

        let nnz = rowptr[nrows] - base;
        if colind.len() != nnz || values.len() != nnz {
            return Err(SparseError::InputMatrix(format!(
                "rowptr promises {nnz} nonzeros, colind holds {} and values {}",
                colind.len(),
                values.len()
            )));
        }
        for &c in colind {
            if c < base || c - base >= ncols {
                return Err(SparseError::InputMatrix(format!(
                    "column index {c} out of range"
                )));
            }
        }

        Ok(CsrMatrix {
            nrows,
            ncols,
            rowptr: rowptr.iter().map(|&p| p - base).collect(),
            colind: colind.iter().map(|&c| c - base).collect(),
            values: values.to_vec(),
        })
    }

    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    /// Nonzeros as 1-based `(row, col, value)` points in row-major
    /// order, columns ascending within each row.
    pub fn points(&self) -> Vec<(usize, usize, f64)> {
        let mut points = Vec::with_capacity(self.nnz());
        for i in 0..self.nrows {
            let mut row: Vec<(usize, usize, f64)> = (self.rowptr[i]..self.rowptr[i + 1])
                .map(|j| (i + 1, self.colind[j] + 1, self.values[j]))
                .collect();
            row.sort_by_key(|&(_, c, _)| c);
            points.extend(row);
        }
        points
    }

    /// The reference kernel: `y = alpha * A * x + beta * y`.
    pub fn spmv(&self, alpha: f64, x: &[f64], beta: f64, y: &mut [f64]) {
        for i in 0..self.nrows {
            let mut yr = 0.0;
            for j in self.rowptr[i]..self.rowptr[i + 1] {
                yr += self.values[j] * x[self.colind[j]];
            }
            y[i] = alpha * yr + beta * y[i];
        }
    }
}

/// The row split of a matrix across workers, with each part's NUMA
/// node. Used to interleave shared vectors proportionally.
#[derive(Debug, Clone)]
pub struct PartitionPlan {
    /// Rows per partition.
    pub parts: Vec<usize>,
    pub nodes: Vec<i32>,
}

impl PartitionPlan {
    pub fn nr_partitions(&self) -> usize {
        self.parts.len()
    }
}

/// Splits `nr_rows` rows into `nr_threads` partitions at row boundaries
/// so the nonzero counts stay as equal as row granularity allows, and
/// reports the NUMA node each partition's worker runs on.
pub fn partition_csr(
    rowptr: &[usize],
    nr_rows: usize,
    nr_threads: usize,
    cpu_affinity: &[usize],
) -> Result<PartitionPlan> {
    if nr_threads == 0 {
        return Err(SparseError::ArgInvalid("zero partitions requested"));
    }
    if rowptr.len() != nr_rows + 1 {
        return Err(SparseError::InputMatrix(
            "rowptr length does not match row count".to_string(),
        ));
    }

    let base = rowptr[0];
    let total_nnz = rowptr[nr_rows] - base;
    let mut parts = Vec::with_capacity(nr_threads);
    let mut row = 0usize;
    let mut consumed = 0usize;

    for i in 0..nr_threads {
        let remaining = nr_threads - i;
        let target = (total_nnz - consumed + remaining - 1) / remaining;
        let row_start = row;
        let mut part_nnz = 0usize;
        while row < nr_rows && (part_nnz < target || remaining == 1) {
            part_nnz += rowptr[row + 1] - rowptr[row];
            row += 1;
        }
        consumed += part_nnz;
        parts.push(row - row_start);
    }
    // Whatever rows remain (all-empty tails) belong to the last part.
    if row < nr_rows {
        *parts.last_mut().unwrap() += nr_rows - row;
    }

    let nodes = (0..nr_threads)
        .map(|i| {
            let cpu = cpu_affinity.get(i).copied().unwrap_or(i);
            crate::runtime::alloc::node_of_cpu(cpu)
        })
        .collect();

    Ok(PartitionPlan { parts, nodes })
}
