//! The multithreaded tuned matrix: per-thread CSX partitions, their
//! compiled kernels, the symmetric reduction map, and the job body the
//! worker pool dispatches.

use std::cell::UnsafeCell;

use log::debug;

use crate::kernel::{KernelPlan, SymKernelPlan};
use crate::matrix::{CsxMatrix, CsxSymMatrix};
use crate::partition::SparsePartitionSym;
use crate::runtime::pool::BarrierCtx;

/// Per-thread list of (source thread, column) pairs whose transposed
/// contributions this thread folds into `y` after the compute phase.
#[derive(Debug, Clone, Default)]
pub struct ReductionMap {
    pub cpus: Vec<u32>,
    /// 0-based global columns.
    pub elems_pos: Vec<u32>,
}

impl ReductionMap {
    pub fn len(&self) -> usize {
        self.cpus.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cpus.is_empty()
    }
}

/// One partition in final form together with its specialized kernel.
pub enum CompiledCsx {
    Plain { csx: CsxMatrix, plan: KernelPlan },
    Sym { csx: CsxSymMatrix, plan: SymKernelPlan },
}

impl CompiledCsx {
    pub fn plain(csx: CsxMatrix) -> CompiledCsx {
        let plan = KernelPlan::compile(&csx);
        CompiledCsx::Plain { csx, plan }
    }

    pub fn sym(csx: CsxSymMatrix) -> CompiledCsx {
        let plan = SymKernelPlan::compile(&csx);
        CompiledCsx::Sym { csx, plan }
    }

    pub fn lower(&self) -> &CsxMatrix {
        match self {
            CompiledCsx::Plain { csx, .. } => csx,
            CompiledCsx::Sym { csx, .. } => &csx.lower,
        }
    }

    pub fn size_bytes(&self) -> usize {
        match self {
            CompiledCsx::Plain { csx, .. } => csx.size_bytes(),
            CompiledCsx::Sym { csx, .. } => csx.size_bytes(),
        }
    }
}

impl std::fmt::Debug for CompiledCsx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompiledCsx::Plain { csx, .. } => write!(f, "Plain({} nnz)", csx.nnz),
            CompiledCsx::Sym { csx, .. } => write!(f, "Sym({} nnz)", csx.lower.nnz),
        }
    }
}

/// Descriptor of one worker's share of the matrix.
#[derive(Debug)]
pub struct SpmThread {
    pub cpu: usize,
    pub id: usize,
    pub node: i32,
    pub row_start: usize,
    pub nr_rows: usize,
    pub matrix: CompiledCsx,
    pub map: Option<ReductionMap>,
}

/// A worker-local accumulation buffer, written by its owner during the
/// compute phase and read by the destination threads after the
/// reduction barrier.
pub(crate) struct LocalBuffer(UnsafeCell<Vec<f64>>);

unsafe impl Sync for LocalBuffer {}

impl LocalBuffer {
    fn new(len: usize) -> LocalBuffer {
        LocalBuffer(UnsafeCell::new(vec![0.0; len]))
    }

    /// Exclusive access for the owning thread during its compute phase.
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn owner_mut(&self) -> &mut Vec<f64> {
        &mut *self.0.get()
    }

    /// Shared access after the reduction barrier.
    pub(crate) unsafe fn shared(&self) -> &Vec<f64> {
        &*self.0.get()
    }
}

impl std::fmt::Debug for LocalBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "LocalBuffer")
    }
}

/// The tuned matrix, one entry per worker.
#[derive(Debug)]
pub struct SpmMt {
    pub threads: Vec<SpmThread>,
    pub symmetric: bool,
    pub(crate) local_buffers: Vec<LocalBuffer>,
}

impl SpmMt {
    pub fn new(threads: Vec<SpmThread>, symmetric: bool, nrows: usize) -> SpmMt {
        let nr_threads = threads.len();
        let local_buffers = if symmetric {
            (0..nr_threads).map(|_| LocalBuffer::new(nrows)).collect()
        } else {
            Vec::new()
        };
        SpmMt {
            threads,
            symmetric,
            local_buffers,
        }
    }

    pub fn nr_threads(&self) -> usize {
        self.threads.len()
    }

    pub fn nnz(&self) -> usize {
        self.threads
            .iter()
            .map(|t| match &t.matrix {
                CompiledCsx::Plain { csx, .. } => csx.nnz,
                CompiledCsx::Sym { csx, .. } => csx.lower.nnz + csx.dvalues.len(),
            })
            .sum()
    }

    /// Compressed size in bytes, summed over partitions.
    pub fn size_bytes(&self) -> usize {
        self.threads.iter().map(|t| t.matrix.size_bytes()).sum()
    }

    /// Logs the per-thread nnz balance after tuning.
    pub fn log_balance(&self) {
        for t in &self.threads {
            debug!(
                "thread {} on cpu {} (node {}): rows [{}, {}), {:?}",
                t.id,
                t.cpu,
                t.node,
                t.row_start,
                t.row_start + t.nr_rows,
                t.matrix
            );
        }
    }
}

/// One SpMV dispatch: raw views of the vectors, shareable with the
/// persistent workers. Each worker touches only its partition's row
/// range of `y` (plus its reduction columns, which are disjoint across
/// threads by construction of the maps).
#[derive(Clone, Copy)]
pub(crate) struct SpmvJob {
    pub mt: *const SpmMt,
    pub x: *const f64,
    pub x_len: usize,
    pub y: *mut f64,
    pub y_len: usize,
    pub alpha: f64,
    pub beta: f64,
}

unsafe impl Send for SpmvJob {}
unsafe impl Sync for SpmvJob {}

/// Executes thread `tid`'s share of one SpMV. Runs on the pinned worker
/// owning partition `tid` (the calling thread doubles as worker 0).
pub(crate) fn run_job(job: &SpmvJob, tid: usize, barrier: &mut BarrierCtx<'_>) {
    let mt = unsafe { &*job.mt };
    let t = &mt.threads[tid];
    let x = unsafe { std::slice::from_raw_parts(job.x, job.x_len) };
    debug_assert!(t.row_start + t.nr_rows <= job.y_len);

    match &t.matrix {
        CompiledCsx::Plain { csx, plan } => {
            let y_part =
                unsafe { std::slice::from_raw_parts_mut(job.y.add(t.row_start), t.nr_rows) };
            if job.beta != 1.0 {
                for v in y_part.iter_mut() {
                    *v *= job.beta;
                }
            }
            plan.spmv(csx, x, y_part, job.alpha);
        }
        CompiledCsx::Sym { csx, plan } => {
            {
                let tmp = unsafe { mt.local_buffers[tid].owner_mut() };
                tmp[..t.row_start].fill(0.0);

                let y_part =
                    unsafe { std::slice::from_raw_parts_mut(job.y.add(t.row_start), t.nr_rows) };
                if job.beta != 1.0 {
                    for v in y_part.iter_mut() {
                        *v *= job.beta;
                    }
                }
                plan.spmv_sym(csx, x, y_part, tmp, job.alpha);
            }

            // All local buffers must be complete before gathering.
            barrier.wait();

            if let Some(map) = &t.map {
                for k in 0..map.len() {
                    let src = map.cpus[k] as usize;
                    let pos = map.elems_pos[k] as usize;
                    let tmp_src = unsafe { mt.local_buffers[src].shared() };
                    // Disjoint across threads: each column belongs to
                    // exactly one destination map.
                    unsafe {
                        *job.y.add(pos) += tmp_src[pos];
                    }
                }
            }
        }
    }
}

/// Builds the per-thread reduction maps from the symmetric partitions:
/// for every column left of a partition's row range, record which source
/// threads touch it, then hand columns out in balanced contiguous
/// chunks.
pub fn make_map(parts: &[SparsePartitionSym], ncols: usize) -> Vec<ReductionMap> {
    let ncpus = parts.len();
    let n = ncols + 1; // 1-based columns
    let mut count = vec![0u32; n];
    let mut initial_map = vec![vec![false; n]; ncpus];

    for (i, sym) in parts.iter().enumerate() {
        let spm = sym.lower();
        let start = spm.row_start();
        for ridx in 0..spm.rowptr_len() - 1 {
            for e in spm.row_elems(ridx) {
                let col = e.col();
                if col < start + 1 && !initial_map[i][col] {
                    initial_map[i][col] = true;
                    count[col] += 1;
                }
            }
        }
    }

    let mut total_count: u32 = count.iter().sum();
    let mut maps = Vec::with_capacity(ncpus);
    let mut end = 0usize;

    for i in 0..ncpus {
        let start = end;
        let mut temp_count = 0;
        if i + 1 == ncpus {
            end = n;
            temp_count = total_count;
        } else {
            let limit = total_count / (ncpus - i) as u32;
            while temp_count < limit {
                temp_count += count[end];
                end += 1;
            }
            total_count -= temp_count;
        }

        let mut map = ReductionMap::default();
        for (j, cnt) in count.iter().enumerate().take(end).skip(start) {
            if *cnt == 0 {
                continue;
            }
            for (k, imap) in initial_map.iter().enumerate() {
                if imap[j] {
                    map.cpus.push(k as u32);
                    map.elems_pos.push((j - 1) as u32);
                }
            }
        }
        debug_assert_eq!(map.len(), temp_count as usize);
        maps.push(map);
    }

    maps
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_make_map_balances_columns() {
        // Two symmetric partitions of a 6x6 matrix: rows 1..3 and 4..6.
        let points1 = vec![(1, 1, 1.0), (2, 1, 1.0), (3, 2, 1.0)];
        let points2 = vec![(4, 1, 1.0), (4, 3, 1.0), (5, 2, 1.0), (6, 6, 1.0)];

        let mut it1 = points1.into_iter().peekable();
        let p1 = SparsePartitionSym::from_points(&mut it1, 1, 0, 6);
        let mut it2 = points2.into_iter().peekable();
        let p2 = SparsePartitionSym::from_points(&mut it2, 4, 0, 6);

        let maps = make_map(&[p1, p2], 6);
        assert_eq!(maps.len(), 2);
        // Partition 2 (row_start 3) reaches columns 1, 2, 3; partition 1
        // has row_start 0 and contributes nothing.
        let total: usize = maps.iter().map(ReductionMap::len).sum();
        assert_eq!(total, 3);
        assert!(maps.iter().flat_map(|m| &m.cpus).all(|&c| c == 1));
        // Every column appears in exactly one destination map.
        let mut cols: Vec<u32> = maps.iter().flat_map(|m| m.elems_pos.clone()).collect();
        cols.sort_unstable();
        assert_eq!(cols, vec![0, 1, 2]);
    }
}
