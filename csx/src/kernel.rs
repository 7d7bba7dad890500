//! Per-partition SpMV kernel specialization.
//!
//! From a partition's id map the compiler materializes a dispatch table
//! with exactly one micro-kernel function pointer per pattern id present;
//! unused types contribute no entries. The executor is a single sweep of
//! the ctl stream: read the flag and size bytes, run the row-advance
//! hook on the new-row bit, apply the configured x-advance (variable
//! column delta or absolute fixed-width column), then jump through the
//! table.
//!
//! Block micro-kernels are monomorphized over the alignment; linear
//! kernels take the stride as the table parameter.

use crate::ctl::{test_bit, CTL_NR_BIT, CTL_PATTERN_MASK, CTL_RJMP_BIT, FULL_COLIND_SIZE};
use crate::encodings::EncodingType;
use crate::matrix::{CsxMatrix, CsxSymMatrix};

/// Sweep state shared by all micro-kernels of one run.
///
/// `y` covers exactly this partition's row range, so `ycur` is relative
/// to the partition; `x` is the full input vector.
struct Sweep<'a> {
    ctl: &'a [u8],
    pos: usize,
    vals: &'a [f64],
    vpos: usize,
    x: &'a [f64],
    y: &'a mut [f64],
    /// Current row, relative to the partition start.
    ycur: usize,
    /// 0-based column of the last element covered in this row.
    cur_col: usize,
    scale: f64,
}

type UnitFn = fn(&mut Sweep, usize, usize);

#[derive(Clone, Copy)]
struct CompiledUnit {
    f: UnitFn,
    /// Stride for linear kernels, the free block dimension for block
    /// kernels, unused for delta kernels.
    param: usize,
}

/// The specialized multiply routine for one partition.
pub struct KernelPlan {
    units: Vec<CompiledUnit>,
    full_colind: bool,
}

impl KernelPlan {
    /// Builds the dispatch table from the partition's id map.
    pub fn compile(csx: &CsxMatrix) -> KernelPlan {
        let mut units = Vec::with_capacity(csx.nr_patterns());
        for patt_id in 0..csx.nr_patterns() {
            units.push(compile_unit(csx, patt_id as u8));
        }
        KernelPlan {
            units,
            full_colind: csx.full_colind,
        }
    }

    /// `y += scale * A * x` over this partition's rows; `y` is the
    /// partition's slice of the output vector.
    pub fn spmv(&self, csx: &CsxMatrix, x: &[f64], y: &mut [f64], scale: f64) {
        debug_assert_eq!(y.len(), csx.nrows);
        let mut s = Sweep {
            ctl: &csx.ctl,
            pos: 0,
            vals: &csx.values,
            vpos: 0,
            x,
            y,
            ycur: 0,
            cur_col: 0,
            scale,
        };

        while s.pos < csx.ctl_size {
            let flags = s.ctl[s.pos];
            let size = s.ctl[s.pos + 1];
            s.pos += 2;

            if test_bit(flags, CTL_NR_BIT) {
                if test_bit(flags, CTL_RJMP_BIT) {
                    s.ycur += csx_util::read_uvarint(s.ctl, &mut s.pos) as usize;
                } else {
                    s.ycur += 1;
                }
                s.cur_col = 0;
            }

            next_x(&mut s, self.full_colind);
            let unit = self.units[(flags & CTL_PATTERN_MASK) as usize];
            (unit.f)(&mut s, size as usize, unit.param);
        }

        debug_assert_eq!(s.vpos, csx.nnz, "values cursor mismatch");
    }
}

fn next_x(s: &mut Sweep, full_colind: bool) {
    if full_colind {
        #[cfg(feature = "ptr-align")]
        align_pos(&mut s.pos, FULL_COLIND_SIZE);
        s.cur_col = csx_util::read_fixed_int(s.ctl, &mut s.pos, FULL_COLIND_SIZE) as usize;
    } else {
        s.cur_col += csx_util::read_uvarint(s.ctl, &mut s.pos) as usize;
    }
}

#[cfg(feature = "ptr-align")]
fn align_pos(pos: &mut usize, boundary: usize) {
    *pos = (*pos + boundary - 1) & !(boundary - 1);
}

fn compile_unit(csx: &CsxMatrix, patt_id: u8) -> CompiledUnit {
    use EncodingType::*;
    let inst = csx.instantiation(patt_id);
    match inst.ty {
        EncodingType::None => CompiledUnit {
            f: match inst.delta {
                8 => delta_unit::<1>,
                16 => delta_unit::<2>,
                32 => delta_unit::<4>,
                64 => delta_unit::<8>,
                other => panic!("bad delta width: {other}"),
            },
            param: 0,
        },
        Horizontal => CompiledUnit {
            f: horizontal_unit,
            param: inst.delta,
        },
        Vertical => CompiledUnit {
            f: vertical_unit,
            param: inst.delta,
        },
        Diagonal => CompiledUnit {
            f: diagonal_unit,
            param: inst.delta,
        },
        AntiDiagonal => CompiledUnit {
            f: antidiagonal_unit,
            param: inst.delta,
        },
        ty if ty.is_block_row() => CompiledUnit {
            f: match ty.block_alignment() {
                1 => block_row_unit::<1>,
                2 => block_row_unit::<2>,
                3 => block_row_unit::<3>,
                4 => block_row_unit::<4>,
                5 => block_row_unit::<5>,
                6 => block_row_unit::<6>,
                7 => block_row_unit::<7>,
                8 => block_row_unit::<8>,
                _ => unreachable!(),
            },
            param: inst.delta,
        },
        ty => CompiledUnit {
            f: match ty.block_alignment() {
                1 => block_col_unit::<1>,
                2 => block_col_unit::<2>,
                3 => block_col_unit::<3>,
                4 => block_col_unit::<4>,
                5 => block_col_unit::<5>,
                6 => block_col_unit::<6>,
                7 => block_col_unit::<7>,
                8 => block_col_unit::<8>,
                _ => unreachable!(),
            },
            param: inst.delta,
        },
    }
}

fn delta_unit<const W: usize>(s: &mut Sweep, size: usize, _param: usize) {
    #[cfg(feature = "ptr-align")]
    if W > 1 {
        align_pos(&mut s.pos, W);
    }
    s.y[s.ycur] += s.vals[s.vpos] * s.x[s.cur_col] * s.scale;
    s.vpos += 1;
    for _ in 1..size {
        s.cur_col += csx_util::read_fixed_int(s.ctl, &mut s.pos, W) as usize;
        s.y[s.ycur] += s.vals[s.vpos] * s.x[s.cur_col] * s.scale;
        s.vpos += 1;
    }
}

fn horizontal_unit(s: &mut Sweep, size: usize, delta: usize) {
    let mut yr = 0.0;
    for i in 0..size {
        yr += s.vals[s.vpos + i] * s.x[s.cur_col + i * delta];
    }
    s.y[s.ycur] += yr * s.scale;
    s.vpos += size;
    s.cur_col += (size - 1) * delta;
}

fn vertical_unit(s: &mut Sweep, size: usize, delta: usize) {
    let xv = s.x[s.cur_col] * s.scale;
    for i in 0..size {
        s.y[s.ycur + i * delta] += s.vals[s.vpos + i] * xv;
    }
    s.vpos += size;
}

fn diagonal_unit(s: &mut Sweep, size: usize, delta: usize) {
    for i in 0..size {
        s.y[s.ycur + i * delta] += s.vals[s.vpos + i] * s.x[s.cur_col + i * delta] * s.scale;
    }
    s.vpos += size;
}

fn antidiagonal_unit(s: &mut Sweep, size: usize, delta: usize) {
    for i in 0..size {
        s.y[s.ycur + i * delta] += s.vals[s.vpos + i] * s.x[s.cur_col - i * delta] * s.scale;
    }
    s.vpos += size;
}

/// `R x c` block anchored at the cursor, body stored row-major.
fn block_row_unit<const R: usize>(s: &mut Sweep, size: usize, c: usize) {
    debug_assert_eq!(size, R * c);
    for j in 0..c {
        let xv = s.x[s.cur_col + j] * s.scale;
        for i in 0..R {
            s.y[s.ycur + i] += s.vals[s.vpos + i * c + j] * xv;
        }
    }
    s.vpos += size;
}

/// `r x C` block anchored at the cursor, body stored column-major.
fn block_col_unit<const C: usize>(s: &mut Sweep, size: usize, r: usize) {
    debug_assert_eq!(size, r * C);
    for j in 0..C {
        let xv = s.x[s.cur_col + j] * s.scale;
        for i in 0..r {
            s.y[s.ycur + i] += s.vals[s.vpos + j * r + i] * xv;
        }
    }
    s.vpos += size;
}

/// Sweep state of the symmetric kernels: covered elements also feed
/// their transposed contribution, into `y` for owned columns and into
/// the thread-local buffer for columns of other partitions.
///
/// `y` covers exactly this partition's row range (`ycur` is relative);
/// `x` and `tmp` span the full dimension.
struct SymSweep<'a> {
    ctl: &'a [u8],
    pos: usize,
    vals: &'a [f64],
    vpos: usize,
    x: &'a [f64],
    y: &'a mut [f64],
    tmp: &'a mut [f64],
    dv: &'a [f64],
    row_start: usize,
    ycur: usize,
    cur_col: usize,
    scale: f64,
}

impl SymSweep<'_> {
    /// One off-diagonal element at (`row` relative to the partition,
    /// `col` 0-based global).
    #[inline]
    fn contribute(&mut self, row: usize, col: usize, v: f64) {
        let global_row = self.row_start + row;
        debug_assert!(col < global_row, "symmetric kernel fed a non-lower element");
        self.y[row] += v * self.x[col] * self.scale;
        let transposed = v * self.x[global_row] * self.scale;
        if col < self.row_start {
            self.tmp[col] += transposed;
        } else {
            self.y[col - self.row_start] += transposed;
        }
    }

    /// Folds the diagonal of the row being left.
    #[inline]
    fn fold_diagonal(&mut self) {
        let global_row = self.row_start + self.ycur;
        self.y[self.ycur] += self.dv[self.ycur] * self.x[global_row] * self.scale;
        self.ycur += 1;
    }
}

type SymUnitFn = fn(&mut SymSweep, usize, usize);

#[derive(Clone, Copy)]
struct CompiledSymUnit {
    f: SymUnitFn,
    param: usize,
}

/// The specialized symmetric multiply routine for one partition.
pub struct SymKernelPlan {
    units: Vec<CompiledSymUnit>,
    full_colind: bool,
}

impl SymKernelPlan {
    pub fn compile(csx: &CsxSymMatrix) -> SymKernelPlan {
        let lower = &csx.lower;
        let mut units = Vec::with_capacity(lower.nr_patterns());
        for patt_id in 0..lower.nr_patterns() {
            units.push(compile_sym_unit(lower, patt_id as u8));
        }
        SymKernelPlan {
            units,
            full_colind: lower.full_colind,
        }
    }

    /// `y += scale * A * x` for the symmetric matrix: lower triangle,
    /// diagonal, and transposed contributions (locally into `y`, into
    /// `tmp` for columns owned by other partitions). `y` is the
    /// partition's slice of the output vector.
    pub fn spmv_sym(
        &self,
        csx: &CsxSymMatrix,
        x: &[f64],
        y: &mut [f64],
        tmp: &mut [f64],
        scale: f64,
    ) {
        let lower = &csx.lower;
        debug_assert_eq!(y.len(), lower.nrows);
        let mut s = SymSweep {
            ctl: &lower.ctl,
            pos: 0,
            vals: &lower.values,
            vpos: 0,
            x,
            y,
            tmp,
            dv: &csx.dvalues,
            row_start: lower.row_start,
            ycur: 0,
            cur_col: 0,
            scale,
        };

        while s.pos < lower.ctl_size {
            let flags = s.ctl[s.pos];
            let size = s.ctl[s.pos + 1];
            s.pos += 2;

            if test_bit(flags, CTL_NR_BIT) {
                let jmp = if test_bit(flags, CTL_RJMP_BIT) {
                    csx_util::read_uvarint(s.ctl, &mut s.pos) as usize
                } else {
                    1
                };
                for _ in 0..jmp {
                    s.fold_diagonal();
                }
                s.cur_col = 0;
            }

            if self.full_colind {
                #[cfg(feature = "ptr-align")]
                align_pos(&mut s.pos, FULL_COLIND_SIZE);
                s.cur_col = csx_util::read_fixed_int(s.ctl, &mut s.pos, FULL_COLIND_SIZE) as usize;
            } else {
                s.cur_col += csx_util::read_uvarint(s.ctl, &mut s.pos) as usize;
            }

            let unit = self.units[(flags & CTL_PATTERN_MASK) as usize];
            (unit.f)(&mut s, size as usize, unit.param);
        }

        // Diagonals of the rows past the last ctl-visited one.
        while s.ycur < lower.nrows {
            s.fold_diagonal();
        }

        debug_assert_eq!(s.vpos, lower.nnz, "values cursor mismatch");
    }
}

fn compile_sym_unit(csx: &CsxMatrix, patt_id: u8) -> CompiledSymUnit {
    use EncodingType::*;
    let inst = csx.instantiation(patt_id);
    match inst.ty {
        EncodingType::None => CompiledSymUnit {
            f: match inst.delta {
                8 => sym_delta_unit::<1>,
                16 => sym_delta_unit::<2>,
                32 => sym_delta_unit::<4>,
                64 => sym_delta_unit::<8>,
                other => panic!("bad delta width: {other}"),
            },
            param: 0,
        },
        Horizontal => CompiledSymUnit {
            f: sym_horizontal_unit,
            param: inst.delta,
        },
        Vertical => CompiledSymUnit {
            f: sym_vertical_unit,
            param: inst.delta,
        },
        Diagonal => CompiledSymUnit {
            f: sym_diagonal_unit,
            param: inst.delta,
        },
        AntiDiagonal => CompiledSymUnit {
            f: sym_antidiagonal_unit,
            param: inst.delta,
        },
        ty if ty.is_block_row() => CompiledSymUnit {
            f: sym_block_row_unit,
            param: inst.delta,
        },
        ty => CompiledSymUnit {
            f: sym_block_col_unit,
            param: inst.delta,
        },
    }
}

fn sym_delta_unit<const W: usize>(s: &mut SymSweep, size: usize, _param: usize) {
    #[cfg(feature = "ptr-align")]
    if W > 1 {
        align_pos(&mut s.pos, W);
    }
    let v = s.vals[s.vpos];
    s.vpos += 1;
    s.contribute(s.ycur, s.cur_col, v);
    for _ in 1..size {
        s.cur_col += csx_util::read_fixed_int(s.ctl, &mut s.pos, W) as usize;
        let v = s.vals[s.vpos];
        s.vpos += 1;
        s.contribute(s.ycur, s.cur_col, v);
    }
}

fn sym_horizontal_unit(s: &mut SymSweep, size: usize, delta: usize) {
    for i in 0..size {
        let v = s.vals[s.vpos + i];
        s.contribute(s.ycur, s.cur_col + i * delta, v);
    }
    s.vpos += size;
    s.cur_col += (size - 1) * delta;
}

fn sym_vertical_unit(s: &mut SymSweep, size: usize, delta: usize) {
    for i in 0..size {
        let v = s.vals[s.vpos + i];
        s.contribute(s.ycur + i * delta, s.cur_col, v);
    }
    s.vpos += size;
}

fn sym_diagonal_unit(s: &mut SymSweep, size: usize, delta: usize) {
    for i in 0..size {
        let v = s.vals[s.vpos + i];
        s.contribute(s.ycur + i * delta, s.cur_col + i * delta, v);
    }
    s.vpos += size;
}

fn sym_antidiagonal_unit(s: &mut SymSweep, size: usize, delta: usize) {
    for i in 0..size {
        let v = s.vals[s.vpos + i];
        s.contribute(s.ycur + i * delta, s.cur_col - i * delta, v);
    }
    s.vpos += size;
}

fn sym_block_row_unit(s: &mut SymSweep, size: usize, c: usize) {
    let r = size / c;
    for i in 0..r {
        for j in 0..c {
            let v = s.vals[s.vpos + i * c + j];
            s.contribute(s.ycur + i, s.cur_col + j, v);
        }
    }
    s.vpos += size;
}

fn sym_block_col_unit(s: &mut SymSweep, size: usize, r: usize) {
    let c = size / r;
    for j in 0..c {
        for i in 0..r {
            let v = s.vals[s.vpos + j * r + i];
            s.contribute(s.ycur + i, s.cur_col + j, v);
        }
    }
    s.vpos += size;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encodings::EncodingSequence;
    use crate::partition::SparsePartition;
    use crate::runtime::config::RuntimeConfig;
    use crate::writer::CsxWriter;

    fn dense_to_points(dense: &[&[f64]]) -> Vec<(usize, usize, f64)> {
        let mut points = Vec::new();
        for (r, row) in dense.iter().enumerate() {
            for (c, &v) in row.iter().enumerate() {
                if v != 0.0 {
                    points.push((r + 1, c + 1, v));
                }
            }
        }
        points
    }

    fn naive_spmv(dense: &[&[f64]], x: &[f64], scale: f64) -> Vec<f64> {
        dense
            .iter()
            .map(|row| scale * row.iter().zip(x).map(|(a, b)| a * b).sum::<f64>())
            .collect()
    }

    fn csx_from_dense(dense: &[&[f64]], xform: &str, full_colind: bool) -> CsxMatrix {
        let ncols = dense[0].len();
        let nrows = dense.len();
        let mut iter = dense_to_points(dense).into_iter().peekable();
        let mut spm = SparsePartition::from_points(&mut iter, 1, 0, ncols);
        spm.set_nr_rows(nrows);

        let cfg = RuntimeConfig {
            full_colind,
            xform: xform.to_string(),
            ..RuntimeConfig::default()
        };
        let seq = EncodingSequence::parse(xform).unwrap();
        let mut mgr = crate::encoder::EncodingManager::new(&mut spm, &cfg).unwrap();
        if seq.is_explicit() {
            mgr.encode_serial(&seq);
        } else {
            mgr.encode_all();
        }
        CsxWriter::new(&spm, full_colind).make_csx(false)
    }

    fn check_spmv(dense: &[&[f64]], xform: &str) {
        let x: Vec<f64> = (0..dense[0].len()).map(|i| 0.5 + i as f64).collect();
        let expect = naive_spmv(dense, &x, 2.0);

        for full_colind in [false, true] {
            let csx = csx_from_dense(dense, xform, full_colind);
            let plan = KernelPlan::compile(&csx);
            let mut y = vec![0.0; dense.len()];
            plan.spmv(&csx, &x, &mut y, 2.0);
            for (i, (got, want)) in y.iter().zip(&expect).enumerate() {
                assert!(
                    (got - want).abs() <= 1e-9 * want.abs().max(1.0),
                    "row {i}: got {got}, want {want} (xform {xform})"
                );
            }
        }
    }

    #[test]
    fn test_spmv_delta_only() {
        check_spmv(
            &[
                &[1.0, 0.0, 2.0, 0.0],
                &[0.0, 3.0, 0.0, 0.0],
                &[4.0, 0.0, 5.0, 0.0],
                &[0.0, 0.0, 0.0, 6.0],
            ],
            "none",
        );
    }

    #[test]
    fn test_spmv_horizontal() {
        check_spmv(
            &[
                &[1.0, 2.0, 3.0, 4.0, 5.0],
                &[0.0, 0.0, 0.0, 0.0, 0.0],
                &[0.0, 6.0, 7.0, 8.0, 9.0],
            ],
            "hor{1}",
        );
    }

    #[test]
    fn test_spmv_vertical() {
        check_spmv(
            &[
                &[1.0, 0.0],
                &[2.0, 0.0],
                &[3.0, 0.0],
                &[4.0, 7.0],
                &[5.0, 0.0],
                &[6.0, 0.0],
            ],
            "ver{1}",
        );
    }

    #[test]
    fn test_spmv_diagonal() {
        check_spmv(
            &[
                &[1.0, 0.0, 0.0, 0.0],
                &[0.0, 2.0, 0.0, 0.0],
                &[0.0, 0.0, 3.0, 0.0],
                &[9.0, 0.0, 0.0, 4.0],
            ],
            "diag{1}",
        );
    }

    #[test]
    fn test_spmv_antidiagonal() {
        check_spmv(
            &[
                &[0.0, 0.0, 0.0, 1.0],
                &[0.0, 0.0, 2.0, 0.0],
                &[0.0, 3.0, 0.0, 0.0],
                &[4.0, 0.0, 0.0, 0.0],
            ],
            "rdiag{1}",
        );
    }

    #[test]
    fn test_spmv_block_row() {
        check_spmv(
            &[
                &[1.0, 2.0, 3.0, 4.0],
                &[5.0, 6.0, 7.0, 8.0],
                &[0.0, 0.0, 9.0, 0.0],
            ],
            "br2{4}",
        );
    }

    #[test]
    fn test_spmv_block_col() {
        check_spmv(
            &[
                &[1.0, 2.0, 0.0],
                &[3.0, 4.0, 0.0],
                &[5.0, 6.0, 0.0],
                &[7.0, 8.0, 9.0],
            ],
            "bc2{4}",
        );
    }

    #[test]
    fn test_spmv_iterative_mixed() {
        check_spmv(
            &[
                &[1.0, 1.0, 1.0, 1.0, 0.0, 2.0],
                &[0.0, 3.0, 0.0, 0.0, 0.0, 2.0],
                &[0.0, 3.0, 0.0, 0.0, 0.0, 2.0],
                &[0.0, 3.0, 0.0, 0.0, 0.0, 2.0],
                &[0.0, 3.0, 0.0, 0.0, 0.0, 2.0],
                &[7.0, 0.0, 0.0, 0.0, 0.0, 2.0],
            ],
            "all",
        );
    }

    #[test]
    fn test_spmv_sym_small() {
        // Symmetric 4x4: lower triangle + diagonal held by one thread.
        //   2 1 0 5
        //   1 3 4 0
        //   0 4 6 0
        //   5 0 0 7
        let lower_points = vec![
            (1, 1, 2.0),
            (2, 1, 1.0),
            (2, 2, 3.0),
            (3, 2, 4.0),
            (3, 3, 6.0),
            (4, 1, 5.0),
            (4, 4, 7.0),
        ];
        let mut iter = lower_points.into_iter().peekable();
        let mut sym =
            crate::partition::SparsePartitionSym::from_points(&mut iter, 1, 0, 4);
        sym.lower_mut().set_nr_rows(4);

        let csx = crate::writer::make_csx_sym(&sym, false);
        let plan = SymKernelPlan::compile(&csx);
        let x = vec![1.0, 2.0, 3.0, 4.0];
        let mut y = vec![0.0; 4];
        let mut tmp = vec![0.0; 4];
        plan.spmv_sym(&csx, &x, &mut y, &mut tmp, 1.0);

        // Full-matrix expectation (row_start = 0: transposed adds go to y).
        let expect = [
            2.0 + 2.0 + 20.0,
            1.0 + 6.0 + 12.0,
            8.0 + 18.0,
            5.0 + 28.0,
        ];
        for (got, want) in y.iter().zip(&expect) {
            assert!((got - want).abs() < 1e-9, "got {got}, want {want}");
        }
        assert!(tmp.iter().all(|&t| t == 0.0));
    }
}
