//! Emission of the final CSX form: ctl stream, values array, row-index
//! table and pattern-id map.
//!
//! Ctl rules:
//! 1. Each unit leaves the column cursor at the last element it covered
//!    on the current row.
//! 2. A unit's size byte holds the number of values it consumes.

use hashbrown::HashMap;
use log::debug;

use crate::ctl::{CtlBuilder, CTL_PATTERNS_MAX, CTL_SIZE_MAX};
use crate::element::{last_col, Element};
use crate::encodings::{delta_pattern_id, EncodingType};
use crate::matrix::{CsxMatrix, CsxSymMatrix, RowInfo, EMPTY_ROW, ID_MAP_SIZE};
use crate::partition::{SparsePartition, SparsePartitionSym};

/// Bookkeeping for one distinct pattern id.
#[derive(Debug, Clone, Copy)]
struct PatInfo {
    /// The 6-bit ctl id assigned to this pattern.
    flag: u8,
    npatterns: u64,
    nnz: u64,
}

pub struct CsxWriter<'a> {
    spm: &'a SparsePartition,
    patterns: HashMap<u64, PatInfo>,
    flag_avail: u8,
    row_jumps: bool,
    full_colind: bool,
    values: Vec<f64>,
    rows_info: Vec<RowInfo>,
    span: usize,
    ctl: CtlBuilder,
    last_col: usize,
    new_row: bool,
    empty_rows: usize,
}

impl<'a> CsxWriter<'a> {
    pub fn new(spm: &'a SparsePartition, full_colind: bool) -> CsxWriter<'a> {
        CsxWriter {
            spm,
            patterns: HashMap::new(),
            flag_avail: 0,
            row_jumps: false,
            full_colind,
            values: Vec::with_capacity(spm.nr_nonzeros()),
            rows_info: vec![RowInfo::default(); spm.nr_rows()],
            span: 0,
            ctl: CtlBuilder::new(6 * spm.nr_nonzeros()),
            last_col: 0,
            new_row: false,
            empty_rows: 0,
        }
    }

    /// Assigns (or looks up) the dense ctl id for `pattern_id` and
    /// updates its tallies.
    fn get_flag(&mut self, pattern_id: u64, nnz: usize) -> u8 {
        let flag_avail = &mut self.flag_avail;
        let info = self.patterns.entry(pattern_id).or_insert_with(|| {
            let flag = *flag_avail;
            // Slot CTL_PATTERNS_MAX is reserved for the id-map sentinel.
            assert!(
                (flag as usize) < CTL_PATTERNS_MAX,
                "too many patterns in partition"
            );
            *flag_avail += 1;
            PatInfo {
                flag,
                npatterns: 0,
                nnz: 0,
            }
        });
        info.npatterns += 1;
        info.nnz += nnz as u64;
        info.flag
    }

    /// Converts the owned partition into its CSX form. `symmetric`
    /// selects the split row walk that keeps units from straddling the
    /// diagonal boundary.
    pub fn make_csx(mut self, symmetric: bool) -> CsxMatrix {
        assert_eq!(
            self.spm.ty(),
            EncodingType::Horizontal,
            "partition must be in horizontal order for emission"
        );

        let nr_rows = self.spm.nr_rows();
        let rowptr_rows = self.spm.rowptr_len() - 1;
        self.new_row = false; // Do not mark the first row.

        for i in 0..rowptr_rows {
            let row_is_empty = self.spm.row_elems(i).is_empty();
            if row_is_empty {
                debug!("make_csx(): row {i} is empty");
                if !self.new_row {
                    self.new_row = true; // In case the first row is empty.
                } else {
                    self.empty_rows += 1;
                }
                self.rows_info[i] = RowInfo {
                    rowptr: EMPTY_ROW,
                    valptr: 0,
                    span: 0,
                };
                continue;
            }

            self.rows_info[i].rowptr = if i > 0 { self.ctl.ctl_size() } else { 0 };
            self.rows_info[i].valptr = self.values.len();
            if symmetric {
                self.do_sym_row(i);
            } else {
                self.do_row(i);
            }
            self.rows_info[i].span = self.span;
            self.new_row = true;
        }

        for i in rowptr_rows..nr_rows {
            self.rows_info[i] = RowInfo {
                rowptr: EMPTY_ROW,
                valptr: 0,
                span: 0,
            };
        }

        assert_eq!(
            self.values.len(),
            self.spm.nr_nonzeros(),
            "values cursor mismatch at finalize"
        );

        let mut id_map = [-1i64; ID_MAP_SIZE];
        for (&pattern_id, info) in &self.patterns {
            id_map[info.flag as usize] = pattern_id as i64;
        }

        let ctl = self.ctl.finalize();
        CsxMatrix {
            nnz: self.spm.nr_nonzeros(),
            ncols: self.spm.nr_cols(),
            nrows: nr_rows,
            ctl_size: ctl.len(),
            row_start: self.spm.row_start(),
            values: self.values.into_boxed_slice(),
            ctl,
            row_jumps: self.row_jumps,
            full_colind: self.full_colind,
            id_map,
            rows_info: self.rows_info.into_boxed_slice(),
        }
    }

    fn do_row(&mut self, ridx: usize) {
        self.span = 0;
        self.last_col = 1;
        let row: Vec<Element> = self.spm.row_elems(ridx).to_vec();
        self.emit_elems(&row);
    }

    /// Like [`do_row`](CsxWriter::do_row) but flushes at the boundary
    /// between the columns left of the partition's row range and the
    /// rest, so the two halves stay in separate units.
    fn do_sym_row(&mut self, ridx: usize) {
        self.span = 0;
        self.last_col = 1;
        let boundary = self.spm.row_start() + 1;
        let row: Vec<Element> = self.spm.row_elems(ridx).to_vec();
        let split = row.partition_point(|e| e.col() < boundary);
        self.emit_elems(&row[..split]);
        self.emit_elems(&row[split..]);
    }

    /// Emits a run of row elements as delta and pattern units, flushing
    /// any trailing singletons.
    fn emit_elems(&mut self, elems: &[Element]) {
        let mut xs: Vec<usize> = Vec::new();
        for e in elems {
            if e.is_pattern() {
                self.update_row_span(e);
                if !xs.is_empty() {
                    self.add_xs(&mut xs);
                }
                self.add_pattern(e);
                self.values.extend_from_slice(e.values());
                continue;
            }

            assert!(xs.len() <= CTL_SIZE_MAX);
            if xs.len() == CTL_SIZE_MAX {
                self.add_xs(&mut xs);
            }
            xs.push(e.col());
            self.values.push(e.value());
        }

        if !xs.is_empty() {
            self.add_xs(&mut xs);
        }
    }

    /// Row-change flags for the next unit: the new-row bit and, when
    /// empty rows were bridged, their count plus one.
    fn update_new_row(&mut self) -> (bool, u64) {
        let mut nr = false;
        let mut rowjmp = 0;
        if self.new_row {
            nr = true;
            self.new_row = false;
            if self.empty_rows != 0 {
                rowjmp = self.empty_rows as u64 + 1;
                self.empty_rows = 0;
                self.row_jumps = true;
            }
        }
        (nr, rowjmp)
    }

    /// Flushes accumulated singletons as one delta unit.
    fn add_xs(&mut self, xs: &mut Vec<usize>) {
        let xs_size = xs.len();
        assert!(xs_size > 0 && xs_size <= CTL_SIZE_MAX);
        let new_last_col = xs[xs_size - 1];
        let x_start = xs[0];

        // Delta-encode against the previous unit's final column.
        let mut prev = self.last_col;
        for x in xs.iter_mut() {
            let tmp = *x;
            *x -= prev;
            prev = tmp;
        }
        self.last_col = new_last_col;

        let max = xs.iter().skip(1).copied().max().unwrap_or(0);
        let delta_bytes = csx_util::delta_size_bytes(max as u64);
        let patt_id = delta_pattern_id(delta_bytes);

        let (nr, rowjmp) = self.update_new_row();
        let ucol = if self.full_colind {
            (x_start - 1) as u64
        } else {
            xs[0] as u64
        };

        debug!("add_xs() ucol {ucol}, last_col {}", self.last_col);
        let flag = self.get_flag(patt_id, xs_size);
        self.ctl
            .append_unit_head(nr, rowjmp, flag, xs_size as u8, ucol, self.full_colind);

        for &x in xs.iter().skip(1) {
            self.ctl.append_fixed_int(x as u64, delta_bytes);
        }

        xs.clear();
    }

    /// Emits one pattern unit.
    fn add_pattern(&mut self, elem: &Element) {
        let patt_id = elem.instantiation().pattern_id();
        let patt_size = elem.size();
        assert!(patt_size <= CTL_SIZE_MAX, "unit size {patt_size}");

        let (nr, rowjmp) = self.update_new_row();
        let ucol = if self.full_colind {
            (elem.col() - 1) as u64
        } else {
            (elem.col() - self.last_col) as u64
        };

        let flag = self.get_flag(patt_id, patt_size);
        self.ctl
            .append_unit_head(nr, rowjmp, flag, patt_size as u8, ucol, self.full_colind);

        debug!("add_pattern() ucol {ucol}");
        self.last_col = last_col(elem, self.spm.ty());
    }

    /// Grows the row's span to cover `elem`'s row reach.
    fn update_row_span(&mut self, elem: &Element) {
        assert!(elem.is_pattern());
        let inst = elem.instantiation();
        let size = elem.size();
        let ty = inst.ty;

        let span = match ty {
            EncodingType::Vertical | EncodingType::Diagonal | EncodingType::AntiDiagonal => {
                (size - 1) * inst.delta
            }
            ty if ty.is_block_row() => ty.block_alignment() - 1,
            ty if ty.is_block_col() => size / ty.block_alignment() - 1,
            _ => 0,
        };

        if span > self.span {
            self.span = span;
        }
    }
}

/// Emits the CSX-Sym pair: the lower-triangle CSX plus the diagonal.
pub fn make_csx_sym(spm_sym: &SparsePartitionSym, full_colind: bool) -> CsxSymMatrix {
    let dvalues = spm_sym.diagonal().to_vec().into_boxed_slice();
    let lower = CsxWriter::new(spm_sym.lower(), full_colind).make_csx(true);
    CsxSymMatrix { lower, dvalues }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ctl::{test_bit, CTL_NR_BIT, CTL_PATTERN_MASK, CTL_RJMP_BIT};
    use crate::encodings::{EncodingSequence, Instantiation};
    use crate::runtime::config::RuntimeConfig;

    fn partition_from(points: Vec<(usize, usize, f64)>, ncols: usize) -> SparsePartition {
        let mut iter = points.into_iter().peekable();
        let mut part = SparsePartition::from_points(&mut iter, 1, 0, ncols);
        let nr_rows = part.rowptr_len() - 1;
        part.set_nr_rows(nr_rows);
        part
    }

    #[test]
    fn test_plain_delta_rows() {
        // Two rows of singletons, no patterns.
        let spm = partition_from(vec![(1, 1, 1.0), (1, 3, 2.0), (2, 2, 3.0)], 4);
        let csx = CsxWriter::new(&spm, false).make_csx(false);

        assert_eq!(csx.nnz, 3);
        assert_eq!(&csx.values[..], &[1.0, 2.0, 3.0]);
        // One pattern id: the u8 delta unit.
        assert_eq!(csx.nr_patterns(), 1);
        assert_eq!(csx.id_map[0], delta_pattern_id(1) as i64);

        // First unit: no NR, size 2, ucol = 0 (column 1 minus implicit 1),
        // one interior delta byte of 2.
        let ctl = &csx.ctl;
        assert!(!test_bit(ctl[0], CTL_NR_BIT));
        assert_eq!(ctl[0] & CTL_PATTERN_MASK, 0);
        assert_eq!(ctl[1], 2);
        assert_eq!(ctl[2], 0);
        assert_eq!(ctl[3], 2);
        // Second unit: NR, size 1, ucol delta from column 3 to column 2...
        assert!(test_bit(ctl[4], CTL_NR_BIT));
        assert!(!test_bit(ctl[4], CTL_RJMP_BIT));
        assert_eq!(ctl[5], 1);
        assert_eq!(csx.rows_info[1].rowptr, 4);
        assert_eq!(csx.rows_info[1].valptr, 2);
    }

    #[test]
    fn test_row_jumps() {
        // Rows 2..4 empty.
        let spm = partition_from(vec![(1, 1, 1.0), (5, 1, 2.0)], 2);
        let csx = CsxWriter::new(&spm, false).make_csx(false);

        assert!(csx.row_jumps);
        let ctl = &csx.ctl;
        // Unit 0 opens row 0 without NR.
        assert!(!test_bit(ctl[0], CTL_NR_BIT));
        // Unit 1: NR + RJMP, bridging 3 empty rows -> jump of 4.
        let u1 = csx.rows_info[4].rowptr;
        assert!(test_bit(ctl[u1], CTL_NR_BIT));
        assert!(test_bit(ctl[u1], CTL_RJMP_BIT));
        assert_eq!(ctl[u1 + 1], 1);
        let mut pos = u1 + 2;
        assert_eq!(csx_util::read_uvarint(ctl, &mut pos), 4);
        // Intermediate rows share the previous rowptr.
        assert_eq!(csx.rows_info[1].rowptr, csx.rows_info[3].rowptr);
    }

    #[test]
    fn test_wide_delta_unit() {
        // Columns 1 and 1000: interior delta needs 2 bytes.
        let spm = partition_from(vec![(1, 1, 1.0), (1, 1000, 2.0)], 1000);
        let csx = CsxWriter::new(&spm, false).make_csx(false);
        assert_eq!(csx.id_map[0], delta_pattern_id(2) as i64);
        let ctl = &csx.ctl;
        assert_eq!(ctl[1], 2);
        // ucol 0, then a fixed u16 delta of 999.
        let mut pos = 3;
        assert_eq!(csx_util::read_u16(ctl, &mut pos), 999);
    }

    #[test]
    fn test_pattern_unit_and_span() {
        let mut spm = partition_from(
            (1..=6).map(|r| (r, 2, r as f64)).collect::<Vec<_>>(),
            4,
        );
        let cfg = RuntimeConfig::default();
        let mut mgr = crate::encoder::EncodingManager::new(&mut spm, &cfg).unwrap();
        mgr.encode_serial(&EncodingSequence::parse("ver{1}").unwrap());

        let csx = CsxWriter::new(&spm, false).make_csx(false);
        assert_eq!(csx.nnz, 6);
        // One vertical pattern unit of size 6 anchored in row 0.
        let inst = csx.instantiation(csx.ctl[0] & CTL_PATTERN_MASK);
        assert_eq!(inst, Instantiation::new(EncodingType::Vertical, 1));
        assert_eq!(csx.ctl[1], 6);
        assert_eq!(csx.rows_info[0].span, 5);
        // Rows 1..5 are empty in ctl terms.
        assert_eq!(csx.ctl_size, 3);
    }

    #[test]
    fn test_full_colind_mode() {
        let spm = partition_from(vec![(1, 7, 1.0), (1, 9, 2.0)], 16);
        let csx = CsxWriter::new(&spm, true).make_csx(false);
        assert!(csx.full_colind);
        let ctl = &csx.ctl;
        // ucol is the absolute 0-based column as a fixed u32.
        let mut pos = 2;
        assert_eq!(csx_util::read_u32(ctl, &mut pos), 6);
        // Interior delta is still the fixed-width byte.
        assert_eq!(ctl[pos], 2);
    }

    #[test]
    fn test_max_unit_split_in_writer() {
        // 300 singleton columns with irregular spacing split at 255.
        let points: Vec<(usize, usize, f64)> =
            (0..300).map(|i| (1, 1 + i * 3, 1.0)).collect();
        let spm = partition_from(points, 1000);
        let csx = CsxWriter::new(&spm, false).make_csx(false);

        let ctl = &csx.ctl;
        assert_eq!(ctl[1] as usize, 255);
        // Second unit at 2 (flag+size) + 1 ucol varint + 254 deltas.
        let u1 = 3 + 254;
        assert_eq!(ctl[u1 + 1] as usize, 45);
        assert_eq!(csx.nnz, 300);
    }

    #[test]
    fn test_sym_row_boundary_flush() {
        // Partition rows 3..4 (row_start 2): columns 1,2 are left of the
        // boundary, column 3 is not.
        let points = vec![(3, 1, 1.0), (3, 2, 2.0), (3, 3, 3.0)];
        let mut iter = points.into_iter().peekable();
        let mut spm = SparsePartition::from_points(&mut iter, 3, 0, 4);
        let nr_rows = spm.rowptr_len() - 1;
        spm.set_nr_rows(nr_rows);

        let csx = CsxWriter::new(&spm, false).make_csx(true);
        // Two delta units: [1,2] then [3].
        let ctl = &csx.ctl;
        assert_eq!(ctl[1], 2);
        let second = 2 + 1 + 1; // flag size ucol delta
        assert_eq!(ctl[second + 1], 1);
    }
}
