//! Mutable per-thread slice of the matrix in element-list / row-pointer
//! form.
//!
//! A partition owns a contiguous arena of [`Element`]s plus a row-pointer
//! array, both expressed in the partition's *current iteration order*.
//! Transforming to another order remaps every coordinate through the
//! order's bijection and stably resorts the arena; the encoding pipeline
//! relies on this to scan the same nonzeros horizontally, vertically,
//! diagonally and block-wise.
//!
//! Rows are 1-based and local to the partition; columns are 1-based in
//! the current order's coordinate system.

use log::debug;

use crate::element::Element;
use crate::encodings::EncodingType;

/// Maps a horizontal-order coordinate into `ty` order.
///
/// `nr_rows`/`nr_cols` are the partition dimensions in horizontal order.
fn map_coord(
    ty: EncodingType,
    nr_rows: usize,
    nr_cols: usize,
    (row, col): (usize, usize),
) -> (usize, usize) {
    use EncodingType::*;
    match ty {
        Horizontal => (row, col),
        Vertical => (col, row),
        Diagonal => {
            assert!(nr_rows + col > row, "diagonal map out of range");
            (nr_rows + col - row, row.min(col))
        }
        AntiDiagonal => {
            let dr = row + col - 1;
            let dc = if dr <= nr_cols { row } else { nr_cols + 1 - col };
            (dr, dc)
        }
        ty if ty.is_block_row() => {
            let a = ty.block_alignment();
            ((row - 1) / a + 1, (row - 1) % a + a * (col - 1) + 1)
        }
        ty if ty.is_block_col() => {
            let a = ty.block_alignment();
            ((col - 1) / a + 1, (col - 1) % a + a * (row - 1) + 1)
        }
        _ => panic!("cannot map to {ty:?}"),
    }
}

/// Inverse of [`map_coord`]: back from `ty` order to horizontal.
fn rmap_coord(
    ty: EncodingType,
    nr_rows: usize,
    nr_cols: usize,
    (row, col): (usize, usize),
) -> (usize, usize) {
    use EncodingType::*;
    match ty {
        Horizontal => (row, col),
        Vertical => (col, row),
        Diagonal => {
            if row < nr_rows {
                (nr_rows + col - row, col)
            } else {
                (col, row + col - nr_rows)
            }
        }
        AntiDiagonal => {
            let c = if row <= nr_cols {
                row + 1 - col
            } else {
                nr_cols + 1 - col
            };
            (row - c + 1, c)
        }
        ty if ty.is_block_row() => {
            let a = ty.block_alignment();
            (a * (row - 1) + (col - 1) % a + 1, (col - 1) / a + 1)
        }
        ty if ty.is_block_col() => {
            let a = ty.block_alignment();
            ((col - 1) / a + 1, a * (row - 1) + (col - 1) % a + 1)
        }
        _ => panic!("cannot map from {ty:?}"),
    }
}

/// A partition of the matrix owned by one worker thread.
#[derive(Debug)]
pub struct SparsePartition {
    nr_rows: usize,
    nr_cols: usize,
    nr_nzeros: usize,
    ty: EncodingType,
    elems: Vec<Element>,
    rowptr: Vec<usize>,
    /// Row of the original matrix where this partition starts (0-based).
    row_start: usize,
}

impl SparsePartition {
    pub fn new(nr_rows: usize, nr_cols: usize, row_start: usize) -> SparsePartition {
        SparsePartition {
            nr_rows,
            nr_cols,
            nr_nzeros: 0,
            ty: EncodingType::Horizontal,
            elems: Vec::new(),
            rowptr: vec![0],
            row_start,
        }
    }

    /// Fills the partition from 1-based global `(row, col, value)` points
    /// sorted row-major. Consumes points until `limit` elements have been
    /// placed and a row boundary is reached (`limit == 0` means no limit).
    pub fn from_points<I>(
        points: &mut std::iter::Peekable<I>,
        first_row: usize,
        limit: usize,
        nr_cols: usize,
    ) -> SparsePartition
    where
        I: Iterator<Item = (usize, usize, f64)>,
    {
        let mut part = SparsePartition::new(0, nr_cols, first_row - 1);
        let mut bld = Builder::new(0, limit);
        let mut row_prev = first_row;

        while let Some(&(row, col, val)) = points.peek() {
            if row != row_prev {
                assert!(row > row_prev, "input points not sorted by row");
                if limit != 0 && bld.elems_cnt() >= limit {
                    break;
                }
                bld.new_row(row - row_prev);
                row_prev = row;
            }
            bld.append_elem(Element::new(row - first_row + 1, col, val));
            points.next();
        }

        bld.finalize(&mut part);
        part.nr_nzeros = part.elems.len();
        part.nr_rows = part.rowptr.len() - 1;
        part
    }

    pub fn nr_rows(&self) -> usize {
        self.nr_rows
    }

    pub fn nr_cols(&self) -> usize {
        self.nr_cols
    }

    pub fn nr_nonzeros(&self) -> usize {
        self.nr_nzeros
    }

    pub fn ty(&self) -> EncodingType {
        self.ty
    }

    pub fn row_start(&self) -> usize {
        self.row_start
    }

    pub fn set_row_start(&mut self, row_start: usize) {
        self.row_start = row_start;
    }

    pub fn set_nr_rows(&mut self, nr_rows: usize) {
        self.nr_rows = nr_rows;
    }

    pub fn set_nr_nonzeros(&mut self, nnz: usize) {
        self.nr_nzeros = nnz;
    }

    /// Number of rows the row-pointer array currently covers. After a
    /// transform this is the row count of the mapped coordinate system,
    /// truncated at the last nonempty row.
    pub fn rowptr_len(&self) -> usize {
        self.rowptr.len()
    }

    pub fn row_elems(&self, ridx: usize) -> &[Element] {
        &self.elems[self.rowptr[ridx]..self.rowptr[ridx + 1]]
    }

    pub fn row_elems_mut(&mut self, ridx: usize) -> &mut [Element] {
        let (start, end) = (self.rowptr[ridx], self.rowptr[ridx + 1]);
        &mut self.elems[start..end]
    }

    pub fn elems(&self) -> &[Element] {
        &self.elems
    }

    pub fn elems_mut(&mut self) -> &mut [Element] {
        &mut self.elems
    }

    /// Upper bound on the row-pointer length in `ty` order.
    fn new_rowptr_capacity(&self, ty: EncodingType) -> usize {
        use EncodingType::*;
        match ty {
            Horizontal => self.nr_rows + 1,
            Vertical => self.nr_cols + 1,
            Diagonal | AntiDiagonal => self.nr_rows + self.nr_cols + 1,
            ty if ty.is_block_row() => self.nr_rows / ty.block_alignment() + 2,
            ty if ty.is_block_col() => self.nr_cols / ty.block_alignment() + 2,
            _ => 0,
        }
    }

    /// Changes the iteration order to `ty`: remaps every element
    /// coordinate and stably resorts the arena lexicographically.
    pub fn transform(&mut self, ty: EncodingType) {
        if self.ty == ty {
            return;
        }
        debug!("transform partition @{}: {:?} -> {:?}", self.row_start, self.ty, ty);

        let (from, nr_rows, nr_cols) = (self.ty, self.nr_rows, self.nr_cols);
        for e in &mut self.elems {
            let horiz = rmap_coord(from, nr_rows, nr_cols, (e.row(), e.col()));
            let (r, c) = map_coord(ty, nr_rows, nr_cols, horiz);
            e.set_coordinates(r, c);
        }

        self.elems
            .sort_by(|a, b| (a.row(), a.col()).cmp(&(b.row(), b.col())));

        let capacity = self.new_rowptr_capacity(ty);
        let mut bld = Builder::new(capacity, self.elems.len());
        let mut row_prev = 1;
        for e in std::mem::take(&mut self.elems) {
            let row = e.row();
            if row != row_prev {
                assert!(row > row_prev);
                bld.new_row(row - row_prev);
                row_prev = row;
            }
            bld.append_elem(e);
        }
        bld.finalize(self);
        self.ty = ty;
    }

    /// Copies a contiguous row range out into a standalone partition
    /// sharing this one's coordinate system. The range is clamped to the
    /// available rows. Merge the processed window back with
    /// [`SparsePartition::put_window`].
    pub fn window(&self, rs: usize, mut length: usize) -> SparsePartition {
        if rs + length > self.rowptr.len() - 1 {
            length = self.rowptr.len() - 1 - rs;
        }

        let es = self.rowptr[rs];
        let ee = self.rowptr[rs + length];
        let rowptr = self.rowptr[rs..rs + length + 1]
            .iter()
            .map(|&p| p - es)
            .collect::<Vec<_>>();
        let mut elems: Vec<Element> = self.elems[es..ee].to_vec();
        for e in &mut elems {
            e.set_coordinates(e.row() - rs, e.col());
        }

        SparsePartition {
            nr_rows: length,
            nr_cols: self.nr_cols,
            nr_nzeros: elems.len(),
            ty: self.ty,
            elems,
            rowptr,
            row_start: self.row_start + rs,
        }
    }

    /// Merges a window taken with [`SparsePartition::window`] back into
    /// place. The window must be back in this partition's iteration order
    /// and must still hold the same number of elements.
    pub fn put_window(&mut self, window: &SparsePartition) {
        assert_eq!(self.ty, window.ty, "window order mismatch");
        let rs = window.row_start - self.row_start;
        let es = self.rowptr[rs];
        assert_eq!(
            window.elems.len(),
            self.rowptr[rs + window.rowptr.len() - 1] - es,
            "window element count changed"
        );

        for (i, &p) in window.rowptr.iter().enumerate() {
            self.rowptr[rs + i] = es + p;
        }
        for (dst, src) in self.elems[es..es + window.elems.len()]
            .iter_mut()
            .zip(&window.elems)
        {
            *dst = src.clone();
            dst.set_coordinates(dst.row() + rs, dst.col());
        }
    }

    /// Rebuilds the arena from `new_elems`, which must be in this
    /// partition's iteration order. Used by the encoder after replacing
    /// runs with pattern elements.
    pub fn rebuild(&mut self, new_elems: Vec<Element>, rows_hint: usize) {
        let mut bld = Builder::new(rows_hint, new_elems.len());
        let mut row_prev = 1;
        for e in new_elems {
            let row = e.row();
            if row != row_prev {
                assert!(row > row_prev);
                bld.new_row(row - row_prev);
                row_prev = row;
            }
            bld.append_elem(e);
        }
        bld.finalize(self);
    }
}

/// Append-only construction of a partition's arena and row pointers.
#[derive(Debug)]
pub struct Builder {
    elems: Vec<Element>,
    rowptr: Vec<usize>,
}

impl Builder {
    pub fn new(nr_rows_hint: usize, nr_elems_hint: usize) -> Builder {
        let mut rowptr = Vec::with_capacity(nr_rows_hint + 1);
        rowptr.push(0);
        Builder {
            elems: Vec::with_capacity(nr_elems_hint),
            rowptr,
        }
    }

    pub fn append_elem(&mut self, e: Element) {
        self.elems.push(e);
    }

    pub fn elems_cnt(&self) -> usize {
        self.elems.len()
    }

    /// Opens the next row, `rdiff - 1` empty rows after the current one.
    pub fn new_row(&mut self, rdiff: usize) {
        let cnt = self.elems.len();
        for _ in 0..rdiff {
            self.rowptr.push(cnt);
        }
    }

    pub fn finalize(mut self, part: &mut SparsePartition) {
        if *self.rowptr.last().unwrap() != self.elems.len() {
            self.new_row(1);
        }
        part.elems = self.elems;
        part.rowptr = self.rowptr;
    }
}

/// A symmetric partition: the strictly-lower triangle plus the diagonal
/// slice of the partition's row range.
#[derive(Debug)]
pub struct SparsePartitionSym {
    lower: SparsePartition,
    diagonal: Vec<f64>,
}

impl SparsePartitionSym {
    /// Fills the symmetric partition from 1-based global points sorted
    /// row-major. Only the lower triangle is kept; diagonal values go to
    /// the separate diagonal slice; upper-triangle points are skipped.
    pub fn from_points<I>(
        points: &mut std::iter::Peekable<I>,
        first_row: usize,
        limit: usize,
        nr_cols: usize,
    ) -> SparsePartitionSym
    where
        I: Iterator<Item = (usize, usize, f64)>,
    {
        let mut lower = SparsePartition::new(0, nr_cols, first_row - 1);
        let mut bld = Builder::new(0, limit);
        let mut diagonal = Vec::new();
        let mut row_prev = first_row;

        while let Some(&(row, col, val)) = points.peek() {
            if row > col {
                if row != row_prev {
                    assert!(row > row_prev, "input points not sorted by row");
                    if limit != 0 && bld.elems_cnt() + diagonal.len() >= limit && row_prev == row - 1
                    {
                        break;
                    }
                    bld.new_row(row - row_prev);
                    row_prev = row;
                }
                bld.append_elem(Element::new(row - first_row + 1, col, val));
            } else if row == col {
                // Structurally-zero diagonal entries of skipped rows keep
                // the slice positionally aligned with the row range.
                while diagonal.len() < row - first_row {
                    diagonal.push(0.0);
                }
                diagonal.push(val);
            }
            points.next();
        }

        bld.finalize(&mut lower);
        lower.nr_nzeros = lower.elems.len();
        lower.nr_rows = lower.rowptr.len() - 1;
        SparsePartitionSym { lower, diagonal }
    }

    pub fn lower(&self) -> &SparsePartition {
        &self.lower
    }

    pub fn lower_mut(&mut self) -> &mut SparsePartition {
        &mut self.lower
    }

    pub fn diagonal(&self) -> &[f64] {
        &self.diagonal
    }

    /// Extends the diagonal slice with zeros up to the partition's row
    /// count.
    pub fn pad_diagonal(&mut self, nr_rows: usize) {
        while self.diagonal.len() < nr_rows {
            self.diagonal.push(0.0);
        }
    }

    pub fn diagonal_size(&self) -> usize {
        self.diagonal.len()
    }

    pub fn nr_nonzeros(&self) -> usize {
        self.lower.nr_nonzeros() + self.diagonal.len()
    }

    /// Splits the lower triangle into the half left of the partition's
    /// row range (columns ≤ row_start) and the rest. The halves are
    /// encoded independently and merged back before CSX emission.
    pub fn divide(&mut self) -> (SparsePartition, SparsePartition) {
        let matrix = &self.lower;
        let row_start = matrix.row_start;
        let nr_rows = matrix.rowptr.len() - 1;

        let mut b1 = Builder::new(nr_rows + 1, matrix.nr_nzeros);
        let mut b2 = Builder::new(nr_rows + 1, matrix.nr_nzeros);
        let mut m1 = SparsePartition::new(0, matrix.nr_cols, row_start);
        let mut m2 = SparsePartition::new(0, matrix.nr_cols, row_start);
        let (mut rows1, mut rows2) = (0, 0);
        let (mut nnz1, mut nnz2) = (0, 0);

        for i in 0..nr_rows {
            for e in matrix.row_elems(i) {
                if e.col() < row_start + 1 {
                    if rows1 < i {
                        b1.new_row(i - rows1);
                        rows1 = i;
                    }
                    nnz1 += 1;
                    b1.append_elem(e.clone());
                } else {
                    if rows2 < i {
                        b2.new_row(i - rows2);
                        rows2 = i;
                    }
                    nnz2 += 1;
                    b2.append_elem(e.clone());
                }
            }
        }

        b1.finalize(&mut m1);
        b2.finalize(&mut m2);
        m1.nr_nzeros = nnz1;
        m1.nr_rows = m1.rowptr.len() - 1;
        m2.nr_nzeros = nnz2;
        m2.nr_rows = m2.rowptr.len() - 1;
        (m1, m2)
    }

    /// Merges the two encoded halves back into the lower triangle,
    /// row-interleaved: for each row, the left half's units first.
    pub fn merge(&mut self, m1: SparsePartition, m2: SparsePartition) {
        let matrix = &self.lower;
        let nr_rows = matrix.rowptr.len() - 1;
        let mut merged = SparsePartition::new(matrix.nr_rows, matrix.nr_cols, matrix.row_start);
        merged.nr_nzeros = matrix.nr_nzeros;
        let mut bld = Builder::new(nr_rows + 1, matrix.nr_nzeros);

        for i in 0..nr_rows {
            if m1.rowptr.len() > i + 1 {
                for e in m1.row_elems(i) {
                    bld.append_elem(e.clone());
                }
            }
            if m2.rowptr.len() > i + 1 {
                for e in m2.row_elems(i) {
                    bld.append_elem(e.clone());
                }
            }
            bld.new_row(1);
        }

        bld.finalize(&mut merged);
        merged.nr_rows = self.lower.nr_rows;
        self.lower = merged;
    }
}
