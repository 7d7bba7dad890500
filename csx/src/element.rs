//! The generic matrix element of the internal representation.
//!
//! An element is either a single nonzero or a pattern instance: the
//! coordinates of the upper-leftmost member, the run of values and the
//! instantiation it was matched against. Pattern membership discovered by
//! the statistics passes is tracked with a per-element marker byte, so no
//! dynamic dispatch is involved.

use crate::encodings::{EncodingType, Instantiation};

/// Marker bit: the element was claimed by some candidate pattern.
pub const IN_PATTERN: u8 = 1;
/// Marker bit: the element opens a candidate pattern.
pub const PATTERN_START: u8 = 2;

#[derive(Debug, Clone, PartialEq)]
enum ElemValues {
    Single(f64),
    Run(Box<[f64]>),
}

/// A nonzero of a [`SparsePartition`](crate::partition::SparsePartition),
/// in the partition's current iteration order.
///
/// `row` is 1-based and local to the partition; `col` is 1-based in the
/// current iteration order's coordinate system.
#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    row: usize,
    col: usize,
    inst: Instantiation,
    values: ElemValues,
    marker: u8,
}

impl Element {
    /// A single nonzero. Its instantiation is `(None, 0)`.
    pub fn new(row: usize, col: usize, val: f64) -> Element {
        Element {
            row,
            col,
            inst: Instantiation::new(EncodingType::None, 0),
            values: ElemValues::Single(val),
            marker: 0,
        }
    }

    /// A pattern instance anchored at `(row, col)` holding `values` in
    /// body order.
    pub fn new_pattern(row: usize, col: usize, values: Vec<f64>, inst: Instantiation) -> Element {
        assert!(values.len() >= 2, "pattern of size {}", values.len());
        assert!(inst.delta != 0, "pattern with zero delta");
        Element {
            row,
            col,
            inst,
            values: ElemValues::Run(values.into_boxed_slice()),
            marker: 0,
        }
    }

    pub fn row(&self) -> usize {
        self.row
    }

    pub fn col(&self) -> usize {
        self.col
    }

    pub fn size(&self) -> usize {
        match &self.values {
            ElemValues::Single(_) => 1,
            ElemValues::Run(vals) => vals.len(),
        }
    }

    /// Only the instantiation distinguishes a stray element from a
    /// pattern member: a single element always carries delta 0.
    pub fn is_pattern(&self) -> bool {
        self.inst.delta != 0
    }

    pub fn ty(&self) -> EncodingType {
        self.inst.ty
    }

    pub fn instantiation(&self) -> Instantiation {
        self.inst
    }

    /// Value of a single element.
    pub fn value(&self) -> f64 {
        match &self.values {
            ElemValues::Single(v) => *v,
            ElemValues::Run(vals) => vals[0],
        }
    }

    /// Values of a pattern element, in body order.
    pub fn values(&self) -> &[f64] {
        match &self.values {
            ElemValues::Single(v) => std::slice::from_ref(v),
            ElemValues::Run(vals) => vals,
        }
    }

    pub fn set_coordinates(&mut self, row: usize, col: usize) {
        self.row = row;
        self.col = col;
    }

    pub fn mark(&mut self, m: u8) {
        self.marker |= m;
    }

    pub fn unmark(&mut self, m: u8) {
        self.marker &= !m;
    }

    pub fn is_marked(&self, m: u8) -> bool {
        self.marker & m == m
    }
}

/// Last column of `elem` under the iteration order `order`.
///
/// A pattern spreads along its own order only; seen from any other order
/// its footprint in the column direction starts and ends at the anchor.
pub fn last_col(elem: &Element, order: EncodingType) -> usize {
    let mut ret = elem.col();
    if order == elem.ty() {
        ret += (elem.size() - 1) * elem.instantiation().delta;
    }
    ret
}
