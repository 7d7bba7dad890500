//! The per-thread CSX matrix: the immutable product of the writer.

use crate::ctl::CTL_PATTERNS_MAX;
use crate::encodings::Instantiation;

/// Number of id-map slots persisted per partition. One more than the
/// largest pattern id so the sentinel entry always fits.
pub const ID_MAP_SIZE: usize = CTL_PATTERNS_MAX + 1;

/// Sentinel rowptr of a row with no ctl units.
pub const EMPTY_ROW: usize = usize::MAX;

/// Per-row pointers into the ctl and values streams.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RowInfo {
    /// Offset in ctl of the unit opening this row, or [`EMPTY_ROW`].
    pub rowptr: usize,
    /// Offset in values of this row's first value.
    pub valptr: usize,
    /// Highest row offset any pattern starting in this row reaches.
    pub span: usize,
}

/// One partition in its final, pattern-compressed form.
///
/// Immutable after construction except for in-place value updates through
/// [`set_value`](crate::get_set::set_value).
#[derive(Debug)]
pub struct CsxMatrix {
    pub nnz: usize,
    pub ncols: usize,
    pub nrows: usize,
    pub ctl_size: usize,
    /// Row of the original matrix where this partition starts (0-based).
    pub row_start: usize,
    /// Nonzero values in encoded order.
    pub values: Box<[f64]>,
    /// The control byte stream.
    pub ctl: Box<[u8]>,
    /// True iff ctl contains at least one empty-row jump.
    pub row_jumps: bool,
    /// Whether ucol fields are absolute fixed-width columns.
    pub full_colind: bool,
    /// Dense map from the 6-bit pattern id to the pattern's numeric id;
    /// `-1` marks unused slots, the first of which is the sentinel.
    pub id_map: [i64; ID_MAP_SIZE],
    pub rows_info: Box<[RowInfo]>,
}

impl CsxMatrix {
    /// Resolves a 6-bit ctl pattern id to its instantiation.
    pub fn instantiation(&self, patt_id: u8) -> Instantiation {
        let id = self.id_map[patt_id as usize];
        assert!(id >= 0, "unassigned pattern id {patt_id}");
        Instantiation::from_pattern_id(id as u64)
    }

    /// Number of assigned pattern ids.
    pub fn nr_patterns(&self) -> usize {
        self.id_map.iter().take_while(|&&id| id >= 0).count()
    }

    /// Compressed footprint in bytes: values plus ctl.
    pub fn size_bytes(&self) -> usize {
        self.nnz * core::mem::size_of::<f64>() + self.ctl_size
    }
}

/// A symmetric partition: the lower-triangle CSX plus its diagonal slice.
#[derive(Debug)]
pub struct CsxSymMatrix {
    pub lower: CsxMatrix,
    pub dvalues: Box<[f64]>,
}

impl CsxSymMatrix {
    pub fn size_bytes(&self) -> usize {
        self.lower.size_bytes() + self.dvalues.len() * core::mem::size_of::<f64>()
    }
}
