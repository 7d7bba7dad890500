//! The ctl byte stream: flag layout and the append-only builder.
//!
//! Format of one unit:
//!
//! ```text
//!   [flags][size][rowjmp?][ucol][body...]
//!
//!   flags bits:
//!           7  6  5  4  3  2  1  0
//!          [ ][ ][ ][ ][ ][ ][ ][ ]
//!           |  |  |______________|
//!     new row  |        |------------> pattern id
//!           row jmp
//! ```
//!
//! `rowjmp` is present only with the RJMP bit and holds the number of
//! bridged rows plus one, as a variable-length integer. `ucol` is either
//! the column delta from the previous unit (variable-length) or, in
//! full-column mode, the absolute 0-based column as a fixed-width
//! integer.

use static_assertions::const_assert;

/// New-row flag bit.
pub const CTL_NR_BIT: u8 = 7;
/// Row-jump flag bit.
pub const CTL_RJMP_BIT: u8 = 6;
/// Largest pattern id storable in the flag byte.
pub const CTL_PATTERNS_MAX: usize = (1 << CTL_RJMP_BIT) - 1;
/// Largest unit size storable in the size byte.
pub const CTL_SIZE_MAX: usize = (1 << 8) - 1;
/// Mask extracting the pattern id from the flag byte.
pub const CTL_PATTERN_MASK: u8 = !((1 << CTL_NR_BIT) | (1 << CTL_RJMP_BIT));

const_assert!(CTL_PATTERNS_MAX == 63);
const_assert!(CTL_PATTERN_MASK == 0x3f);

/// Width in bytes of a full-column index in the ctl stream.
pub const FULL_COLIND_SIZE: usize = core::mem::size_of::<u32>();

#[inline]
pub fn test_bit(byte: u8, bit: u8) -> bool {
    debug_assert!(bit < 8);
    byte & (1 << bit) != 0
}

#[inline]
fn set_bit(byte: &mut u8, bit: u8) {
    debug_assert!(bit < 8);
    *byte |= 1 << bit;
}

/// Growable ctl stream under construction.
#[derive(Debug)]
pub struct CtlBuilder {
    ctl: Vec<u8>,
}

impl CtlBuilder {
    pub fn new(size_hint: usize) -> CtlBuilder {
        CtlBuilder {
            ctl: Vec::with_capacity(size_hint),
        }
    }

    pub fn ctl_size(&self) -> usize {
        self.ctl.len()
    }

    pub fn finalize(self) -> Box<[u8]> {
        self.ctl.into_boxed_slice()
    }

    pub fn append_variable_int(&mut self, val: u64) {
        csx_util::write_uvarint(&mut self.ctl, val);
    }

    pub fn append_fixed_int(&mut self, val: u64, nr_bytes: usize) {
        assert!(nr_bytes <= core::mem::size_of::<u64>());
        #[cfg(feature = "ptr-align")]
        self.align_ctl(nr_bytes);
        csx_util::write_fixed_int(&mut self.ctl, val, nr_bytes);
    }

    /// Appends a unit head: `[flag][size][rowjmp?][ucol]`.
    pub fn append_unit_head(
        &mut self,
        nr: bool,
        rowjmp: u64,
        id: u8,
        size: u8,
        ucol: u64,
        full_colind: bool,
    ) {
        debug_assert!(id as usize <= CTL_PATTERNS_MAX);
        let mut flag = id;
        if nr {
            set_bit(&mut flag, CTL_NR_BIT);
        }
        if rowjmp != 0 {
            set_bit(&mut flag, CTL_RJMP_BIT);
        }

        self.ctl.push(flag);
        self.ctl.push(size);
        if rowjmp != 0 {
            self.append_variable_int(rowjmp);
        }

        if full_colind {
            self.append_fixed_int(ucol, FULL_COLIND_SIZE);
        } else {
            self.append_variable_int(ucol);
        }
    }

    /// Pads so the next fixed-width write lands on its natural boundary.
    /// The SpMV sweep applies the same padding when it reads.
    #[cfg(feature = "ptr-align")]
    fn align_ctl(&mut self, boundary: usize) {
        let nr_padd = (boundary - (self.ctl.len() & (boundary - 1))) & (boundary - 1);
        for _ in 0..nr_padd {
            self.ctl.push(0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_head_plain() {
        let mut bld = CtlBuilder::new(16);
        bld.append_unit_head(false, 0, 5, 17, 42, false);
        let ctl = bld.finalize();
        assert_eq!(&ctl[..], &[5, 17, 42]);
    }

    #[test]
    fn test_unit_head_new_row_jump() {
        let mut bld = CtlBuilder::new(16);
        bld.append_unit_head(true, 3, 2, 9, 200, false);
        let ctl = bld.finalize();
        // NR | RJMP | id 2, size 9, rowjmp 3, ucol 200 as varint.
        assert_eq!(ctl[0], (1 << CTL_NR_BIT) | (1 << CTL_RJMP_BIT) | 2);
        assert_eq!(ctl[1], 9);
        assert_eq!(ctl[2], 3);
        let mut pos = 3;
        assert_eq!(csx_util::read_uvarint(&ctl, &mut pos), 200);
        assert_eq!(pos, ctl.len());
    }

    #[test]
    fn test_unit_head_full_colind() {
        let mut bld = CtlBuilder::new(16);
        bld.append_unit_head(true, 0, 1, 4, 0x01020304, true);
        let ctl = bld.finalize();
        assert_eq!(ctl[0], (1 << CTL_NR_BIT) | 1);
        assert_eq!(ctl[1], 4);
        assert_eq!(&ctl[2..], &[0x04, 0x03, 0x02, 0x01]);
    }

    #[test]
    fn test_fixed_int_widths() {
        let mut bld = CtlBuilder::new(16);
        bld.append_fixed_int(0x1234, 2);
        bld.append_fixed_int(0xff, 1);
        let ctl = bld.finalize();
        assert_eq!(&ctl[..], &[0x34, 0x12, 0xff]);
    }
}
