//! Point access on the encoded form.
//!
//! A lookup of (row, col) walks candidate rows in reverse from the
//! target row, pruning with each row's span, and decodes that row's ctl
//! units forward, checking the target against each unit's footprint. On
//! a hit the matching values slot is read or written in place.

use crate::ctl::{test_bit, CTL_NR_BIT, CTL_PATTERN_MASK, CTL_RJMP_BIT, FULL_COLIND_SIZE};
use crate::encodings::EncodingType;
use crate::matrix::{CsxMatrix, EMPTY_ROW};

/// Reads element (`row`, `col`), both 1-based global. `None` when the
/// element is structurally zero.
pub fn get_value(csx: &CsxMatrix, row: usize, col: usize) -> Option<f64> {
    find_slot(csx, row, col).map(|slot| csx.values[slot])
}

/// Overwrites element (`row`, `col`) in place. False when the element is
/// structurally zero; the matrix structure never changes.
pub fn set_value(csx: &mut CsxMatrix, row: usize, col: usize, value: f64) -> bool {
    match find_slot(csx, row, col) {
        Some(slot) => {
            csx.values[slot] = value;
            true
        }
        None => false,
    }
}

/// Locates the values slot of (row, col), walking rows downward from the
/// target until the span bound proves no earlier pattern can reach it.
fn find_slot(csx: &CsxMatrix, row: usize, col: usize) -> Option<usize> {
    let target_row = row - 1; // 0-based global
    let target_col = col - 1; // 0-based global
    let rows_info = &csx.rows_info;
    let mut current_row = target_row;

    loop {
        let li = current_row - csx.row_start;
        // Skip rows that are empty or whose span cannot reach the target.
        let skip = rows_info[li].rowptr == EMPTY_ROW
            || target_row > current_row + rows_info[li].span;
        if !skip {
            if let Some(slot) = scan_row(csx, current_row, target_row, target_col) {
                return Some(slot);
            }
        }

        if current_row == csx.row_start {
            return None;
        }
        current_row -= 1;
    }
}

fn scan_row(
    csx: &CsxMatrix,
    current_row: usize,
    target_row: usize,
    target_col: usize,
) -> Option<usize> {
    let li = current_row - csx.row_start;
    let ctl = &csx.ctl;
    let mut pos = csx.rows_info[li].rowptr;
    let mut vpos = csx.rows_info[li].valptr;
    let mut ucol = 0usize;
    let mut cnt = 0usize;
    let rows_checked = target_row - current_row;

    while pos < csx.ctl_size {
        let flags = ctl[pos];
        let size = ctl[pos + 1] as usize;
        pos += 2;
        if test_bit(flags, CTL_NR_BIT) {
            if test_bit(flags, CTL_RJMP_BIT) {
                csx_util::read_uvarint(ctl, &mut pos);
            }
            if cnt != 0 {
                // Next row opened: this row is exhausted.
                return None;
            }
        }
        cnt += 1;

        if csx.full_colind {
            #[cfg(feature = "ptr-align")]
            {
                pos = (pos + FULL_COLIND_SIZE - 1) & !(FULL_COLIND_SIZE - 1);
            }
            ucol = csx_util::read_fixed_int(ctl, &mut pos, FULL_COLIND_SIZE) as usize;
        } else {
            ucol += csx_util::read_uvarint(ctl, &mut pos) as usize;
        }

        let inst = csx.instantiation(flags & CTL_PATTERN_MASK);
        let hit = match inst.ty {
            EncodingType::None => search_delta(
                ctl,
                &mut pos,
                &mut vpos,
                inst.delta / 8,
                size,
                target_col,
                &mut ucol,
                rows_checked,
            ),
            EncodingType::Horizontal => search_horizontal(
                &mut vpos,
                inst.delta,
                size,
                target_col,
                &mut ucol,
                rows_checked,
            ),
            EncodingType::Vertical => search_vertical(
                &mut vpos,
                inst.delta,
                size,
                target_col,
                target_row,
                ucol,
                current_row,
                rows_checked,
            ),
            EncodingType::Diagonal => search_diagonal(
                &mut vpos,
                inst.delta,
                size,
                target_col,
                target_row,
                ucol,
                current_row,
                rows_checked,
                false,
            ),
            EncodingType::AntiDiagonal => search_diagonal(
                &mut vpos,
                inst.delta,
                size,
                target_col,
                target_row,
                ucol,
                current_row,
                rows_checked,
                true,
            ),
            ty if ty.is_block_row() => search_block(
                &mut vpos,
                ty.block_alignment(),
                inst.delta,
                size,
                target_col,
                target_row,
                ucol,
                current_row,
                true,
            ),
            ty => search_block(
                &mut vpos,
                inst.delta,
                ty.block_alignment(),
                size,
                target_col,
                target_row,
                ucol,
                current_row,
                false,
            ),
        };

        if hit.is_some() {
            return hit;
        }
    }

    None
}

#[allow(clippy::too_many_arguments)]
fn search_delta(
    ctl: &[u8],
    pos: &mut usize,
    vpos: &mut usize,
    delta_bytes: usize,
    size: usize,
    target_col: usize,
    ucol: &mut usize,
    rows_checked: usize,
) -> Option<usize> {
    #[cfg(feature = "ptr-align")]
    if delta_bytes > 1 {
        *pos = (*pos + delta_bytes - 1) & !(delta_bytes - 1);
    }

    let mut hit = None;
    if rows_checked == 0 && target_col == *ucol {
        hit = Some(*vpos);
    }
    *vpos += 1;
    for _ in 1..size {
        *ucol += csx_util::read_fixed_int(ctl, pos, delta_bytes) as usize;
        if hit.is_none() && rows_checked == 0 && target_col == *ucol {
            hit = Some(*vpos);
        }
        *vpos += 1;
    }

    hit
}

fn search_horizontal(
    vpos: &mut usize,
    delta: usize,
    size: usize,
    target_col: usize,
    ucol: &mut usize,
    rows_checked: usize,
) -> Option<usize> {
    let mut hit = None;
    if rows_checked == 0 && target_col >= *ucol && target_col < *ucol + size * delta {
        let off = target_col - *ucol;
        if off % delta == 0 {
            hit = Some(*vpos + off / delta);
        }
    }
    *vpos += size;
    *ucol += (size - 1) * delta;
    hit
}

#[allow(clippy::too_many_arguments)]
fn search_vertical(
    vpos: &mut usize,
    delta: usize,
    size: usize,
    target_col: usize,
    target_row: usize,
    ucol: usize,
    current_row: usize,
    rows_checked: usize,
) -> Option<usize> {
    let mut hit = None;
    if target_col == ucol {
        if rows_checked == 0 {
            hit = Some(*vpos);
        } else if rows_checked % delta == 0 && rows_checked / delta < size {
            debug_assert!(target_row > current_row);
            hit = Some(*vpos + rows_checked / delta);
        }
    }
    *vpos += size;
    hit
}

#[allow(clippy::too_many_arguments)]
fn search_diagonal(
    vpos: &mut usize,
    delta: usize,
    size: usize,
    target_col: usize,
    target_row: usize,
    ucol: usize,
    current_row: usize,
    rows_checked: usize,
    rev: bool,
) -> Option<usize> {
    let mut hit = None;
    if rows_checked == 0 {
        if target_col == ucol {
            hit = Some(*vpos);
        }
    } else if rows_checked % delta == 0 && rows_checked / delta < size {
        let step = rows_checked / delta;
        let expect_col = if rev {
            ucol.checked_sub(step * delta)
        } else {
            Some(ucol + step * delta)
        };
        if expect_col == Some(target_col) {
            debug_assert!(target_row > current_row);
            hit = Some(*vpos + step);
        }
    }
    *vpos += size;
    hit
}

#[allow(clippy::too_many_arguments)]
fn search_block(
    vpos: &mut usize,
    row_dim: usize,
    col_dim: usize,
    size: usize,
    target_col: usize,
    target_row: usize,
    ucol: usize,
    current_row: usize,
    isrow: bool,
) -> Option<usize> {
    let mut hit = None;
    let row_off = target_row - current_row;
    if target_col >= ucol && target_col < ucol + col_dim && row_off < row_dim {
        let col_off = target_col - ucol;
        // Block-row bodies are row-major, block-col bodies column-major.
        let off = if isrow {
            row_off * col_dim + col_off
        } else {
            col_off * row_dim + row_off
        };
        hit = Some(*vpos + off);
    }
    *vpos += size;
    hit
}
