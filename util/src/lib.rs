#![allow(clippy::new_without_default)]
#![allow(clippy::needless_range_loop)]
#![allow(clippy::len_without_is_empty)]

//! Integer and byte-stream helpers shared by the CSX control-stream
//! encoder and decoder.

/// Computes `ceil(a / b)`.
pub const fn iceil(a: usize, b: usize) -> usize {
    (a + b - 1) / b
}

pub const fn gcd(i: usize, j: usize) -> usize {
    if j == 0 {
        i
    } else {
        gcd(j, i % j)
    }
}

pub const fn lcm(i: usize, j: usize) -> usize {
    i / gcd(i, j) * j
}

/// Returns the narrowest fixed width (1, 2, 4 or 8 bytes) that can hold
/// `val`.
pub const fn delta_size_bytes(val: u64) -> usize {
    if val <= u8::MAX as u64 {
        1
    } else if val <= u16::MAX as u64 {
        2
    } else if val <= u32::MAX as u64 {
        4
    } else {
        8
    }
}

/// Appends `val` to `buf` in base-128 little-endian form: seven payload
/// bits per byte, high bit set on every byte except the last.
pub fn write_uvarint(buf: &mut Vec<u8>, mut val: u64) {
    const SHIFT: u32 = 7;
    loop {
        let byte = (val & ((1 << SHIFT) - 1)) as u8;
        if val < (1 << SHIFT) {
            buf.push(byte);
            break;
        }
        buf.push(byte | (1 << SHIFT));
        val >>= SHIFT;
    }
}

/// Reads a base-128 little-endian integer from `buf` starting at `*pos`,
/// advancing `*pos` past it.
///
/// Panics if the buffer ends inside the encoding; the control stream is
/// produced by [`write_uvarint`] and a short read is a corrupted stream.
pub fn read_uvarint(buf: &[u8], pos: &mut usize) -> u64 {
    let mut ret = buf[*pos] as u64;
    *pos += 1;
    if ret <= 127 {
        return ret;
    }

    ret -= 128;
    let mut shift = 7;
    loop {
        let uc = buf[*pos] as u64;
        *pos += 1;
        if uc <= 127 {
            ret += uc << shift;
            return ret;
        }
        ret += (uc - 128) << shift;
        shift += 7;
    }
}

/// Appends the low `nr_bytes` bytes of `val` in little-endian order.
pub fn write_fixed_int(buf: &mut Vec<u8>, val: u64, nr_bytes: usize) {
    debug_assert!(nr_bytes <= 8);
    let le = val.to_le_bytes();
    buf.extend_from_slice(&le[..nr_bytes]);
}

/// Reads a `nr_bytes`-wide little-endian integer starting at `*pos`,
/// advancing `*pos` past it.
#[inline]
pub fn read_fixed_int(buf: &[u8], pos: &mut usize, nr_bytes: usize) -> u64 {
    let mut le = [0u8; 8];
    le[..nr_bytes].copy_from_slice(&buf[*pos..*pos + nr_bytes]);
    *pos += nr_bytes;
    u64::from_le_bytes(le)
}

#[inline]
pub fn read_u8(buf: &[u8], pos: &mut usize) -> u64 {
    let ret = buf[*pos];
    *pos += 1;
    ret as u64
}

#[inline]
pub fn read_u16(buf: &[u8], pos: &mut usize) -> u64 {
    let ret = u16::from_le_bytes([buf[*pos], buf[*pos + 1]]);
    *pos += 2;
    ret as u64
}

#[inline]
pub fn read_u32(buf: &[u8], pos: &mut usize) -> u64 {
    let mut le = [0u8; 4];
    le.copy_from_slice(&buf[*pos..*pos + 4]);
    *pos += 4;
    u32::from_le_bytes(le) as u64
}

#[inline]
pub fn read_u64(buf: &[u8], pos: &mut usize) -> u64 {
    let mut le = [0u8; 8];
    le.copy_from_slice(&buf[*pos..*pos + 8]);
    *pos += 8;
    u64::from_le_bytes(le)
}
