//! The allocator capability: node-bound and node-interleaved buffers.
//!
//! Every per-thread structure is allocated by its owning worker, so the
//! default build leans on the kernel's first-touch placement. With the
//! `numa` feature the capability additionally binds buffer pages
//! explicitly (mbind) and can interleave a shared buffer across the
//! nodes of the partitions that read it.

/// Allocates a zeroed `f64` buffer of `len` elements on `node`.
pub fn alloc_on_node(len: usize, node: i32) -> Vec<f64> {
    let buf = vec![0.0f64; len];
    #[cfg(all(feature = "numa", target_os = "linux"))]
    bind_region(
        buf.as_ptr() as *const u8,
        len * core::mem::size_of::<f64>(),
        node,
    );
    #[cfg(not(all(feature = "numa", target_os = "linux")))]
    let _ = node;
    buf
}

/// Allocates a zeroed `f64` buffer interleaved block-wise: the first
/// `parts[0]` elements on `nodes[0]`, the next `parts[1]` on `nodes[1]`,
/// and so on.
pub fn alloc_interleaved(len: usize, parts: &[usize], nodes: &[i32]) -> Vec<f64> {
    let buf = vec![0.0f64; len];
    #[cfg(all(feature = "numa", target_os = "linux"))]
    {
        debug_assert_eq!(parts.len(), nodes.len());
        let mut offset = 0usize;
        for (&part, &node) in parts.iter().zip(nodes) {
            bind_region(
                unsafe { buf.as_ptr().add(offset) } as *const u8,
                part * core::mem::size_of::<f64>(),
                node,
            );
            offset += part;
        }
    }
    #[cfg(not(all(feature = "numa", target_os = "linux")))]
    {
        let _ = (parts, nodes);
    }
    buf
}

/// Binds the whole pages of `[ptr, ptr + size)` to `node`. Partial pages
/// at the edges keep their existing policy.
#[cfg(all(feature = "numa", target_os = "linux"))]
fn bind_region(ptr: *const u8, size: usize, node: i32) {
    use log::warn;

    let page = unsafe { libc::sysconf(libc::_SC_PAGESIZE) } as usize;
    let addr = ptr as usize;
    let start = (addr + page - 1) & !(page - 1);
    let end = (addr + size) & !(page - 1);
    if start >= end || node < 0 {
        return;
    }

    let mut nodemask: libc::c_ulong = 1 << node;
    let ret = unsafe {
        libc::mbind(
            start as *mut libc::c_void,
            end - start,
            libc::MPOL_BIND,
            &mut nodemask,
            core::mem::size_of::<libc::c_ulong>() as u64 * 8,
            libc::MPOL_MF_MOVE as u32,
        )
    };
    if ret != 0 {
        warn!(
            "mbind to node {node} failed: {}",
            std::io::Error::last_os_error()
        );
    }
}

/// NUMA node of `cpu`. Without the `numa` feature every CPU reports
/// node 0.
pub fn node_of_cpu(cpu: usize) -> i32 {
    #[cfg(all(feature = "numa", target_os = "linux"))]
    {
        // The sysfs cpu directory links the node the cpu belongs to.
        let dir = format!("/sys/devices/system/cpu/cpu{cpu}");
        if let Ok(entries) = std::fs::read_dir(dir) {
            for entry in entries.flatten() {
                let name = entry.file_name();
                let name = name.to_string_lossy();
                if let Some(node) = name.strip_prefix("node") {
                    if let Ok(node) = node.parse::<i32>() {
                        return node;
                    }
                }
            }
        }
        0
    }
    #[cfg(not(all(feature = "numa", target_os = "linux")))]
    {
        let _ = cpu;
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_on_node_zeroed() {
        let buf = alloc_on_node(128, 0);
        assert_eq!(buf.len(), 128);
        assert!(buf.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_alloc_interleaved_covers_length() {
        let buf = alloc_interleaved(100, &[60, 40], &[0, 0]);
        assert_eq!(buf.len(), 100);
    }

    #[test]
    fn test_node_of_cpu_defaults() {
        // Whatever the platform, node ids are non-negative.
        assert!(node_of_cpu(0) >= 0);
    }
}
