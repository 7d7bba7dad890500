//! CPU pinning for worker threads.

use log::warn;

/// Pins the calling thread to `cpu`. Failure is logged and ignored; the
/// thread keeps running unpinned.
#[cfg(target_os = "linux")]
pub fn set_affinity(cpu: usize) {
    unsafe {
        let mut cpu_set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_ZERO(&mut cpu_set);
        libc::CPU_SET(cpu, &mut cpu_set);
        let ret = libc::sched_setaffinity(
            0,
            std::mem::size_of::<libc::cpu_set_t>(),
            &cpu_set,
        );
        if ret != 0 {
            warn!(
                "sched_setaffinity({cpu}) failed: {}",
                std::io::Error::last_os_error()
            );
        }
    }
}

#[cfg(not(target_os = "linux"))]
pub fn set_affinity(cpu: usize) {
    let _ = cpu;
    warn!("thread pinning is not supported on this platform");
}

/// The CPU the calling thread currently runs on, when the platform can
/// tell.
#[cfg(target_os = "linux")]
pub fn current_cpu() -> Option<usize> {
    let cpu = unsafe { libc::sched_getcpu() };
    (cpu >= 0).then_some(cpu as usize)
}

#[cfg(not(target_os = "linux"))]
pub fn current_cpu() -> Option<usize> {
    None
}
