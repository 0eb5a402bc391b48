//! Coarse wall-clock seconds.
//!
//! All relay bookkeeping (bucket TTLs, elision GC, window stamps) compares
//! whole seconds, so the cheap coarse clock is enough. On Linux this reads
//! `CLOCK_REALTIME_COARSE`; elsewhere it falls back to `SystemTime`.

/// Wall-clock seconds since the Unix epoch.
#[inline(always)]
pub fn now_secs() -> u64 {
    #[cfg(target_os = "linux")]
    {
        let mut ts = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        unsafe {
            libc::clock_gettime(libc::CLOCK_REALTIME_COARSE, &mut ts);
        }
        ts.tv_sec as u64
    }
    #[cfg(not(target_os = "linux"))]
    {
        use std::time::{SystemTime, UNIX_EPOCH};
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    }
}
