use coarsetime::Clock;

/// Coarse wall-clock seconds.
///
/// Idle sweeping and refresh scheduling only need second granularity, and the
/// replay path runs once per captured packet, so the coarse clock is used
/// instead of a syscall per read.
pub fn now_secs() -> u64 {
    Clock::now_since_epoch().as_secs()
}
