use std::time::{SystemTime, UNIX_EPOCH};

/// return nanoseconds since the unix epoch
pub(crate) fn get_now_as_ns() -> u64 {
    let now = SystemTime::now();
    let since_epoch = now.duration_since(UNIX_EPOCH).expect("Time went backwards");
    since_epoch.as_nanos() as u64
}
