use std::{path::Path, thread, time::Duration};

/// Polls for a Unix domain socket path to exist, the way the rest of this
/// test suite polls for readiness instead of sleeping a fixed guess.
pub fn wait_for_socket(path: &Path) {
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while !path.exists() {
        assert!(std::time::Instant::now() < deadline, "socket {path:?} never appeared");
        thread::sleep(Duration::from_millis(5));
    }
}
