use std::path::PathBuf;

use directories::BaseDirs;
use tracing::warn;

/// Directory used for the default control socket when a caller doesn't
/// supply an explicit path. Prefers `XDG_RUNTIME_DIR`-style locations so
/// sockets land on tmpfs and are cleaned up on logout; falls back to
/// `/tmp/<app_name>` if no base directories can be resolved.
pub fn socket_dir<S: AsRef<str>>(app_name: S) -> PathBuf {
    let Some(base_dirs) = BaseDirs::new() else {
        warn!("couldn't find basedirs, placing sockets in /tmp/<app_name>");
        return PathBuf::from(format!("/tmp/{}", app_name.as_ref()));
    };
    match base_dirs.runtime_dir() {
        Some(runtime_dir) => runtime_dir.join(app_name.as_ref()),
        None => base_dirs.data_dir().join(app_name.as_ref()).join("run"),
    }
}

pub fn default_stream_socket<S: AsRef<str>>(app_name: S) -> PathBuf {
    socket_dir(app_name).join("gracht.sock")
}

pub fn default_datagram_socket<S: AsRef<str>>(app_name: S) -> PathBuf {
    socket_dir(app_name).join("gracht.dgram")
}
