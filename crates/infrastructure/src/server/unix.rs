use std::fs::{self, Permissions};
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tokio::net::UnixListener;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{info, warn};

/// Bind a world-accessible Unix-domain listener at `path`.
///
/// A stale socket file left by a previous run is removed first. On SIGINT or
/// SIGTERM the socket file is removed and the process exits, independently of
/// the listener shutdown path.
///
/// Must be called from within a tokio runtime.
pub fn create_unix_listener(path: &Path) -> io::Result<UnixListener> {
    match fs::remove_file(path) {
        Ok(()) => info!(path = %path.display(), "Removed stale unix socket"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }

    let listener = UnixListener::bind(path)?;

    if let Err(e) = fs::set_permissions(path, Permissions::from_mode(0o777)) {
        drop(listener);
        return Err(e);
    }

    remove_on_signal(path.to_path_buf())?;
    Ok(listener)
}

fn remove_on_signal(path: PathBuf) -> io::Result<()> {
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;

    tokio::spawn(async move {
        tokio::select! {
            _ = interrupt.recv() => {}
            _ = terminate.recv() => {}
        }

        if let Err(e) = fs::remove_file(&path) {
            warn!(path = %path.display(), error = %e, "Failed to remove unix socket");
        }
        std::process::exit(0);
    });

    Ok(())
}
