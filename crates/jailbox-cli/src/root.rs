//! State root selection.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

/// Subdirectory used under `XDG_RUNTIME_DIR`.
const XDG_SUBDIR: &str = "jailbox";

/// Whether an unprivileged caller should keep state in `XDG_RUNTIME_DIR`.
///
/// Root always uses the system root; FreeBSD has no user namespaces that
/// would make root "rootless".
pub fn should_honor_xdg_runtime_dir(xdg_runtime_dir: Option<&OsStr>, euid: u32) -> bool {
    euid != 0 && xdg_runtime_dir.is_some_and(|dir| !dir.is_empty())
}

/// Picks the state root: explicit flag, then the XDG runtime dir for
/// unprivileged callers, then the configured root.
pub fn resolve(
    flag: Option<&Path>,
    configured: &Path,
    xdg_runtime_dir: Option<&OsStr>,
    euid: u32,
) -> PathBuf {
    if let Some(root) = flag {
        return root.to_path_buf();
    }
    match xdg_runtime_dir {
        Some(dir) if should_honor_xdg_runtime_dir(Some(dir), euid) => {
            Path::new(dir).join(XDG_SUBDIR)
        }
        _ => configured.to_path_buf(),
    }
}
