//! Where DrinViewer keeps its files on each platform.
//!
//! | Platform | Directory                                     |
//! |----------|-----------------------------------------------|
//! | Windows  | `%APPDATA%\DrinViewer`                        |
//! | macOS    | `~/Library/Application Support/DrinViewer`    |
//! | other    | `$XDG_CONFIG_HOME/drinviewer` or `~/.config/drinviewer` |
//!
//! The desktop and the mobile client share the directory; each owns its own
//! file names inside it.

use std::ffi::OsString;
use std::path::PathBuf;

/// Directory name under the platform config base.
#[cfg(any(target_os = "windows", target_os = "macos"))]
pub const APP_DIR: &str = "DrinViewer";
#[cfg(not(any(target_os = "windows", target_os = "macos")))]
pub const APP_DIR: &str = "drinviewer";

/// Resolves the platform config base directory including [`APP_DIR`].
///
/// Returns `None` when the environment does not say where that is.
pub fn platform_config_dir() -> Option<PathBuf> {
    config_dir_from(|key| std::env::var_os(key))
}

/// [`platform_config_dir`] with the environment lookup passed in.
fn config_dir_from(var: impl Fn(&str) -> Option<OsString>) -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        var("APPDATA").map(|p| PathBuf::from(p).join(APP_DIR))
    }

    #[cfg(target_os = "macos")]
    {
        var("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join(APP_DIR)
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        // XDG_CONFIG_HOME or ~/.config
        let base = var("XDG_CONFIG_HOME")
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
            .or_else(|| var("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join(APP_DIR))
    }
}
