//! Runtime configuration surface.

use std::path::PathBuf;

/// Process-wide settings, read once at startup.
///
/// They are produced by the command-line front end and consumed by the
/// runtime core: the boot image is handed to the external image loader, the
/// kernel library is loaded through the module loader, and the verbosity
/// level gates diagnostic output (0 = silent).
#[derive(Debug, Clone, Default)]
pub struct Settings {
    /// Path to the boot image, if any.
    pub boot_image: Option<PathBuf>,
    /// Path to the kernel library, if any.
    pub kernel_library: Option<PathBuf>,
    /// Verbosity level; 0 is silent.
    pub verbosity: u64,
}

impl Settings {
    /// The log level filter corresponding to the verbosity level.
    pub fn log_level(&self) -> log::LevelFilter {
        match self.verbosity {
            0 => log::LevelFilter::Off,
            1 => log::LevelFilter::Info,
            2 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        }
    }
}
