//! Runtime configuration for pxeserve.

use std::path::PathBuf;

use tracing::warn;

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root directory served over TFTP.
    pub server_root: PathBuf,
    /// Boot filename advertised in DHCP option 67 and the BOOTP file
    /// field.
    pub boot_filename: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_root: PathBuf::new(),
            boot_filename: "pxeboot.com".to_string(),
        }
    }
}

impl Config {
    /// Warn about configurations that will surprise a deployment.
    pub fn warn_if_unusual(&self) {
        if self.server_root.as_os_str().is_empty() {
            warn!("No server root configured; TFTP paths resolve relative to the working directory");
        } else if !self.server_root.is_dir() {
            warn!(
                "Server root {} is not an existing directory",
                self.server_root.display()
            );
        }

        if self.boot_filename.is_empty() {
            warn!("Boot filename is empty; clients will receive an empty option 67");
        }
    }
}
