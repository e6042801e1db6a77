//! Directory helpers following the XDG Base Directory specification
//!
//! - Config: `~/.config/fwunit/` - fallback location of `fwunit.yaml`

use directories::ProjectDirs;
use std::path::PathBuf;

pub fn get_config_dir() -> Option<PathBuf> {
    ProjectDirs::from("org", "fwunit", "fwunit").map(|pd| pd.config_dir().to_path_buf())
}
