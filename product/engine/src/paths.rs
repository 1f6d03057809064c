use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct AppPaths {
    pub base_dir: PathBuf,
}

impl AppPaths {
    pub fn new(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    pub fn config_dir(&self) -> PathBuf {
        self.base_dir.join("config")
    }

    pub fn settings_path(&self) -> PathBuf {
        self.config_dir().join("settings.json")
    }

    pub fn history_path(&self) -> PathBuf {
        self.base_dir.join("history.json")
    }

    pub fn bin_dir(&self) -> PathBuf {
        self.base_dir.join("bin")
    }

    /// Where bundled tool binaries live for the current platform.
    pub fn bundled_bin_dir(&self) -> PathBuf {
        self.bin_dir().join(platform_dir_name())
    }

    pub fn default_download_dir(&self) -> PathBuf {
        let home = std::env::var_os("USERPROFILE")
            .filter(|_| cfg!(windows))
            .or_else(|| std::env::var_os("HOME"))
            .filter(|v| !v.is_empty());
        match home {
            Some(home) => PathBuf::from(home).join("Downloads"),
            None => self.base_dir.join("downloads"),
        }
    }

    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.config_dir())?;
        std::fs::create_dir_all(self.bin_dir())?;
        Ok(())
    }

    /// Per-user data directory used when no base dir is given explicitly.
    pub fn default_base_dir() -> Option<PathBuf> {
        if let Ok(v) = std::env::var("MDUYT_BASE_DIR") {
            let t = v.trim();
            if !t.is_empty() {
                return Some(PathBuf::from(t));
            }
        }

        if cfg!(windows) {
            if let Ok(appdata) = std::env::var("APPDATA") {
                let t = appdata.trim();
                if !t.is_empty() {
                    return Some(PathBuf::from(t).join("mduyt"));
                }
            }
        }

        let home = std::env::var_os("HOME").filter(|v| !v.is_empty())?;
        let home = Path::new(&home);
        if cfg!(target_os = "macos") {
            return Some(home.join("Library").join("Application Support").join("mduyt"));
        }
        Some(home.join(".local").join("share").join("mduyt"))
    }
}

fn platform_dir_name() -> &'static str {
    if cfg!(windows) {
        "win"
    } else if cfg!(target_os = "macos") {
        "mac"
    } else {
        "linux"
    }
}
