use std::env;
use std::path::PathBuf;

const APP_DIR_NAME: &str = "release-updater";
const STATE_FILE_NAME: &str = "localVersion.json";

/// Per-user data directory for the updater, following each platform's convention.
pub fn default_app_dir() -> PathBuf {
    let base = match env::consts::OS {
        "windows" => env::var_os("LOCALAPPDATA")
            .or_else(|| env::var_os("APPDATA"))
            .map(PathBuf::from),
        "macos" => env::var_os("HOME")
            .map(PathBuf::from)
            .map(|home| home.join("Library").join("Application Support")),
        _ => env::var_os("XDG_DATA_HOME").map(PathBuf::from).or_else(|| {
            env::var_os("HOME")
                .map(PathBuf::from)
                .map(|home| home.join(".local").join("share"))
        }),
    }
    .unwrap_or_else(|| PathBuf::from("."));

    base.join(APP_DIR_NAME)
}

/// The version file lives next to the running process unless configured otherwise.
pub fn default_state_file() -> PathBuf {
    PathBuf::from(STATE_FILE_NAME)
}

pub fn default_install_dir() -> PathBuf {
    default_app_dir().join("current")
}
