use directories::ProjectDirs;
use std::path::PathBuf;

pub const APP_QUALIFIER: &str = "com";
pub const APP_ORG: &str = "darklock";
pub const APP_NAME: &str = "pagelock";

pub fn data_dir() -> anyhow::Result<PathBuf> {
    let dirs = ProjectDirs::from(APP_QUALIFIER, APP_ORG, APP_NAME)
        .ok_or_else(|| anyhow::anyhow!("cannot determine data directory"))?;
    Ok(dirs.data_dir().to_path_buf())
}

pub fn profile_path() -> anyhow::Result<PathBuf> {
    if let Ok(override_path) = std::env::var("PAGELOCK_PROFILE") {
        return Ok(PathBuf::from(override_path));
    }
    Ok(data_dir()?.join("profile.json"))
}
