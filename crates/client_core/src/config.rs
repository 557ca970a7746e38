use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;
use tracing::warn;
use url::Url;

pub const SETTINGS_FILE: &str = "console.toml";
const CONFIG_DIR_NAME: &str = "cctv-console";
const DEFAULT_BACKEND_URL: &str = "http://127.0.0.1:8000/";
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    /// Normalised by [`base_url`]; always ends with `/`.
    pub backend_url: String,
    /// Passed through to map views; never required by the triage workflow.
    pub maps_api_key: Option<String>,
    pub request_timeout: Duration,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            backend_url: DEFAULT_BACKEND_URL.to_string(),
            maps_api_key: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl ClientSettings {
    pub fn backend_base(&self) -> Result<Url, url::ParseError> {
        base_url(&self.backend_url)
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    backend_url: Option<String>,
    maps_api_key: Option<String>,
    request_timeout_secs: Option<u64>,
}

/// Parses a backend base url, forcing a trailing slash on its path.
pub fn base_url(raw: &str) -> Result<Url, url::ParseError> {
    let mut url = Url::parse(raw.trim())?;
    if url.cannot_be_a_base() {
        return Err(url::ParseError::RelativeUrlWithCannotBeABaseBase);
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

/// `console.toml` in the working directory, then in the user config dir.
pub fn settings_candidates() -> Vec<PathBuf> {
    let mut candidates = vec![PathBuf::from(SETTINGS_FILE)];
    if let Some(dir) = dirs::config_dir() {
        candidates.push(dir.join(CONFIG_DIR_NAME).join(SETTINGS_FILE));
    }
    candidates
}

pub fn load_client_settings() -> ClientSettings {
    load_client_settings_from(&settings_candidates(), |key| std::env::var(key).ok())
}

/// Defaults, then the first readable settings file, then environment variables.
pub fn load_client_settings_from(
    candidates: &[PathBuf],
    env: impl Fn(&str) -> Option<String>,
) -> ClientSettings {
    let mut settings = ClientSettings::default();

    if let Some((path, raw)) = candidates
        .iter()
        .find_map(|path| fs::read_to_string(path).ok().map(|raw| (path, raw)))
    {
        apply_file(&mut settings, path, &raw);
    }

    for key in ["CCTV_BACKEND_URL", "APP__BACKEND_URL"] {
        if let Some(v) = env(key) {
            set_backend_url(&mut settings, key, &v);
        }
    }

    for key in ["CCTV_MAPS_API_KEY", "APP__MAPS_API_KEY"] {
        if let Some(v) = env(key) {
            settings.maps_api_key = non_blank(v);
        }
    }

    if let Some(v) = env("CCTV_REQUEST_TIMEOUT_SECS") {
        match v.trim().parse::<u64>() {
            Ok(secs) if secs > 0 => settings.request_timeout = Duration::from_secs(secs),
            _ => warn!(value = %v, "CCTV_REQUEST_TIMEOUT_SECS is not a positive number of seconds"),
        }
    }

    settings
}

fn apply_file(settings: &mut ClientSettings, path: &Path, raw: &str) {
    let file_cfg = match toml::from_str::<FileSettings>(raw) {
        Ok(file_cfg) => file_cfg,
        Err(error) => {
            warn!(path = %path.display(), %error, "ignoring unreadable settings file");
            return;
        }
    };

    if let Some(v) = file_cfg.backend_url {
        set_backend_url(settings, "backend_url", &v);
    }
    if let Some(v) = file_cfg.maps_api_key {
        settings.maps_api_key = non_blank(v);
    }
    match file_cfg.request_timeout_secs {
        Some(0) => warn!(path = %path.display(), "request_timeout_secs must be positive"),
        Some(secs) => settings.request_timeout = Duration::from_secs(secs),
        None => {}
    }
}

fn set_backend_url(settings: &mut ClientSettings, source: &str, raw: &str) {
    match base_url(raw) {
        Ok(url) => settings.backend_url = url.to_string(),
        Err(error) => warn!(%source, value = %raw, %error, "ignoring invalid backend url"),
    }
}

fn non_blank(value: String) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
