use std::path::Path;

use serde::Deserialize;

const DEFAULT_THREAD_PAGE_SIZE: usize = 50;
const DEFAULT_AVATAR_PREVIEW_LIMIT: usize = 3;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub(super) struct AppConfig {
    pub(super) thread_page_size: Option<usize>,
    pub(super) avatar_preview_limit: Option<usize>,
    // Safety-net poll in seconds. Off by default; the bus gap detection is
    // the primary recovery path.
    pub(super) safety_poll_secs: Option<u64>,
}

impl AppConfig {
    pub(super) fn thread_page_size(&self) -> usize {
        self.thread_page_size
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_THREAD_PAGE_SIZE)
    }

    pub(super) fn avatar_preview_limit(&self) -> usize {
        self.avatar_preview_limit
            .unwrap_or(DEFAULT_AVATAR_PREVIEW_LIMIT)
    }
}

pub(super) fn load_app_config(data_dir: &str) -> AppConfig {
    let path = Path::new(data_dir).join("shepherd_config.json");
    let Ok(bytes) = std::fs::read(&path) else {
        return AppConfig::default();
    };
    serde_json::from_slice::<AppConfig>(&bytes).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_or_invalid_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().to_str().unwrap();

        let config = load_app_config(data_dir);
        assert_eq!(config.thread_page_size(), DEFAULT_THREAD_PAGE_SIZE);
        assert_eq!(config.avatar_preview_limit(), DEFAULT_AVATAR_PREVIEW_LIMIT);
        assert_eq!(config.safety_poll_secs, None);

        std::fs::write(dir.path().join("shepherd_config.json"), b"not json").unwrap();
        let config = load_app_config(data_dir);
        assert_eq!(config.thread_page_size(), DEFAULT_THREAD_PAGE_SIZE);
    }

    #[test]
    fn partial_config_keeps_unnamed_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("shepherd_config.json"),
            br#"{"thread_page_size": 10, "safety_poll_secs": 30}"#,
        )
        .unwrap();
        let config = load_app_config(dir.path().to_str().unwrap());
        assert_eq!(config.thread_page_size(), 10);
        assert_eq!(config.avatar_preview_limit(), DEFAULT_AVATAR_PREVIEW_LIMIT);
        assert_eq!(config.safety_poll_secs, Some(30));
    }
}
