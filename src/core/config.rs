use serde::{Deserialize, Serialize};

const CONFIG_FILE: &str = "parlor_config.json";

/// Engine tunables. Loaded from `<data_dir>/parlor_config.json` when
/// present; any missing field falls back to its default, a broken file
/// falls back entirely.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Most-recent messages fetched when a channel becomes active.
    pub channel_history_limit: u32,
    /// Most-recent messages fetched when a conversation becomes active.
    pub direct_history_limit: u32,
    /// Optimistic channel entries merge with a confirmed push event when
    /// author and body match and timestamps differ by at most this much.
    pub reconcile_window_ms: i64,
    /// Debounce for the conversation-list refresh triggered by inbound
    /// events addressed to a non-active counterpart.
    pub list_refresh_debounce_ms: u64,
    /// Auto-dismiss delay for notices; 0 keeps them until cleared.
    pub notice_dismiss_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            channel_history_limit: 50,
            direct_history_limit: 50,
            reconcile_window_ms: 5_000,
            list_refresh_debounce_ms: 400,
            notice_dismiss_ms: 6_000,
        }
    }
}

pub fn load_engine_config(data_dir: &str) -> EngineConfig {
    let path = std::path::Path::new(data_dir).join(CONFIG_FILE);
    let raw = match std::fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(_) => return EngineConfig::default(),
    };
    match serde_json::from_str::<EngineConfig>(&raw) {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::warn!(%e, path = %path.display(), "config parse failed, using defaults");
            EngineConfig::default()
        }
    }
}
