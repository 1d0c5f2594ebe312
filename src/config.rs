use std::path::PathBuf;

pub const DEFAULT_LOG_FILTER: &str = "ccmrd=info";
pub const DEFAULT_MAX_ATTACHMENT_BYTES: u64 = 5 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Workspace opened before the first request, if any.
    pub workspace: Option<PathBuf>,
    pub log_filter: String,
    pub max_attachment_bytes: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            workspace: None,
            log_filter: DEFAULT_LOG_FILTER.to_string(),
            max_attachment_bytes: DEFAULT_MAX_ATTACHMENT_BYTES,
        }
    }
}

impl DaemonConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();
        if let Some(ws) = get("CCMRD_WORKSPACE").filter(|s| !s.trim().is_empty()) {
            cfg.workspace = Some(PathBuf::from(ws.trim()));
        }
        if let Some(filter) = get("CCMRD_LOG")
            .or_else(|| get("RUST_LOG"))
            .filter(|s| !s.trim().is_empty())
        {
            cfg.log_filter = filter;
        }
        // Ignore values that don't parse rather than refusing to start.
        if let Some(n) = get("CCMRD_MAX_ATTACHMENT_BYTES").and_then(|s| s.trim().parse::<u64>().ok())
        {
            if n > 0 {
                cfg.max_attachment_bytes = n;
            }
        }
        cfg
    }
}
