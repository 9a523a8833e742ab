use std::{path::PathBuf, time::Duration};

const DEFAULT_POLL_MS: u64 = 2000;
const DEFAULT_JOB_HISTORY_MAX: usize = 200;
const DEFAULT_JOB_LOG_MAX: usize = 500;
const DEFAULT_DOWNLOAD_MAX_BYTES: u64 = 256 * 1024 * 1024;
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 600;
const DEFAULT_LOADERS: &str = "paper,spigot,bukkit,purpur";

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub data_root: PathBuf,
    pub plugins_dir: PathBuf,
    pub poll_interval: Duration,
    pub job_history_max: usize,
    pub job_log_max: usize,
    pub download_max_bytes: u64,
    pub http_timeout: Duration,
    pub github_api: String,
    pub github_token: Option<String>,
    pub modrinth_api: String,
    pub loaders: Vec<String>,
    pub game_version: Option<String>,
    pub log_dir: Option<PathBuf>,
}

impl AgentConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let get_u64 = |name: &str| get(name).and_then(|v| v.parse::<u64>().ok());

        let data_root = absolutize(PathBuf::from(
            get("INGOT_DATA_ROOT").unwrap_or_else(|| "./data".to_string()),
        ));
        let plugins_dir = get("INGOT_PLUGINS_DIR")
            .map(|p| absolutize(PathBuf::from(p)))
            .unwrap_or_else(|| data_root.join("server").join("plugins"));

        let poll_ms = get_u64("INGOT_WORKER_POLL_MS")
            .map(|v| v.clamp(100, 60_000))
            .unwrap_or(DEFAULT_POLL_MS);
        let job_history_max = get_u64("INGOT_JOB_HISTORY_MAX")
            .map(|v| v.clamp(10, 10_000) as usize)
            .unwrap_or(DEFAULT_JOB_HISTORY_MAX);
        let job_log_max = get_u64("INGOT_JOB_LOG_MAX")
            .map(|v| v.clamp(50, 10_000) as usize)
            .unwrap_or(DEFAULT_JOB_LOG_MAX);
        let download_max_bytes = get_u64("INGOT_DOWNLOAD_MAX_BYTES")
            .map(|v| v.clamp(1024 * 1024, 4 * 1024 * 1024 * 1024))
            .unwrap_or(DEFAULT_DOWNLOAD_MAX_BYTES);
        let http_timeout_secs = get_u64("INGOT_HTTP_TIMEOUT_SECS")
            .map(|v| v.clamp(5, 60 * 60))
            .unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS);

        let loaders = get("INGOT_LOADERS")
            .unwrap_or_else(|| DEFAULT_LOADERS.to_string())
            .split(',')
            .map(|s| s.trim().to_ascii_lowercase())
            .filter(|s| !s.is_empty())
            .collect();

        Self {
            data_root,
            plugins_dir,
            poll_interval: Duration::from_millis(poll_ms),
            job_history_max,
            job_log_max,
            download_max_bytes,
            http_timeout: Duration::from_secs(http_timeout_secs),
            github_api: get("INGOT_GITHUB_API")
                .unwrap_or_else(|| "https://api.github.com".to_string())
                .trim_end_matches('/')
                .to_string(),
            github_token: get("INGOT_GITHUB_TOKEN").or_else(|| get("GITHUB_TOKEN")),
            modrinth_api: get("INGOT_MODRINTH_API")
                .unwrap_or_else(|| "https://api.modrinth.com/v2".to_string())
                .trim_end_matches('/')
                .to_string(),
            loaders,
            game_version: get("INGOT_GAME_VERSION"),
            log_dir: get("INGOT_LOG_DIR").map(|p| absolutize(PathBuf::from(p))),
        }
    }

    pub fn jobs_file(&self) -> PathBuf {
        self.data_root.join("jobs.json")
    }

    pub fn history_file(&self) -> PathBuf {
        self.data_root.join("history.json")
    }

    pub fn registry_file(&self) -> PathBuf {
        self.plugins_dir.join("plugins.json")
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.data_root.join("staging")
    }
}

fn absolutize(p: PathBuf) -> PathBuf {
    let abs = if p.is_absolute() {
        p
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(p)
    };

    // Don't fail if the directory doesn't exist yet.
    std::fs::canonicalize(&abs).unwrap_or(abs)
}

pub fn build_http_client(config: &AgentConfig) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(concat!("ingot-agent/", env!("CARGO_PKG_VERSION")))
        .timeout(config.http_timeout)
        .build()
}
