use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{
    domain::ChannelId, errors::Error, fetcher::MAX_PAGE_SIZE, pacing::DEFAULT_PACE_INTERVAL,
    Result,
};

/// Typed configuration for one migration run.
#[derive(Clone, Debug)]
pub struct Config {
    // Channels
    pub origin_channel_id: ChannelId,
    pub destination_channel_id: ChannelId,

    // Scratch storage
    pub keep_downloaded_files: bool,
    pub scratch_dir: PathBuf,

    // Pipeline tuning
    pub pace_interval: Duration,
    pub page_size: usize,
    pub queue_capacity: usize,

    // Session gateway
    pub gateway_url: Option<String>,
    pub gateway_token: Option<String>,
    pub gateway_timeout: Duration,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (env in production, a map in tests).
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let origin_channel_id = required_channel(&get, "ORIGIN_CHANNEL_ID")?;
        let destination_channel_id = required_channel(&get, "DESTINATION_CHANNEL_ID")?;
        if origin_channel_id == destination_channel_id {
            return Err(Error::Config(
                "ORIGIN_CHANNEL_ID and DESTINATION_CHANNEL_ID must differ".to_string(),
            ));
        }

        // Absent or malformed means "don't keep".
        let keep_downloaded_files = get("KEEP_DOWNLOADED_FILES")
            .and_then(|s| parse_bool(&s))
            .unwrap_or(false);
        let scratch_dir = get("SCRATCH_DIR")
            .and_then(non_empty)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(".temp_media"));

        let pace_interval = get("PACE_INTERVAL_MS")
            .and_then(|s| s.trim().parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_PACE_INTERVAL);
        let page_size = get("PAGE_SIZE")
            .and_then(|s| s.trim().parse::<usize>().ok())
            .unwrap_or(MAX_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE);
        let queue_capacity = get("QUEUE_CAPACITY")
            .and_then(|s| s.trim().parse::<usize>().ok())
            .unwrap_or(100)
            .max(1);

        let gateway_url = get("GATEWAY_URL").and_then(non_empty);
        let gateway_token = get("GATEWAY_TOKEN").and_then(non_empty);
        let gateway_timeout = Duration::from_secs(
            get("GATEWAY_TIMEOUT_SECS")
                .and_then(|s| s.trim().parse::<u64>().ok())
                .unwrap_or(60),
        );

        Ok(Self {
            origin_channel_id,
            destination_channel_id,
            keep_downloaded_files,
            scratch_dir,
            pace_interval,
            page_size,
            queue_capacity,
            gateway_url,
            gateway_token,
            gateway_timeout,
        })
    }
}

fn required_channel(get: &impl Fn(&str) -> Option<String>, key: &str) -> Result<ChannelId> {
    let raw = get(key)
        .and_then(non_empty)
        .ok_or_else(|| Error::Config(format!("{key} environment variable is required")))?;
    raw.trim()
        .parse::<i64>()
        .map(ChannelId)
        .map_err(|e| Error::Config(format!("invalid {key} {raw:?}: {e}")))
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let Some((key, val)) = parse_dotenv_line(raw) else {
            continue;
        };
        if env::var_os(&key).is_some() {
            continue; // do not override existing env
        }
        env::set_var(key, val);
    }
}

fn parse_dotenv_line(raw: &str) -> Option<(String, String)> {
    let line = raw.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let line = line.strip_prefix("export ").unwrap_or(line);
    let (k, v) = line.split_once('=')?;
    let key = k.trim();
    if key.is_empty() {
        return None;
    }

    let mut val = v.trim().to_string();
    if val.len() >= 2
        && ((val.starts_with('"') && val.ends_with('"'))
            || (val.starts_with('\'') && val.ends_with('\'')))
    {
        val = val[1..val.len() - 1].to_string();
    }
    Some((key.to_string(), val))
}

/// Same spellings older `.env` files were written with; anything else is rejected.
fn parse_bool(s: &str) -> Option<bool> {
    match s.trim() {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
