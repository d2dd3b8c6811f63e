use std::{
    collections::HashSet,
    env, fs,
    path::{Path, PathBuf},
};

use chrono_tz::Tz;

use crate::{domain::ConversationId, engine::ChallengePolicy, errors::Error, Result};

/// Backend/system accounts that must never be challenged, regardless of what
/// they send. Extendable via `SERVICE_IDS`.
const DEFAULT_SERVICE_IDS: &[i64] = &[777_000, 42_777];

/// Typed configuration, loaded from the environment (with `.env` support).
#[derive(Clone, Debug)]
pub struct Config {
    pub app_title: String,

    // MTProto app credentials
    pub api_id: i32,
    pub api_hash: String,
    pub session_file: PathBuf,

    // Challenge policy
    pub antispam: ChallengePolicy,

    // Allow-list persistence
    pub data_file: PathBuf,

    // Reconciliation schedule
    pub sweep_cron: String,
    pub timezone: Tz,

    pub service_ids: HashSet<ConversationId>,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));

        let api_id = env_i32("API_ID")
            .ok_or_else(|| Error::Config("API_ID environment variable is required".to_string()))?;
        let api_hash = env_str("API_HASH").and_then(non_empty).ok_or_else(|| {
            Error::Config("API_HASH environment variable is required".to_string())
        })?;

        let app_title = env_str("APP_TITLE")
            .and_then(non_empty)
            .unwrap_or_else(|| "tas".to_string());
        let session_file = env_path("SESSION_FILE").unwrap_or_else(|| PathBuf::from("tas.session"));

        let antispam = ChallengePolicy {
            question: env_str("ANTISPAM_QUESTION")
                .and_then(non_empty)
                .unwrap_or_else(|| "1024-24=?".to_string()),
            answer: env_str("ANTISPAM_ANSWER")
                .and_then(non_empty)
                .unwrap_or_else(|| "1000".to_string()),
        };

        let data_file = env_path("DATA_FILE").unwrap_or_else(|| PathBuf::from("data.json"));

        let sweep_cron = env_str("SWEEP_CRON")
            .and_then(non_empty)
            .unwrap_or_else(|| "*/5 * * * *".to_string());
        let timezone = match env_str("TIMEZONE").and_then(non_empty) {
            Some(name) => name
                .trim()
                .parse::<Tz>()
                .map_err(|e| Error::Config(format!("invalid TIMEZONE: {e}")))?,
            None => chrono_tz::Asia::Shanghai,
        };

        let mut ids = parse_csv_i64(env_str("SERVICE_IDS"));
        if ids.is_empty() {
            ids = DEFAULT_SERVICE_IDS.to_vec();
        }
        let service_ids = ids.into_iter().map(ConversationId).collect();

        Ok(Self {
            app_title,
            api_id,
            api_hash,
            session_file,
            antispam,
            data_file,
            sweep_cron,
            timezone,
            service_ids,
        })
    }
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        env::set_var(key, val);
    }
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn env_i32(key: &str) -> Option<i32> {
    env_str(key).and_then(|s| s.trim().parse::<i32>().ok())
}

fn env_path(key: &str) -> Option<PathBuf> {
    env::var_os(key).map(PathBuf::from)
}

fn parse_csv_i64(v: Option<String>) -> Vec<i64> {
    v.unwrap_or_default()
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse::<i64>().ok())
        .collect()
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
