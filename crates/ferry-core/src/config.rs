use std::{
    env, fs,
    path::{Path, PathBuf},
};

use crate::{domain::Role, errors::Error, security::RoleMap, Result};

const DEFAULT_DOWNLOAD_DIR: &str = "/app/downloads";
const DEFAULT_MAX_FILE_SIZE: u64 = 20 * 1024 * 1024;
const DEFAULT_ZOHO_REDIRECT: &str = "https://example.com/oauth/callback";
const DEFAULT_GOOGLE_REDIRECT: &str = "http://localhost:8080/oauth2callback";

/// Typed runtime configuration, read from the environment.
#[derive(Clone, Debug)]
pub struct Config {
    // Core
    pub telegram_bot_token: String,
    pub download_dir: PathBuf,
    pub max_file_size: u64,

    // Authorization
    pub user_roles: RoleMap,
    pub download_roles: Vec<Role>,

    // Plugins (`None` enables every registered plugin)
    pub plugins: Option<Vec<String>>,

    // Cache sizes
    pub recent_message_capacity: usize,
    pub session_capacity: usize,

    // Integrations
    pub zoho: Option<ZohoSettings>,
    pub google: Option<GoogleSettings>,
}

#[derive(Clone, Debug)]
pub struct ZohoSettings {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub organization_id: Option<String>,
    pub token_file: PathBuf,
}

#[derive(Clone, Debug)]
pub struct GoogleSettings {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub token_file: PathBuf,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; `load` passes the process env.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| get(key).and_then(non_empty);

        let telegram_bot_token = var("TELEGRAM_BOT_TOKEN").ok_or_else(|| {
            Error::Config("TELEGRAM_BOT_TOKEN environment variable is required".to_string())
        })?;

        let download_dir =
            PathBuf::from(var("DOWNLOAD_DIR").unwrap_or_else(|| DEFAULT_DOWNLOAD_DIR.to_string()));
        let max_file_size = parse_num("MAX_FILE_SIZE", var("MAX_FILE_SIZE"))?
            .unwrap_or(DEFAULT_MAX_FILE_SIZE);

        let user_roles = RoleMap::parse(&var("USER_ROLES").unwrap_or_default())?;
        let download_roles = parse_roles(
            &var("DOWNLOAD_ROLES").unwrap_or_else(|| "user,admin".to_string()),
        )?;

        let plugins = var("PLUGINS").map(|v| parse_csv_lower(&v));

        let recent_message_capacity =
            parse_num("RECENT_MESSAGE_CAPACITY", var("RECENT_MESSAGE_CAPACITY"))?.unwrap_or(1024);
        let session_capacity =
            parse_num("SESSION_CAPACITY", var("SESSION_CAPACITY"))?.unwrap_or(256);

        let zoho = match (var("ZOHO_CLIENT_ID"), var("ZOHO_CLIENT_SECRET")) {
            (Some(client_id), Some(client_secret)) => Some(ZohoSettings {
                client_id,
                client_secret,
                redirect_uri: var("ZOHO_REDIRECT_URI")
                    .unwrap_or_else(|| DEFAULT_ZOHO_REDIRECT.to_string()),
                organization_id: var("ZOHO_ORGANIZATION_ID"),
                token_file: PathBuf::from(
                    var("ZOHO_TOKEN_FILE").unwrap_or_else(|| "zoho_tokens.json".to_string()),
                ),
            }),
            _ => None,
        };

        let google = match (var("GOOGLE_CLIENT_ID"), var("GOOGLE_CLIENT_SECRET")) {
            (Some(client_id), Some(client_secret)) => Some(GoogleSettings {
                client_id,
                client_secret,
                redirect_uri: var("GOOGLE_REDIRECT_URI")
                    .unwrap_or_else(|| DEFAULT_GOOGLE_REDIRECT.to_string()),
                token_file: PathBuf::from(
                    var("GOOGLE_TOKEN_FILE").unwrap_or_else(|| "google_tokens.json".to_string()),
                ),
            }),
            _ => None,
        };

        Ok(Self {
            telegram_bot_token,
            download_dir,
            max_file_size,
            user_roles,
            download_roles,
            plugins,
            recent_message_capacity,
            session_capacity,
            zoho,
            google,
        })
    }

    /// Whether the plugin registered under `key` should be built.
    pub fn plugin_enabled(&self, key: &str) -> bool {
        match &self.plugins {
            None => true,
            Some(keys) => keys.iter().any(|k| k == key),
        }
    }
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for (key, val) in parse_dotenv(&contents) {
        if env::var_os(&key).is_some() {
            continue; // existing env wins
        }
        env::set_var(key, val);
    }
}

fn parse_dotenv(contents: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };
        let key = k.trim();
        if key.is_empty() {
            continue;
        }

        let mut val = v.trim().to_string();
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }
        out.push((key.to_string(), val));
    }
    out
}

fn parse_num<T: std::str::FromStr>(key: &str, raw: Option<String>) -> Result<Option<T>> {
    raw.map(|s| {
        s.trim()
            .parse::<T>()
            .map_err(|_| Error::Config(format!("{key} must be a non-negative integer, got `{s}`")))
    })
    .transpose()
}

fn parse_roles(raw: &str) -> Result<Vec<Role>> {
    parse_csv_lower(raw).iter().map(|s| s.parse()).collect()
}

fn parse_csv_lower(v: &str) -> Vec<String> {
    v.split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s.trim().to_string())
    }
}
