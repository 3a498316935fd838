use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::ForwarderError;
use crate::prompt::Prompt;

pub const TELEGRAM_SECTION: &str = "Telegram";
pub const FORWARDING_SECTION: &str = "Forwarding";

/// Destination used when none is configured.
pub const DEFAULT_DESTINATION: &str = "@INRDealsBot";
pub const DEFAULT_DELAY_SECONDS: u64 = 5;

pub const ENV_API_ID: &str = "TELEGRAM_API_ID";
pub const ENV_API_HASH: &str = "TELEGRAM_API_HASH";
pub const ENV_PHONE: &str = "TELEGRAM_PHONE";
pub const ENV_BOT_TOKEN: &str = "TELEGRAM_BOT_TOKEN";

type Section = BTreeMap<String, String>;

/// Where, what and how fast to forward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardingConfig {
    pub source_chat_id: Option<String>,
    pub destination_chat_id: String,
    pub keywords: Vec<String>,
    pub forward_media: bool,
    pub delay_seconds: u64,
}

impl Default for ForwardingConfig {
    fn default() -> Self {
        Self {
            source_chat_id: None,
            destination_chat_id: DEFAULT_DESTINATION.to_string(),
            keywords: Vec::new(),
            forward_media: true,
            delay_seconds: DEFAULT_DELAY_SECONDS,
        }
    }
}

/// User-account API credentials from my.telegram.org.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub api_id: i32,
    pub api_hash: String,
    pub phone: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_id", &self.api_id)
            .field("api_hash", &"<redacted>")
            .field("phone", &self.phone)
            .finish()
    }
}

/// Which Telegram account type drives the forwarder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    User(Credentials),
    Bot(String),
}

/// Split a comma-joined keyword list, dropping blanks and case-insensitive
/// duplicates while keeping the first spelling.
pub fn parse_keywords(raw: &str) -> Vec<String> {
    let mut keywords: Vec<String> = Vec::new();
    for keyword in raw.split(',').map(str::trim).filter(|k| !k.is_empty()) {
        let lowered = keyword.to_lowercase();
        if !keywords.iter().any(|k| k.to_lowercase() == lowered) {
            keywords.push(keyword.to_string());
        }
    }
    keywords
}

fn canonical_section(name: &str) -> String {
    if name.eq_ignore_ascii_case(TELEGRAM_SECTION) {
        TELEGRAM_SECTION.to_string()
    } else if name.eq_ignore_ascii_case(FORWARDING_SECTION) {
        FORWARDING_SECTION.to_string()
    } else {
        name.to_string()
    }
}

fn scalar_to_string(value: &toml::Value) -> Option<String> {
    match value {
        toml::Value::String(s) => Some(s.clone()),
        toml::Value::Integer(i) => Some(i.to_string()),
        toml::Value::Float(f) => Some(f.to_string()),
        toml::Value::Boolean(b) => Some(b.to_string()),
        toml::Value::Datetime(d) => Some(d.to_string()),
        toml::Value::Array(items) => items
            .iter()
            .map(scalar_to_string)
            .collect::<Option<Vec<_>>>()
            .map(|parts| parts.join(",")),
        toml::Value::Table(_) => None,
    }
}

/// Copy entries into `target` without overwriting. Keys already in lower
/// case go first so they win over other spellings of the same key.
fn merge_entries(target: &mut Section, entries: Vec<(String, String)>) {
    let (exact, variants): (Vec<_>, Vec<_>) = entries
        .into_iter()
        .partition(|(key, _)| *key == key.to_ascii_lowercase());
    for (key, value) in exact.into_iter().chain(variants) {
        target.entry(key.to_ascii_lowercase()).or_insert(value);
    }
}

fn normalize(table: toml::Table) -> BTreeMap<String, Section> {
    let mut sections: BTreeMap<String, Section> = BTreeMap::new();
    let mut variants = Vec::new();

    for (name, value) in table {
        let toml::Value::Table(inner) = value else {
            warn!("Ignoring top-level key '{}' outside of any section", name);
            continue;
        };
        let mut entries = Vec::with_capacity(inner.len());
        for (key, value) in inner {
            match scalar_to_string(&value) {
                Some(v) => entries.push((key, v)),
                None => warn!("Ignoring nested value [{}].{}", name, key),
            }
        }

        let canonical = canonical_section(&name);
        if canonical == name {
            merge_entries(sections.entry(canonical).or_default(), entries);
        } else {
            debug!("Merging section [{}] into [{}]", name, canonical);
            variants.push((canonical, entries));
        }
    }

    // Keys come out of the table sorted, so variants merge in lexical order.
    for (canonical, entries) in variants {
        merge_entries(sections.entry(canonical).or_default(), entries);
    }

    sections.entry(TELEGRAM_SECTION.to_string()).or_default();
    let forwarding = sections.entry(FORWARDING_SECTION.to_string()).or_default();
    forwarding
        .entry("destination_chat_id".to_string())
        .or_insert_with(|| DEFAULT_DESTINATION.to_string());
    forwarding
        .entry("forward_media".to_string())
        .or_insert_with(|| "true".to_string());
    forwarding
        .entry("delay_seconds".to_string())
        .or_insert_with(|| DEFAULT_DELAY_SECONDS.to_string());

    sections
}

/// The persisted section → key → value document, normalized to canonical
/// section names and lower-case keys at load time.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
    sections: BTreeMap<String, Section>,
}

impl ConfigStore {
    /// Load the file at `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!(
                "No config at {}, starting from defaults",
                path.display()
            );
            return Self::parse(path, "");
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(path, &content)
    }

    pub fn parse(path: &Path, content: &str) -> Result<Self> {
        let table: toml::Table = toml::from_str(content).map_err(|e| {
            ForwarderError::Config(format!("failed to parse {}: {}", path.display(), e))
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            sections: normalize(table),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn render(&self) -> Result<String> {
        toml::to_string(&self.sections).context("Failed to serialize config")
    }

    /// Overwrite the file with the full current state.
    pub fn save(&self) -> Result<()> {
        let content = self.render()?;
        std::fs::write(&self.path, content)
            .with_context(|| format!("Failed to write config file: {}", self.path.display()))?;
        info!("Configuration saved to {}", self.path.display());
        Ok(())
    }

    /// Trimmed, non-empty value of `section.key`.
    pub fn value(&self, section: &str, key: &str) -> Option<&str> {
        self.sections
            .get(section)
            .and_then(|s| s.get(key))
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    #[cfg(test)]
    pub fn section(&self, name: &str) -> Option<&BTreeMap<String, String>> {
        self.sections.get(name)
    }

    fn set(&mut self, section: &str, key: &str, value: String) {
        self.sections
            .entry(section.to_string())
            .or_default()
            .insert(key.to_string(), value);
    }

    pub fn forwarding(&self) -> Result<ForwardingConfig, ForwarderError> {
        let get = |key: &str| self.value(FORWARDING_SECTION, key);

        let delay_seconds = match get("delay_seconds") {
            None => DEFAULT_DELAY_SECONDS,
            Some(raw) => raw.parse::<u64>().map_err(|_| {
                ForwarderError::Config(format!(
                    "delay_seconds must be a non-negative integer, got '{}'",
                    raw
                ))
            })?,
        };

        Ok(ForwardingConfig {
            source_chat_id: get("source_chat_id").map(str::to_owned),
            destination_chat_id: get("destination_chat_id")
                .unwrap_or(DEFAULT_DESTINATION)
                .to_string(),
            keywords: get("keywords").map(parse_keywords).unwrap_or_default(),
            forward_media: get("forward_media")
                .map(|v| v.eq_ignore_ascii_case("true"))
                .unwrap_or(true),
            delay_seconds,
        })
    }

    pub fn set_forwarding(&mut self, config: &ForwardingConfig) {
        match &config.source_chat_id {
            Some(source) => self.set(FORWARDING_SECTION, "source_chat_id", source.clone()),
            None => {
                if let Some(section) = self.sections.get_mut(FORWARDING_SECTION) {
                    section.remove("source_chat_id");
                }
            }
        }
        self.set(
            FORWARDING_SECTION,
            "destination_chat_id",
            config.destination_chat_id.clone(),
        );
        self.set(FORWARDING_SECTION, "keywords", config.keywords.join(","));
        self.set(
            FORWARDING_SECTION,
            "forward_media",
            config.forward_media.to_string(),
        );
        self.set(
            FORWARDING_SECTION,
            "delay_seconds",
            config.delay_seconds.to_string(),
        );
    }

    pub fn set_credentials(&mut self, credentials: &Credentials) {
        self.set(TELEGRAM_SECTION, "api_id", credentials.api_id.to_string());
        self.set(TELEGRAM_SECTION, "api_hash", credentials.api_hash.clone());
        self.set(TELEGRAM_SECTION, "phone", credentials.phone.clone());
    }
}

/// Environment lookup backed by the process environment.
pub fn process_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

const CREDENTIAL_FIELDS: [(&str, &str, &str); 3] = [
    (
        "api_id",
        ENV_API_ID,
        "API ID (from https://my.telegram.org/apps): ",
    ),
    ("api_hash", ENV_API_HASH, "API Hash: "),
    (
        "phone",
        ENV_PHONE,
        "Phone number (with country code, e.g. +1234567890): ",
    ),
];

/// Resolve user-account credentials: environment first, then the config
/// file, then the prompt. The result is written back to the config file.
pub fn resolve_credentials(
    store: &mut ConfigStore,
    env: &dyn Fn(&str) -> Option<String>,
    prompt: &mut dyn Prompt,
) -> Result<Credentials> {
    let mut values = Vec::with_capacity(CREDENTIAL_FIELDS.len());
    for (key, var, question) in CREDENTIAL_FIELDS {
        let value = match non_empty(env(var)) {
            Some(v) => {
                debug!("Using {} from environment", key);
                v
            }
            None => match store.value(TELEGRAM_SECTION, key) {
                Some(v) => v.to_string(),
                None => prompt.ask(question)?,
            },
        };
        if value.is_empty() {
            return Err(ForwarderError::Config(format!("{} is required", key)).into());
        }
        values.push(value);
    }

    let phone = values.pop().unwrap_or_default();
    let api_hash = values.pop().unwrap_or_default();
    let raw_id = values.pop().unwrap_or_default();
    let api_id = raw_id.parse::<i32>().map_err(|_| {
        ForwarderError::Config(format!("api_id must be numeric, got '{}'", raw_id))
    })?;

    let credentials = Credentials {
        api_id,
        api_hash,
        phone,
    };
    store.set_credentials(&credentials);
    store.save()?;
    Ok(credentials)
}

/// A bot token (environment, then config) selects the bot connector;
/// otherwise user-account credentials are resolved.
pub fn resolve_backend(
    store: &mut ConfigStore,
    env: &dyn Fn(&str) -> Option<String>,
    prompt: &mut dyn Prompt,
) -> Result<Backend> {
    let token = non_empty(env(ENV_BOT_TOKEN))
        .or_else(|| store.value(TELEGRAM_SECTION, "bot_token").map(str::to_owned));
    match token {
        Some(token) => Ok(Backend::Bot(token)),
        None => Ok(Backend::User(resolve_credentials(store, env, prompt)?)),
    }
}
