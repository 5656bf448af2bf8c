use std::env;
use std::time::Duration;

/// Environment variable names - single source of truth
pub mod env_vars {
    // Matrix transport
    pub const MATRIX_HOMESERVER_URL: &str = "MATRIX_HOMESERVER_URL";
    pub const MATRIX_ACCESS_TOKEN: &str = "MATRIX_ACCESS_TOKEN";
    pub const MATRIX_AUTOJOIN: &str = "MATRIX_AUTOJOIN";
    pub const MATRIX_WELCOME: &str = "MATRIX_WELCOME";
    pub const MATRIX_THREADS: &str = "MATRIX_THREADS";
    pub const MATRIX_RICH_TEXT: &str = "MATRIX_RICH_TEXT";
    // Addressing
    pub const MATRIX_DEFAULT_PREFIX: &str = "MATRIX_DEFAULT_PREFIX";
    pub const MATRIX_DEFAULT_PREFIX_REPLY: &str = "MATRIX_DEFAULT_PREFIX_REPLY";
    pub const MATRIX_PREFIX_DM: &str = "MATRIX_PREFIX_DM";
    // Allow/deny lists (whitespace-separated suffixes)
    pub const MATRIX_BLACKLIST: &str = "MATRIX_BLACKLIST";
    pub const MATRIX_WHITELIST: &str = "MATRIX_WHITELIST";
    pub const MATRIX_ROOM_BLACKLIST: &str = "MATRIX_ROOM_BLACKLIST";
    pub const MATRIX_ROOM_WHITELIST: &str = "MATRIX_ROOM_WHITELIST";
    // Assistant service
    pub const OPENAI_API_KEY: &str = "OPENAI_API_KEY";
    pub const OPENAI_BASE_URL: &str = "OPENAI_BASE_URL";
    pub const OPENAI_ASSISTANT_ID: &str = "OPENAI_ASSISTANT_ID";
    pub const CHATGPT_CONTEXT: &str = "CHATGPT_CONTEXT";
    pub const CHATGPT_TIMEOUT: &str = "CHATGPT_TIMEOUT";
    pub const CHATGPT_POLL_INTERVAL: &str = "CHATGPT_POLL_INTERVAL";
    pub const CHATGPT_IGNORE_MEDIA: &str = "CHATGPT_IGNORE_MEDIA";
    // Collaborators
    pub const REDIS_URL: &str = "REDIS_URL";
    pub const GLOBALID_API_URL: &str = "GLOBALID_API_URL";
    pub const ZENDESK_SUBDOMAIN: &str = "ZENDESK_SUBDOMAIN";
    pub const ZENDESK_EMAIL: &str = "ZENDESK_EMAIL";
    pub const ZENDESK_API_TOKEN: &str = "ZENDESK_API_TOKEN";
}

/// Default values
pub mod defaults {
    pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
    pub const GLOBALID_API_URL: &str = "https://api.globalid.dev";
    /// Overall run deadline in milliseconds.
    pub const RUN_TIMEOUT_MS: u64 = 90_000;
    /// Polling tick interval in milliseconds.
    pub const POLL_INTERVAL_MS: u64 = 1_000;
}

/// How inbound messages are grouped into conversations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextMode {
    /// One conversation per room.
    Room,
    /// One conversation per thread root.
    Thread,
    /// Thread root when the message is threaded, room otherwise.
    Both,
}

impl ContextMode {
    pub fn from_str(s: &str) -> Option<ContextMode> {
        match s.to_lowercase().as_str() {
            "room" => Some(ContextMode::Room),
            "thread" => Some(ContextMode::Thread),
            "both" => Some(ContextMode::Both),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ContextMode::Room => "room",
            ContextMode::Thread => "thread",
            ContextMode::Both => "both",
        }
    }
}

/// Process-wide configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub homeserver_url: String,
    pub access_token: String,
    pub autojoin: bool,
    pub welcome: bool,
    pub reply_in_thread: bool,
    pub rich_text: bool,

    pub context_mode: ContextMode,
    pub default_prefix: Option<String>,
    pub default_prefix_reply: bool,
    /// When false, direct rooms are exempt from the prefix requirement.
    pub prefix_dm: bool,
    pub sender_blacklist: Vec<String>,
    pub sender_whitelist: Vec<String>,
    pub room_blacklist: Vec<String>,
    pub room_whitelist: Vec<String>,
    pub ignore_media: bool,

    pub openai_api_key: String,
    pub openai_base_url: String,
    pub assistant_id: String,
    pub run_timeout: Duration,
    pub poll_interval: Duration,

    pub redis_url: Option<String>,
    pub globalid_api_url: String,
    pub zendesk: Option<ZendeskConfig>,
}

/// Zendesk REST credentials; the ticket tool is only registered when present.
#[derive(Debug, Clone)]
pub struct ZendeskConfig {
    pub subdomain: String,
    pub email: String,
    pub api_token: String,
}

fn env_bool(name: &str, default: bool) -> bool {
    env::var(name)
        .map(|v| v == "true" || v == "1")
        .unwrap_or(default)
}

fn env_ms(name: &str, default: u64) -> Duration {
    let ms = env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default);
    Duration::from_millis(ms)
}

/// Split a whitespace-separated suffix list into its entries.
pub fn parse_suffix_list(raw: &str) -> Vec<String> {
    raw.split_whitespace().map(|s| s.to_string()).collect()
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let require = |name: &str| {
            env::var(name).map_err(|_| format!("{} must be set", name))
        };

        let context_mode = match env::var(env_vars::CHATGPT_CONTEXT) {
            Ok(raw) => ContextMode::from_str(&raw)
                .ok_or_else(|| format!("{} must be room, thread or both", env_vars::CHATGPT_CONTEXT))?,
            Err(_) => ContextMode::Thread,
        };

        let default_prefix = env::var(env_vars::MATRIX_DEFAULT_PREFIX)
            .ok()
            .filter(|p| !p.is_empty());

        let list = |name: &str| {
            env::var(name)
                .map(|raw| parse_suffix_list(&raw))
                .unwrap_or_default()
        };

        let zendesk = match (
            env::var(env_vars::ZENDESK_SUBDOMAIN),
            env::var(env_vars::ZENDESK_EMAIL),
            env::var(env_vars::ZENDESK_API_TOKEN),
        ) {
            (Ok(subdomain), Ok(email), Ok(api_token)) => Some(ZendeskConfig {
                subdomain,
                email,
                api_token,
            }),
            _ => None,
        };

        Ok(Self {
            homeserver_url: require(env_vars::MATRIX_HOMESERVER_URL)?,
            access_token: require(env_vars::MATRIX_ACCESS_TOKEN)?,
            autojoin: env_bool(env_vars::MATRIX_AUTOJOIN, true),
            welcome: env_bool(env_vars::MATRIX_WELCOME, false),
            reply_in_thread: env_bool(env_vars::MATRIX_THREADS, true),
            rich_text: env_bool(env_vars::MATRIX_RICH_TEXT, true),
            context_mode,
            default_prefix,
            default_prefix_reply: env_bool(env_vars::MATRIX_DEFAULT_PREFIX_REPLY, false),
            prefix_dm: env_bool(env_vars::MATRIX_PREFIX_DM, false),
            sender_blacklist: list(env_vars::MATRIX_BLACKLIST),
            sender_whitelist: list(env_vars::MATRIX_WHITELIST),
            room_blacklist: list(env_vars::MATRIX_ROOM_BLACKLIST),
            room_whitelist: list(env_vars::MATRIX_ROOM_WHITELIST),
            ignore_media: env_bool(env_vars::CHATGPT_IGNORE_MEDIA, true),
            openai_api_key: require(env_vars::OPENAI_API_KEY)?,
            openai_base_url: env::var(env_vars::OPENAI_BASE_URL)
                .unwrap_or_else(|_| defaults::OPENAI_BASE_URL.to_string()),
            assistant_id: require(env_vars::OPENAI_ASSISTANT_ID)?,
            run_timeout: env_ms(env_vars::CHATGPT_TIMEOUT, defaults::RUN_TIMEOUT_MS),
            poll_interval: env_ms(env_vars::CHATGPT_POLL_INTERVAL, defaults::POLL_INTERVAL_MS),
            redis_url: env::var(env_vars::REDIS_URL).ok(),
            globalid_api_url: env::var(env_vars::GLOBALID_API_URL)
                .unwrap_or_else(|_| defaults::GLOBALID_API_URL.to_string()),
            zendesk,
        })
    }
}
