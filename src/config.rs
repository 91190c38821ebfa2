use figment::Figment;
use figment::providers::Env;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_TIMEOUT_MS: u64 = 60_000;
const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const DEFAULT_GEMINI_MODEL: &str = "gemini-2.0-flash";
const DEFAULT_COOLDOWN_SECONDS: u64 = 60;
const DEFAULT_MAX_FAILURES: u32 = 3;
const DEFAULT_MAX_INLINE_MB: usize = 15;
const DEFAULT_MEDIA_TTL_SECONDS: u64 = 30 * 60;

/// 主 key 的环境变量名；备用 key 依次为 `GEMINI_API_KEY_1`、`GEMINI_API_KEY_2`……
pub const PRIMARY_KEY_ENV: &str = "GEMINI_API_KEY";

/// 上游凭证的携带方式。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    /// `?key=<secret>`（Gemini 默认）
    Query,
    /// `Authorization: Bearer <secret>`
    Bearer,
}

impl AuthMode {
    pub fn parse(v: &str) -> Self {
        match v.trim().to_lowercase().as_str() {
            "bearer" | "header" => Self::Bearer,
            _ => Self::Query,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,

    pub timeout_ms: u64,
    pub proxy: String,

    pub debug: String,
    pub data_dir: String,
    pub admin_password: String,

    pub gemini_base_url: String,
    pub gemini_model: String,
    pub auth_mode: AuthMode,

    pub cooldown_seconds: u64,
    pub max_failures: u32,
    pub max_inline_bytes: usize,
    pub media_ttl_seconds: u64,

    pub production: bool,
    /// 启动时从环境变量读到的凭证（按配置顺序）。
    pub env_keys: Vec<(String, String)>,
}

#[derive(Debug, Default, Deserialize)]
struct RawEnv {
    #[serde(alias = "HOST")]
    host: Option<String>,
    #[serde(alias = "PORT")]
    port: Option<u16>,

    #[serde(alias = "TIMEOUT")]
    timeout: Option<u64>,
    #[serde(alias = "PROXY")]
    proxy: Option<String>,

    #[serde(alias = "DEBUG")]
    debug: Option<String>,
    #[serde(alias = "DATA_DIR")]
    data_dir: Option<String>,
    #[serde(alias = "ADMIN_PASSWORD")]
    admin_password: Option<String>,

    #[serde(alias = "GEMINI_BASE_URL")]
    gemini_base_url: Option<String>,
    #[serde(alias = "GEMINI_MODEL")]
    gemini_model: Option<String>,
    #[serde(alias = "GEMINI_AUTH_MODE")]
    gemini_auth_mode: Option<String>,

    #[serde(alias = "COOLDOWN_SECONDS")]
    cooldown_seconds: Option<u64>,
    #[serde(alias = "MAX_FAILURES")]
    max_failures: Option<u32>,
    #[serde(alias = "MAX_INLINE_MB")]
    max_inline_mb: Option<usize>,
    #[serde(alias = "MEDIA_TTL_SECONDS")]
    media_ttl_seconds: Option<u64>,

    #[serde(alias = "PRODUCTION")]
    production: Option<String>,
}

impl Config {
    /// 读取 `.env`、环境变量与 `-debug`。
    ///
    /// 环境变量解析失败时整体退回默认值，错误一并返回，由调用方在日志初始化后输出。
    pub fn load() -> (Self, Option<figment::Error>) {
        load_dotenv();

        let (mut cfg, err) = Self::from_figment(Figment::from(Env::raw()));
        cfg.env_keys = collect_env_keys(|name| std::env::var(name).ok());

        // 命令行覆盖：-debug <level>
        let mut args = std::env::args().skip(1);
        while let Some(arg) = args.next() {
            if arg == "-debug"
                && let Some(v) = args.next()
            {
                cfg.debug = v;
            }
        }

        (cfg, err)
    }

    fn from_figment(figment: Figment) -> (Self, Option<figment::Error>) {
        let (raw, err) = match figment.extract::<RawEnv>() {
            Ok(raw) => (raw, None),
            Err(e) => (RawEnv::default(), Some(e)),
        };

        let cfg = Self {
            host: raw.host.unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: raw.port.unwrap_or(DEFAULT_PORT),
            timeout_ms: raw.timeout.unwrap_or(DEFAULT_TIMEOUT_MS),
            proxy: raw.proxy.unwrap_or_default(),
            debug: raw.debug.unwrap_or_else(|| "off".to_string()),
            data_dir: raw.data_dir.unwrap_or_else(|| "./data".to_string()),
            admin_password: raw.admin_password.unwrap_or_default(),
            gemini_base_url: raw
                .gemini_base_url
                .map(|v| v.trim().trim_end_matches('/').to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| DEFAULT_GEMINI_BASE_URL.to_string()),
            gemini_model: raw
                .gemini_model
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string()),
            auth_mode: AuthMode::parse(raw.gemini_auth_mode.as_deref().unwrap_or("query")),
            cooldown_seconds: raw.cooldown_seconds.unwrap_or(DEFAULT_COOLDOWN_SECONDS),
            max_failures: raw.max_failures.unwrap_or(DEFAULT_MAX_FAILURES).max(1),
            max_inline_bytes: raw.max_inline_mb.unwrap_or(DEFAULT_MAX_INLINE_MB) * 1024 * 1024,
            media_ttl_seconds: raw.media_ttl_seconds.unwrap_or(DEFAULT_MEDIA_TTL_SECONDS),
            production: parse_bool(raw.production.as_deref()),
            env_keys: Vec::new(),
        };
        (cfg, err)
    }

    pub fn log_level(&self) -> crate::logging::LogLevel {
        crate::logging::LogLevel::parse(&self.debug)
    }

    /// 上游调用总是带超时；0 视为未设置，取默认值。
    pub fn timeout(&self) -> Duration {
        match self.timeout_ms {
            0 => Duration::from_millis(DEFAULT_TIMEOUT_MS),
            ms => Duration::from_millis(ms),
        }
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_seconds)
    }

    pub fn media_ttl(&self) -> Duration {
        Duration::from_secs(self.media_ttl_seconds.max(1))
    }

    pub fn keys_file(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join("gemini-keys.json")
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            proxy: String::new(),
            debug: "off".to_string(),
            data_dir: "./data".to_string(),
            admin_password: String::new(),
            gemini_base_url: DEFAULT_GEMINI_BASE_URL.to_string(),
            gemini_model: DEFAULT_GEMINI_MODEL.to_string(),
            auth_mode: AuthMode::Query,
            cooldown_seconds: DEFAULT_COOLDOWN_SECONDS,
            max_failures: DEFAULT_MAX_FAILURES,
            max_inline_bytes: DEFAULT_MAX_INLINE_MB * 1024 * 1024,
            media_ttl_seconds: DEFAULT_MEDIA_TTL_SECONDS,
            production: false,
            env_keys: Vec::new(),
        }
    }
}

/// `GEMINI_API_KEY` → key1，`GEMINI_API_KEY_<n>` → key<n+1>，编号必须从 1 连续。
fn collect_env_keys<F>(lookup: F) -> Vec<(String, String)>
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = Vec::new();
    if let Some(v) = lookup(PRIMARY_KEY_ENV).filter(|v| !v.trim().is_empty()) {
        out.push(("key1".to_string(), v.trim().to_string()));
    }

    let mut n = 1usize;
    while let Some(v) = lookup(&format!("{PRIMARY_KEY_ENV}_{n}")) {
        if v.trim().is_empty() {
            break;
        }
        out.push((format!("key{}", n + 1), v.trim().to_string()));
        n += 1;
    }
    out
}

fn parse_bool(value: Option<&str>) -> bool {
    matches!(
        value.map(|v| v.trim().to_lowercase()).as_deref(),
        Some("1" | "true" | "yes" | "on" | "production")
    )
}

fn load_dotenv() {
    let Some(dotenv_path) = find_dotenv_path() else {
        return;
    };

    let Ok(file) = std::fs::File::open(&dotenv_path) else {
        return;
    };

    let reader = std::io::BufReader::new(file);
    for line in std::io::BufRead::lines(reader).map_while(Result::ok) {
        let Some((key, value)) = parse_dotenv_line(&line) else {
            continue;
        };
        // 已在真实环境中设置的变量优先，不被 .env 覆盖。
        if std::env::var_os(&key).is_some() {
            continue;
        }
        // Rust 2024：set_var 为 unsafe。此处在启动阶段、尚未启动任何线程时调用。
        unsafe {
            std::env::set_var(key, value);
        }
    }
}

fn find_dotenv_path() -> Option<PathBuf> {
    let cwd = std::env::current_dir().ok()?;
    let mut dir: &Path = cwd.as_path();

    loop {
        let candidate = dir.join(".env");
        if candidate.is_file() {
            return Some(candidate);
        }

        // 不越过仓库根目录。
        if dir.join("Cargo.toml").is_file() || dir.join(".git").is_dir() {
            return None;
        }

        let Some(parent) = dir.parent() else {
            break;
        };
        if parent == dir {
            break;
        }
        dir = parent;
    }

    None
}

fn parse_dotenv_line(line: &str) -> Option<(String, String)> {
    let mut line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }

    if let Some(rest) = line.strip_prefix("export ") {
        line = rest.trim_start();
    }

    let eq_idx = line.find('=')?;
    if eq_idx == 0 {
        return None;
    }

    let key = line[..eq_idx].trim();
    if key.is_empty() {
        return None;
    }

    let raw = line[eq_idx + 1..].trim();
    if raw.is_empty() {
        return Some((key.to_string(), String::new()));
    }

    let bytes = raw.as_bytes();
    if bytes.len() >= 2 {
        let first = bytes[0];
        let last = bytes[bytes.len() - 1];
        if (first == b'"' && last == b'"') || (first == b'\'' && last == b'\'') {
            return Some((key.to_string(), raw[1..raw.len() - 1].to_string()));
        }
    }

    Some((key.to_string(), strip_inline_comment(raw).trim().to_string()))
}

fn strip_inline_comment(value: &str) -> &str {
    let bytes = value.as_bytes();
    for i in 0..bytes.len() {
        if bytes[i] != b'#' {
            continue;
        }
        if i == 0 || bytes[i - 1] == b' ' || bytes[i - 1] == b'\t' {
            return value[..i].trim_end();
        }
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn env_keys_follow_primary_then_numbered_order() {
        let keys = collect_env_keys(lookup_from(&[
            ("GEMINI_API_KEY", "primary"),
            ("GEMINI_API_KEY_1", "backup-a"),
            ("GEMINI_API_KEY_2", "backup-b"),
        ]));
        assert_eq!(
            keys,
            vec![
                ("key1".to_string(), "primary".to_string()),
                ("key2".to_string(), "backup-a".to_string()),
                ("key3".to_string(), "backup-b".to_string()),
            ]
        );
    }

    #[test]
    fn env_keys_stop_at_first_gap() {
        let keys = collect_env_keys(lookup_from(&[
            ("GEMINI_API_KEY_1", "a"),
            ("GEMINI_API_KEY_3", "orphan"),
        ]));
        assert_eq!(keys, vec![("key2".to_string(), "a".to_string())]);
    }

    #[test]
    fn dotenv_line_handles_quotes_comments_and_export() {
        assert_eq!(
            parse_dotenv_line("export PORT=8080 # listen"),
            Some(("PORT".to_string(), "8080".to_string()))
        );
        assert_eq!(
            parse_dotenv_line("ADMIN_PASSWORD=\"a # b\""),
            Some(("ADMIN_PASSWORD".to_string(), "a # b".to_string()))
        );
        assert_eq!(parse_dotenv_line("# comment"), None);
        assert_eq!(parse_dotenv_line("=oops"), None);
    }

    #[test]
    fn zero_timeout_falls_back_to_default() {
        let cfg = Config {
            timeout_ms: 0,
            ..Config::default()
        };
        assert_eq!(cfg.timeout(), Duration::from_secs(60));

        let cfg = Config {
            timeout_ms: 1_500,
            ..Config::default()
        };
        assert_eq!(cfg.timeout(), Duration::from_millis(1_500));
    }

    #[test]
    fn env_values_are_applied() {
        let (cfg, err) = Config::from_figment(
            Figment::new()
                .merge(("PORT", 8080))
                .merge(("MAX_FAILURES", 5))
                .merge(("ADMIN_PASSWORD", "pw")),
        );
        assert!(err.is_none());
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.max_failures, 5);
        assert_eq!(cfg.admin_password, "pw");
    }

    #[test]
    fn malformed_env_value_is_reported() {
        let (cfg, err) = Config::from_figment(
            Figment::new()
                .merge(("ADMIN_PASSWORD", "pw"))
                .merge(("MAX_FAILURES", "abc")),
        );
        assert!(err.is_some());
        assert_eq!(cfg.max_failures, DEFAULT_MAX_FAILURES);
        assert_eq!(cfg.admin_password, "");
    }

    #[test]
    fn auth_mode_defaults_to_query() {
        assert_eq!(AuthMode::parse("bearer"), AuthMode::Bearer);
        assert_eq!(AuthMode::parse(""), AuthMode::Query);
        assert_eq!(AuthMode::parse("whatever"), AuthMode::Query);
    }
}
