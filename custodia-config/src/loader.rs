use std::{
    env, fmt, fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, anyhow};
use custodia_core::config::DepositServicesConfig;
use tracing::debug;

/// Names a TOML or JSON config file.
pub const CONFIG_PATH_ENV: &str = "CUSTODIA_CONFIG_PATH";
/// Holds the whole config as inline JSON.
pub const CONFIG_JSON_ENV: &str = "CUSTODIA_CONFIG_JSON";

const DEFAULT_CANDIDATES: &[&str] = &[
    "custodia.toml",
    "custodia.json",
    "config/custodia.toml",
    "config/custodia.json",
];

/// Where the effective configuration came from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConfigSource {
    /// Nothing found; built-in defaults.
    #[default]
    Default,
    /// File named by `$CUSTODIA_CONFIG_PATH`.
    EnvPath(PathBuf),
    /// Inline JSON from `$CUSTODIA_CONFIG_JSON`.
    EnvInline,
    /// One of the default candidate files.
    File(PathBuf),
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigSource::Default => f.write_str("built-in defaults"),
            ConfigSource::EnvPath(path) => {
                write!(f, "${CONFIG_PATH_ENV} ({})", path.display())
            }
            ConfigSource::EnvInline => write!(f, "${CONFIG_JSON_ENV}"),
            ConfigSource::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Loads the deposit services configuration.
/// Evaluation order:
/// 1) `$CUSTODIA_CONFIG_PATH` (TOML or JSON file),
/// 2) `$CUSTODIA_CONFIG_JSON` (inline JSON),
/// 3) `custodia.toml` / `custodia.json` in the working directory or `config/`,
/// 4) defaults.
///
/// A `.env` file, if present, is read first.
pub fn load_from_env() -> anyhow::Result<(DepositServicesConfig, ConfigSource)> {
    if let Ok(path) = dotenvy::dotenv() {
        debug!(path = %path.display(), "loaded .env");
    }
    let cwd = env::current_dir().context("failed to resolve working directory")?;
    load_with(|key| env::var(key).ok(), &cwd)
}

/// [`load_from_env`] with an explicit variable lookup and search directory.
pub fn load_with(
    lookup: impl Fn(&str) -> Option<String>,
    search_dir: &Path,
) -> anyhow::Result<(DepositServicesConfig, ConfigSource)> {
    if let Some(path_str) = lookup(CONFIG_PATH_ENV)
        && !path_str.trim().is_empty()
    {
        let path = PathBuf::from(path_str);
        let config = load_from_file(&path)?;
        return Ok((config, ConfigSource::EnvPath(path)));
    }

    if let Some(raw) = lookup(CONFIG_JSON_ENV)
        && !raw.trim().is_empty()
    {
        let parsed = parse_json(&raw)
            .with_context(|| format!("failed to parse {CONFIG_JSON_ENV}"))?;
        return Ok((validated(parsed, CONFIG_JSON_ENV)?, ConfigSource::EnvInline));
    }

    if let Some(path) = find_default_file(search_dir) {
        let config = load_from_file(&path)?;
        return Ok((config, ConfigSource::File(path)));
    }

    Ok((DepositServicesConfig::default(), ConfigSource::Default))
}

/// Reads and validates a config file, choosing the format by extension.
pub fn load_from_file(path: &Path) -> anyhow::Result<DepositServicesConfig> {
    let contents = fs::read_to_string(path).with_context(|| {
        format!("failed to read deposit services config from {}", path.display())
    })?;

    let config = match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => parse_json(&contents)
            .with_context(|| format!("invalid deposit services config {}", path.display()))?,
        Some("toml") => toml::from_str(&contents).map_err(|err| {
            anyhow!("invalid deposit services config {}: {}", path.display(), err)
        })?,
        _ => parse_from_str(&contents, &path.display().to_string())?,
    };
    validated(config, &path.display().to_string())
}

/// Parses TOML, falling back to JSON. Does not validate.
pub fn parse_from_str(contents: &str, origin: &str) -> anyhow::Result<DepositServicesConfig> {
    toml::from_str(contents).or_else(|toml_err| {
        serde_json::from_str(contents).map_err(|json_err| {
            anyhow!(
                "failed to parse deposit services config {}: toml error: {}; json error: {}",
                origin,
                toml_err,
                json_err
            )
        })
    })
}

/// Parses a JSON config. Does not validate.
pub fn parse_json(raw: &str) -> anyhow::Result<DepositServicesConfig> {
    serde_json::from_str(raw).map_err(|err| anyhow!("invalid deposit services config json: {err}"))
}

/// Renders a configuration the way it would be written to `custodia.toml`.
pub fn to_toml(config: &DepositServicesConfig) -> anyhow::Result<String> {
    toml::to_string_pretty(config).context("failed to render configuration as TOML")
}

fn validated(config: DepositServicesConfig, origin: &str) -> anyhow::Result<DepositServicesConfig> {
    config
        .validate()
        .with_context(|| format!("deposit services config {origin} is invalid"))?;
    Ok(config)
}

fn find_default_file(search_dir: &Path) -> Option<PathBuf> {
    DEFAULT_CANDIDATES
        .iter()
        .map(|candidate| search_dir.join(candidate))
        .find(|path| path.exists())
}

#[cfg(test)]
mod tests {
    use super::*;
    use custodia_core::config::DEFAULT_RESOLVER_KEY;
    use custodia_model::DepositStatus;
    use std::collections::HashMap;

    const SAMPLE_TOML: &str = r#"
[dispatcher]
workers = 2
queue_capacity = 8

[poll]
interval_ms = 250

[repositories.pmc]
status_pointer = "/deposit/state"

[repositories.pmc.status_mapping]
received = "submitted"
published = "accepted"
failed = "rejected"

[repositories.pmc.status_ref_rewrite]
find = "http://internal"
replace = "https://public"
"#;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn defaults_when_nothing_is_configured() {
        let dir = tempfile::tempdir().unwrap();
        let (config, source) = load_with(no_env, dir.path()).unwrap();
        assert_eq!(source, ConfigSource::Default);
        assert_eq!(config.dispatcher.workers, 4);
        assert!(config.repositories.is_empty());
    }

    #[test]
    fn default_file_in_search_dir_is_used() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custodia.toml");
        fs::write(&path, SAMPLE_TOML).unwrap();

        let (config, source) = load_with(no_env, dir.path()).unwrap();

        assert_eq!(source, ConfigSource::File(path));
        assert_eq!(config.dispatcher.workers, 2);
        assert_eq!(config.poll.interval_ms, 250);
        assert!(config.poll.enabled, "unset fields keep their defaults");
        let pmc = &config.repositories["pmc"];
        assert_eq!(pmc.status_pointer(), "/deposit/state");
        assert_eq!(pmc.resolver_key(), DEFAULT_RESOLVER_KEY);
        assert_eq!(pmc.map_status("published"), Some(DepositStatus::Accepted));
        assert_eq!(
            pmc.rewrite_status_ref("http://internal/status/1"),
            "https://public/status/1"
        );
    }

    #[test]
    fn env_path_wins_over_inline_json_and_default_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("custodia.toml"), SAMPLE_TOML).unwrap();
        let explicit = dir.path().join("explicit.json");
        fs::write(&explicit, r#"{"dispatcher": {"workers": 7}}"#).unwrap();

        let vars: HashMap<&str, String> = HashMap::from([
            (CONFIG_PATH_ENV, explicit.display().to_string()),
            (CONFIG_JSON_ENV, r#"{"dispatcher": {"workers": 9}}"#.to_string()),
        ]);
        let (config, source) = load_with(|key| vars.get(key).cloned(), dir.path()).unwrap();

        assert_eq!(source, ConfigSource::EnvPath(explicit));
        assert_eq!(config.dispatcher.workers, 7);
    }

    #[test]
    fn inline_json_is_used_without_a_path() {
        let dir = tempfile::tempdir().unwrap();
        let (config, source) = load_with(
            |key| (key == CONFIG_JSON_ENV).then(|| r#"{"critical": {"max_attempts": 3}}"#.to_string()),
            dir.path(),
        )
        .unwrap();
        assert_eq!(source, ConfigSource::EnvInline);
        assert_eq!(config.critical.max_attempts, 3);
    }

    #[test]
    fn invalid_values_are_rejected_with_origin() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custodia.toml");
        fs::write(&path, "[dispatcher]\nworkers = 0\n").unwrap();

        let err = load_from_file(&path).unwrap_err();
        let message = format!("{err:#}");
        assert!(message.contains("custodia.toml"), "{message}");
        assert!(message.contains("dispatcher.workers"), "{message}");
    }

    #[test]
    fn rendered_toml_parses_back() {
        let (config, _) = load_with(
            |key| (key == CONFIG_JSON_ENV).then(|| {
                r#"{"repositories": {"js": {"status_mapping": {"done": "accepted"}}}}"#.to_string()
            }),
            Path::new("/nonexistent"),
        )
        .unwrap();
        let rendered = to_toml(&config).unwrap();
        let reparsed = parse_from_str(&rendered, "rendered").unwrap();
        assert_eq!(reparsed.repositories, config.repositories);
    }
}
