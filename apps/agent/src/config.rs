use std::collections::BTreeMap;
use std::time::Duration;
use std::{env, fmt, fs, io, path};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;
use url::Url;

/// Longest round ceiling accepted
pub const MAX_CEILING_SECONDS: u64 = 300;

/// Groups whose index names are shared by every team's results
pub const RESERVED_TEAM_NAMES: [&str; 2] = ["all", "admin"];

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read config file {}: {source}", path.display())]
    ReadFailed { path: path::PathBuf, source: io::Error },

    #[error("failed to write config file {}: {source}", path.display())]
    WriteFailed { path: path::PathBuf, source: io::Error },

    #[error("failed to parse config file {}: {source}", path.display())]
    ParseFailed { path: path::PathBuf, source: toml::de::Error },

    #[error("failed to serialize config: {0}")]
    SerializeFailed(#[from] toml::ser::Error),

    #[error("no config path available, set XDG_CONFIG_HOME or HOME")]
    ConfigPathUnavailable,

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub round: Round,
    pub source: Source,
    pub sink: Sink,
    pub teams: Vec<Team>,
}

/// Round timing, all in seconds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Round {
    /// Time between round starts
    pub interval_seconds: u64,
    /// Deadline for every check of a round
    pub ceiling_seconds: u64,
    /// Time between check definition reloads
    pub refresh_seconds: u64,
    pub straggler_log_seconds: u64,
    /// Delay between attempts to load definitions at startup
    pub startup_retry_seconds: u64,
}

/// Where check definitions are read from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Source {
    /// A single check file or a directory of them
    pub path: path::PathBuf,
}

/// Where result documents are written
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Sink {
    /// Write documents to the log only
    #[default]
    Log,
    Elasticsearch(Elasticsearch),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Elasticsearch {
    pub url: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_verify_certs")]
    pub verify_certs: bool,
    /// Deadline for one document write, connecting included
    #[serde(default = "default_sink_timeout_seconds")]
    pub timeout_seconds: u64,
}

/// A team that every check is instantiated for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    pub name: String,

    /// Template values applied to this team's attribute values
    #[serde(default)]
    pub overrides: BTreeMap<String, String>,
}

fn default_verify_certs() -> bool {
    true
}

fn default_sink_timeout_seconds() -> u64 {
    10
}

impl Default for Config {
    fn default() -> Self {
        Self {
            round: Round::default(),
            source: Source::default(),
            sink: Sink::default(),
            teams: vec![Team::new("team01")],
        }
    }
}

impl Default for Round {
    fn default() -> Self {
        Self {
            interval_seconds: 30,
            ceiling_seconds: 25,
            refresh_seconds: 30,
            straggler_log_seconds: 30,
            startup_retry_seconds: 5,
        }
    }
}

impl Round {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    pub fn ceiling(&self) -> Duration {
        Duration::from_secs(self.ceiling_seconds)
    }

    pub fn refresh(&self) -> Duration {
        Duration::from_secs(self.refresh_seconds)
    }

    pub fn straggler_log(&self) -> Duration {
        Duration::from_secs(self.straggler_log_seconds)
    }

    pub fn startup_retry(&self) -> Duration {
        Duration::from_secs(self.startup_retry_seconds)
    }
}

impl Elasticsearch {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl Default for Source {
    fn default() -> Self {
        Self { path: path::PathBuf::from("checks") }
    }
}

impl Team {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), overrides: BTreeMap::new() }
    }
}

/// Used to ensure we are actually reading a toml file
fn normalize_toml_path(path: &path::Path) -> path::PathBuf {
    let mut path = path.to_path_buf();
    if path.extension().map(|ext| ext != "toml").unwrap_or(true) {
        path.set_extension("toml");
    }
    path
}

/// Get default config path ($XDG_CONFIG_HOME/scoreprobe/config.toml or
/// $HOME/.config/...)
fn default_config_path() -> Result<path::PathBuf, Error> {
    let path = if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
        path::PathBuf::from(config_home)
    } else if let Ok(home_dir) = env::var("HOME") {
        path::PathBuf::from(home_dir).join(".config")
    } else {
        return Err(Error::ConfigPathUnavailable);
    };

    Ok(path.join("scoreprobe/config.toml"))
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let write_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str, value: &dyn fmt::Display| {
                writeln!(f, "  {:indent$}{}: {}", "", label, value, indent = level * 2)
            }
        };
        let write_title_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str| {
                writeln!(f, "{:indent$}{}", "", label, indent = level * 2)
            }
        };

        let write_title_1 = write_title_indented(1);
        let write_1 = write_indented(1);
        let write_2 = write_indented(2);

        writeln!(f, "Current Agent Configuration:")?;
        write_title_1(f, "Round")?;
        write_1(f, "Interval (s)", &self.round.interval_seconds)?;
        write_1(f, "Ceiling (s)", &self.round.ceiling_seconds)?;
        write_1(f, "Refresh (s)", &self.round.refresh_seconds)?;
        write_1(f, "Straggler Log (s)", &self.round.straggler_log_seconds)?;
        write_1(f, "Startup Retry (s)", &self.round.startup_retry_seconds)?;

        write_title_1(f, "Source")?;
        write_1(f, "Path", &self.source.path.display())?;

        write_title_1(f, "Sink")?;
        match &self.sink {
            Sink::Log => write_1(f, "Kind", &"log")?,
            Sink::Elasticsearch(es) => {
                write_1(f, "Kind", &"elasticsearch")?;
                write_1(f, "URL", &es.url)?;
                write_1(f, "Username", &es.username)?;
                write_1(f, "Password", &if es.password.is_empty() { "" } else { "********" })?;
                write_1(f, "Verify Certificates", &es.verify_certs)?;
                write_1(f, "Timeout (s)", &es.timeout_seconds)?;
            }
        }

        write_title_1(f, "Teams")?;
        for team in &self.teams {
            write_1(f, "Name", &team.name)?;
            for (key, value) in &team.overrides {
                write_2(f, key, value)?;
            }
        }

        Ok(())
    }
}

impl Config {
    /// Generate Config structure from file
    ///
    /// Creates a default config in ~/.config/scoreprobe/config.toml or the
    /// specified path if one does not exist
    pub fn from_config(optional_path: Option<impl AsRef<path::Path>>) -> Result<Self, Error> {
        let config_path: path::PathBuf = if let Some(path) = optional_path {
            normalize_toml_path(path.as_ref())
        } else {
            default_config_path()?
        };

        if config_path.exists() {
            let raw_string = fs::read_to_string(&config_path)
                .map_err(|source| Error::ReadFailed { path: config_path.clone(), source })?;
            toml::from_str(raw_string.as_str())
                .map_err(|source| Error::ParseFailed { path: config_path, source })
        } else {
            let config = Self::default();
            config.write_config(&config_path)?;
            Ok(config)
        }
    }

    /// Serialize and write a config to a file
    pub fn write_config(&self, path: &path::Path) -> Result<(), Error> {
        let config_str: String = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|source| Error::WriteFailed { path: parent.to_path_buf(), source })?;
        }

        fs::write(path, config_str)
            .map_err(|source| Error::WriteFailed { path: path.to_path_buf(), source })
    }

    /// Reject settings the agent cannot run with
    pub fn validate(&self) -> Result<(), Error> {
        let round = &self.round;
        for (name, value) in [
            ("interval_seconds", round.interval_seconds),
            ("ceiling_seconds", round.ceiling_seconds),
            ("refresh_seconds", round.refresh_seconds),
            ("straggler_log_seconds", round.straggler_log_seconds),
            ("startup_retry_seconds", round.startup_retry_seconds),
        ] {
            if value == 0 {
                return Err(Error::Invalid(format!("round.{name} must be greater than zero")));
            }
        }

        if round.ceiling_seconds > MAX_CEILING_SECONDS {
            return Err(Error::Invalid(format!(
                "round.ceiling_seconds must be at most {MAX_CEILING_SECONDS}, got {}",
                round.ceiling_seconds
            )));
        }

        if round.ceiling_seconds > round.interval_seconds {
            warn!(
                ceiling = round.ceiling_seconds,
                interval = round.interval_seconds,
                "round ceiling exceeds the round interval, rounds will overlap"
            );
        }

        if let Sink::Elasticsearch(es) = &self.sink {
            Url::parse(&es.url)
                .map_err(|e| Error::Invalid(format!("sink.url `{}` is not a valid URL: {e}", es.url)))?;
            if es.timeout_seconds == 0 {
                return Err(Error::Invalid("sink.timeout_seconds must be greater than zero".into()));
            }
        }

        if let Some(team) = self
            .teams
            .iter()
            .find(|team| RESERVED_TEAM_NAMES.iter().any(|name| team.name.eq_ignore_ascii_case(name)))
        {
            return Err(Error::Invalid(format!(
                "team name `{}` is reserved for shared result indices",
                team.name
            )));
        }

        if self.teams.is_empty() {
            warn!("no teams configured, no checks will run");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let config: Config = toml::from_str(
            r#"
            [round]
            interval_seconds = 60
            ceiling_seconds = 40

            [source]
            path = "/etc/scoreprobe/checks"

            [sink]
            kind = "elasticsearch"
            url = "https://localhost:9200"
            username = "scoreprobe"
            password = "changeme"
            verify_certs = false

            [[teams]]
            name = "team01"

            [[teams]]
            name = "blue"
            overrides = { TeamNum = "7" }
            "#,
        )
        .unwrap();

        assert_eq!(config.round.interval_seconds, 60);
        assert_eq!(config.round.refresh_seconds, 30);
        assert_eq!(config.source.path, path::PathBuf::from("/etc/scoreprobe/checks"));
        let Sink::Elasticsearch(es) = &config.sink else { panic!("expected elasticsearch sink") };
        assert!(!es.verify_certs);
        assert_eq!(es.timeout(), Duration::from_secs(10));
        assert_eq!(config.teams[1].overrides["TeamNum"], "7");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_sink_is_log() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.sink, Sink::Log);
        assert_eq!(config.round, Round::default());
    }

    #[test]
    fn test_validate_rejects_bad_rounds() {
        let mut config = Config::default();
        config.round.ceiling_seconds = 0;
        assert!(matches!(config.validate(), Err(Error::Invalid(_))));

        config.round.ceiling_seconds = 301;
        assert!(matches!(config.validate(), Err(Error::Invalid(_))));

        config.round.ceiling_seconds = 45;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_shared_index_team_names() {
        for name in ["all", "Admin", "ALL"] {
            let config = Config { teams: vec![Team::new("team01"), Team::new(name)], ..Config::default() };
            let err = config.validate().unwrap_err();
            assert!(err.to_string().contains(name), "{err}");
        }

        let config = Config { teams: vec![Team::new("administrators")], ..Config::default() };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_sink_timeout() {
        let config = Config {
            sink: Sink::Elasticsearch(Elasticsearch {
                url: "http://es:9200".into(),
                username: String::new(),
                password: String::new(),
                verify_certs: true,
                timeout_seconds: 0,
            }),
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(Error::Invalid(_))));
    }

    #[test]
    fn test_missing_file_writes_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent");

        let config = Config::from_config(Some(&path)).unwrap();
        assert_eq!(config, Config::default());

        let written = path.with_extension("toml");
        assert!(written.exists());
        let reread = Config::from_config(Some(&written)).unwrap();
        assert_eq!(reread, config);
    }

    #[test]
    fn test_display_masks_password() {
        let config = Config {
            sink: Sink::Elasticsearch(Elasticsearch {
                url: "http://es:9200".into(),
                username: "elastic".into(),
                password: "hunter2".into(),
                verify_certs: true,
                timeout_seconds: 10,
            }),
            teams: vec![Team::new("team01")],
            ..Config::default()
        };

        let shown = config.to_string();
        assert!(shown.contains("team01"));
        assert!(!shown.contains("hunter2"));
    }
}
