//! Check definition sources.
//!
//! The filesystem source reads one TOML file per check and instantiates it
//! once for every configured team.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{Context, Result};
use chrono::Utc;
use regex::Regex;
use scoreprobe::models::{DisplayKind, Permission};
use scoreprobe::{Attribute, CheckConfig, CheckMetadata, template};
use serde::Deserialize;
use tracing::{debug, error, info, warn};

use crate::config::Team;

static TEAM_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\S?0*(\d+)$").expect("team number pattern is valid"));

/// Anything that can produce the full set of check configurations
#[async_trait::async_trait]
pub trait CheckSource: Send + Sync {
    async fn load_all(&self) -> Result<Vec<CheckConfig>>;
}

/// Check files on local disk
#[derive(Debug, Clone)]
pub struct Filesystem {
    path: PathBuf,
    teams: Vec<Team>,
}

#[derive(Debug, Deserialize)]
struct TomlCheck {
    #[serde(default)]
    display_name: String,
    #[serde(default)]
    description: String,
    kind: String,
    #[serde(default)]
    points: u64,
    #[serde(default)]
    definition: toml::Table,
    #[serde(default, rename = "attribute")]
    attributes: Vec<TomlAttribute>,
}

#[derive(Debug, Deserialize)]
struct TomlAttribute {
    key: String,
    #[serde(default)]
    value: String,
    #[serde(default)]
    display_name: String,
    #[serde(default)]
    description: String,
    #[serde(default, alias = "permissions")]
    permission: Permission,
    #[serde(default)]
    display_as: DisplayKind,
}

#[async_trait::async_trait]
impl CheckSource for Filesystem {
    async fn load_all(&self) -> Result<Vec<CheckConfig>> {
        let this = self.clone();
        tokio::task::spawn_blocking(move || this.scan())
            .await
            .context("check loading task failed")?
    }
}

impl Filesystem {
    pub fn new(path: impl Into<PathBuf>, teams: Vec<Team>) -> Self {
        Self { path: path.into(), teams }
    }

    /// Load every check under the source path.
    ///
    /// Files that fail to load are skipped when scanning a directory, but a
    /// single-file source must load.
    fn scan(&self) -> Result<Vec<CheckConfig>> {
        let meta = fs::metadata(&self.path)
            .with_context(|| format!("failed to stat check path {}", self.path.display()))?;

        if !meta.is_dir() {
            return self.load_file(&self.path);
        }

        info!(path = %self.path.display(), "searching for checks");
        let mut files = Vec::new();
        collect_toml(&self.path, &mut files);
        files.sort();

        let mut configs = Vec::new();
        for file in files {
            match self.load_file(&file) {
                Ok(loaded) => configs.extend(loaded),
                Err(e) => error!(file = %file.display(), "skipping check file: {e:#}"),
            }
        }

        Ok(configs)
    }

    /// Load one check file, producing a configuration per team
    pub fn load_file(&self, path: &Path) -> Result<Vec<CheckConfig>> {
        debug!(file = %path.display(), "loading check");

        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read check file {}", path.display()))?;
        let check: TomlCheck = toml::from_str(&raw)
            .with_context(|| format!("failed to decode check file {}", path.display()))?;
        let definition = serde_json::to_string(&check.definition)
            .with_context(|| format!("failed to encode definition from {}", path.display()))?;

        let stem = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();

        Ok(self
            .teams
            .iter()
            .map(|team| check.for_team(&stem, team, &definition))
            .collect())
    }
}

impl TomlCheck {
    fn for_team(&self, stem: &str, team: &Team, definition: &str) -> CheckConfig {
        let id = format!("{stem}-{}", team.name);
        let metadata = CheckMetadata {
            id: id.clone(),
            group: team.name.clone(),
            display_name: self.display_name.clone(),
            description: self.description.clone(),
            kind: self.kind.clone(),
            points: if self.points == 0 { 1 } else { self.points },
        };

        let overrides = team_overrides(team);
        let now = Utc::now();

        self.attributes.iter().fold(CheckConfig::new(metadata, definition), |config, attr| {
            let value = template::render(&attr.value, &overrides).unwrap_or_else(|e| {
                warn!(check_id = %id, key = %attr.key, "skipping team overrides for attribute: {e}");
                attr.value.clone()
            });

            let mut attribute = Attribute::new(&id, &team.name, &attr.key)
                .with_permission(attr.permission)
                .with_value(value, now);
            attribute.display_name = attr.display_name.clone();
            attribute.description = attr.description.clone();
            attribute.display_as = attr.display_as;

            config.with_attribute(attribute)
        })
    }
}

/// The team's overrides plus `TeamNum` and `TeamName` when not set
fn team_overrides(team: &Team) -> BTreeMap<String, String> {
    let mut overrides = team.overrides.clone();

    overrides.entry("TeamNum".to_string()).or_insert_with(|| {
        TEAM_NUMBER
            .captures(&team.name)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
            .unwrap_or_else(|| {
                warn!(team = %team.name, "team name has no trailing number, TeamNum is empty");
                String::new()
            })
    });
    overrides.entry("TeamName".to_string()).or_insert_with(|| team.name.clone());

    overrides
}

fn collect_toml(dir: &Path, files: &mut Vec<PathBuf>) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            error!(path = %dir.display(), "skipping directory: {e}");
            return;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        let file_type = match entry.file_type() {
            Ok(file_type) => file_type,
            Err(e) => {
                error!(path = %path.display(), "skipping entry: {e}");
                continue;
            }
        };

        // symlinked directories are not descended into
        if file_type.is_dir() {
            collect_toml(&path, files);
        } else if path.extension().is_some_and(|ext| ext == "toml") && path.is_file() {
            files.push(path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WEB_CHECK: &str = r#"
display_name = "Web Server"
description = "Serves the team homepage"
kind = "http"

[[definition.Requests]]
Host = "{{.Host}}"
Path = "/"
MatchCode = true

[[attribute]]
key = "Host"
value = "10.0.{{.TeamNum}}.5"
permission = "view"
"#;

    fn teams() -> Vec<Team> {
        let mut blue = Team::new("blue");
        blue.overrides.insert("TeamNum".to_string(), "42".to_string());
        vec![Team::new("team01"), Team::new("team10"), blue]
    }

    #[tokio::test]
    async fn test_loads_one_config_per_team() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("web.toml"), WEB_CHECK).unwrap();

        let configs = Filesystem::new(dir.path(), teams()).load_all().await.unwrap();

        let ids: Vec<&str> = configs.iter().map(|c| c.metadata.id.as_str()).collect();
        assert_eq!(ids, vec!["web-team01", "web-team10", "web-blue"]);

        let hosts: Vec<String> = configs.iter().map(|c| c.merged_attributes()["Host"].clone()).collect();
        assert_eq!(hosts, vec!["10.0.1.5", "10.0.10.5", "10.0.42.5"]);

        let first = &configs[0];
        assert_eq!(first.metadata.group, "team01");
        assert_eq!(first.metadata.points, 1);
        assert_eq!(first.attributes[0].permission, Permission::View);

        let definition: serde_json::Value = serde_json::from_str(&first.definition).unwrap();
        assert_eq!(definition["Requests"][0]["Host"], "{{.Host}}");
    }

    #[tokio::test]
    async fn test_directory_scan_skips_broken_files() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("services");
        fs::create_dir(&nested).unwrap();
        fs::write(nested.join("web.toml"), WEB_CHECK).unwrap();
        fs::write(dir.path().join("broken.toml"), "kind = ").unwrap();
        fs::write(dir.path().join("notes.txt"), "not a check").unwrap();

        let configs =
            Filesystem::new(dir.path(), vec![Team::new("team01")]).load_all().await.unwrap();

        assert_eq!(configs.len(), 1);
        assert_eq!(configs[0].metadata.id, "web-team01");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_directory_scan_ignores_symlink_cycles() {
        use std::os::unix::fs::symlink;

        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("services");
        fs::create_dir(&nested).unwrap();
        fs::write(nested.join("web.toml"), WEB_CHECK).unwrap();
        symlink(dir.path(), nested.join("loop")).unwrap();
        symlink(nested.join("web.toml"), dir.path().join("linked.toml")).unwrap();

        let configs =
            Filesystem::new(dir.path(), vec![Team::new("team01")]).load_all().await.unwrap();

        let mut ids: Vec<&str> = configs.iter().map(|c| c.metadata.id.as_str()).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec!["linked-team01", "web-team01"]);
    }

    #[tokio::test]
    async fn test_single_file_errors_propagate() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("broken.toml");
        fs::write(&file, "kind = ").unwrap();

        let result = Filesystem::new(&file, vec![Team::new("team01")]).load_all().await;
        assert!(result.is_err());

        let missing = Filesystem::new(dir.path().join("absent"), Vec::new()).load_all().await;
        assert!(missing.is_err());
    }

    #[test]
    fn test_team_overrides() {
        let overrides = team_overrides(&Team::new("team05"));
        assert_eq!(overrides["TeamNum"], "5");
        assert_eq!(overrides["TeamName"], "team05");

        let overrides = team_overrides(&Team::new("red"));
        assert_eq!(overrides["TeamNum"], "");
    }
}
