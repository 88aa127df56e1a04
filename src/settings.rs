//! Run settings with provenance
//!
//! Settings are merged from four layers (last wins):
//! 1. Built-in defaults
//! 2. TOML settings file (explicit path, or `CALC_RECIPES_CONFIG_FILE`)
//! 3. Environment variables (`CALC_RECIPES_<FIELD>`)
//! 4. CLI overrides

use calc_config::{merge_layers, ConfigMap, ConfigValue};
use serde::{Deserialize, Deserializer, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::calculator::Program;

/// Environment variable naming the settings file
pub const CONFIG_FILE_ENV: &str = "CALC_RECIPES_CONFIG_FILE";

/// Prefix for per-field environment overrides
pub const ENV_PREFIX: &str = "CALC_RECIPES_";

const BOOL_FIELDS: &[&str] = &["create_unique_dir", "keep_scratch"];

const FIELDS: &[&str] = &[
    "scratch_dir",
    "results_dir",
    "dftb_command",
    "psi4_command",
    "create_unique_dir",
    "keep_scratch",
];

/// Errors for loading settings
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("IO error reading {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

/// Where the runner works and which programs it launches
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// Parent of the per-calculation scratch directories
    pub scratch_dir: PathBuf,

    /// Where finished calculation outputs are moved
    pub results_dir: PathBuf,

    /// Command line for DFTB+ (string is split on whitespace)
    #[serde(deserialize_with = "command_line")]
    pub dftb_command: Vec<String>,

    /// Command line for Psi4 (string is split on whitespace)
    #[serde(deserialize_with = "command_line")]
    pub psi4_command: Vec<String>,

    /// Put each calculation's outputs in its own subdirectory of `results_dir`
    pub create_unique_dir: bool,

    /// Leave the scratch directory in place after a successful run
    pub keep_scratch: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            scratch_dir: std::env::temp_dir(),
            results_dir: PathBuf::from("."),
            dftb_command: vec!["dftb+".to_string()],
            psi4_command: vec!["psi4".to_string()],
            create_unique_dir: true,
            keep_scratch: false,
        }
    }
}

fn command_line<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum CommandLine {
        Line(String),
        Argv(Vec<String>),
    }

    Ok(match CommandLine::deserialize(deserializer)? {
        CommandLine::Line(line) => line.split_whitespace().map(String::from).collect(),
        CommandLine::Argv(argv) => argv,
    })
}

impl Settings {
    /// Command line for a program
    pub fn command(&self, program: Program) -> &[String] {
        match program {
            Program::Dftb => &self.dftb_command,
            Program::Psi4 => &self.psi4_command,
        }
    }

    fn to_config_map(&self) -> Result<ConfigMap, SettingsError> {
        let value = serde_json::to_value(self).map_err(|e| SettingsError::Parse(e.to_string()))?;
        ConfigMap::try_from(value).map_err(|e| SettingsError::Parse(e.to_string()))
    }

    fn validate(&self) -> Result<(), SettingsError> {
        for (name, command) in [("dftb_command", &self.dftb_command), ("psi4_command", &self.psi4_command)] {
            if command.first().map_or(true, |program| program.is_empty()) {
                return Err(SettingsError::Validation(format!("{} must not be empty", name)));
            }
        }
        if self.scratch_dir.as_os_str().is_empty() {
            return Err(SettingsError::Validation("scratch_dir must not be empty".to_string()));
        }
        if self.results_dir.as_os_str().is_empty() {
            return Err(SettingsError::Validation("results_dir must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Origin of a settings layer
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SettingsOrigin {
    Builtin,
    File,
    Env,
    Cli,
}

/// A contributing settings layer with provenance
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SettingsSource {
    pub origin: SettingsOrigin,

    /// File path (file layer only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// SHA-256 digest of raw file bytes (file layer only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,

    /// Keys this layer set
    pub keys: Vec<String>,
}

/// Merged settings plus the layers they came from
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectiveSettings {
    pub settings: Settings,
    pub sources: Vec<SettingsSource>,
}

impl EffectiveSettings {
    /// Build from the process environment.
    ///
    /// `config_file` takes precedence over `CALC_RECIPES_CONFIG_FILE`.
    pub fn from_env(
        config_file: Option<&Path>,
        cli_overrides: Option<&ConfigMap>,
    ) -> Result<Self, SettingsError> {
        let env_file = std::env::var_os(CONFIG_FILE_ENV).map(PathBuf::from);
        let file = config_file.map(Path::to_path_buf).or(env_file);
        let vars: Vec<(String, String)> = std::env::vars().collect();
        Self::build(file.as_deref(), &vars, cli_overrides)
    }

    /// Build from explicit layers
    pub fn build(
        config_file: Option<&Path>,
        env_vars: &[(String, String)],
        cli_overrides: Option<&ConfigMap>,
    ) -> Result<Self, SettingsError> {
        let builtin = Settings::default().to_config_map()?;
        let mut layers = vec![builtin];
        let mut sources = vec![SettingsSource {
            origin: SettingsOrigin::Builtin,
            path: None,
            digest: None,
            keys: FIELDS.iter().map(|f| f.to_string()).collect(),
        }];

        if let Some(path) = config_file {
            if path.exists() {
                let (map, digest) = load_toml_file(path)?;
                debug!(path = %path.display(), %digest, "loaded settings file");
                sources.push(SettingsSource {
                    origin: SettingsOrigin::File,
                    path: Some(path.to_string_lossy().to_string()),
                    digest: Some(digest),
                    keys: map.keys().cloned().collect(),
                });
                layers.push(map);
            } else {
                warn!(path = %path.display(), "settings file not found, skipping");
            }
        }

        let env_map = env_layer(env_vars);
        if !env_map.is_empty() {
            sources.push(SettingsSource {
                origin: SettingsOrigin::Env,
                path: None,
                digest: None,
                keys: env_map.keys().cloned().collect(),
            });
            layers.push(env_map);
        }

        if let Some(cli) = cli_overrides.filter(|cli| !cli.is_empty()) {
            sources.push(SettingsSource {
                origin: SettingsOrigin::Cli,
                path: None,
                digest: None,
                keys: cli.keys().cloned().collect(),
            });
            layers.push(cli.clone());
        }

        let refs: Vec<&ConfigMap> = layers.iter().collect();
        let merged = merge_layers(&refs).strip_removals();
        let value = merged
            .to_json()
            .map_err(|e| SettingsError::Parse(e.to_string()))?;
        let settings: Settings =
            serde_json::from_value(value).map_err(|e| SettingsError::Validation(e.to_string()))?;
        settings.validate()?;

        Ok(Self { settings, sources })
    }
}

/// Load and parse a TOML settings file, returning the map and digest
fn load_toml_file(path: &Path) -> Result<(ConfigMap, String), SettingsError> {
    let bytes = fs::read(path).map_err(|source| SettingsError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    let digest = hex::encode(hasher.finalize());

    let contents = String::from_utf8(bytes)
        .map_err(|e| SettingsError::Parse(format!("Invalid UTF-8: {}", e)))?;
    let map: ConfigMap = toml::from_str(&contents)
        .map_err(|e| SettingsError::Parse(format!("TOML parse error: {}", e)))?;

    Ok((map, digest))
}

/// Collect `CALC_RECIPES_<FIELD>` variables into a layer
fn env_layer(vars: &[(String, String)]) -> ConfigMap {
    let mut layer = ConfigMap::new();
    for field in FIELDS {
        let name = format!("{}{}", ENV_PREFIX, field.to_uppercase());
        let Some((_, raw)) = vars.iter().find(|(key, _)| *key == name) else {
            continue;
        };
        let value = if BOOL_FIELDS.contains(field) {
            match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => ConfigValue::Bool(true),
                "0" | "false" | "no" | "off" => ConfigValue::Bool(false),
                _ => ConfigValue::String(raw.clone()),
            }
        } else {
            ConfigValue::String(raw.clone())
        };
        layer.insert(*field, value);
    }
    layer
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn env(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_builtin_only() {
        let effective = EffectiveSettings::build(None, &[], None).unwrap();
        assert_eq!(effective.settings, Settings::default());
        assert_eq!(effective.sources.len(), 1);
        assert_eq!(effective.sources[0].origin, SettingsOrigin::Builtin);
    }

    #[test]
    fn test_file_layer() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "results_dir = \"/data/results\"").unwrap();
        writeln!(file, "dftb_command = [\"mpirun\", \"-np\", \"4\", \"dftb+\"]").unwrap();

        let effective = EffectiveSettings::build(Some(file.path()), &[], None).unwrap();

        assert_eq!(effective.settings.results_dir, PathBuf::from("/data/results"));
        assert_eq!(effective.settings.dftb_command, vec!["mpirun", "-np", "4", "dftb+"]);
        assert_eq!(effective.settings.psi4_command, vec!["psi4"]);

        let source = &effective.sources[1];
        assert_eq!(source.origin, SettingsOrigin::File);
        assert_eq!(source.digest.as_ref().unwrap().len(), 64);
        let mut keys = source.keys.clone();
        keys.sort();
        assert_eq!(keys, vec!["dftb_command", "results_dir"]);
    }

    #[test]
    fn test_env_over_file_and_cli_over_env() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "results_dir = \"/from/file\"").unwrap();
        writeln!(file, "keep_scratch = false").unwrap();

        let vars = env(&[
            ("CALC_RECIPES_RESULTS_DIR", "/from/env"),
            ("CALC_RECIPES_KEEP_SCRATCH", "yes"),
            ("CALC_RECIPES_PSI4_COMMAND", "psi4 --nthread 2"),
            ("UNRELATED", "x"),
        ]);
        let cli = ConfigMap::new().with("results_dir", "/from/cli");

        let effective = EffectiveSettings::build(Some(file.path()), &vars, Some(&cli)).unwrap();

        assert_eq!(effective.settings.results_dir, PathBuf::from("/from/cli"));
        assert!(effective.settings.keep_scratch);
        assert_eq!(effective.settings.psi4_command, vec!["psi4", "--nthread", "2"]);
        let origins: Vec<SettingsOrigin> = effective.sources.iter().map(|s| s.origin).collect();
        assert_eq!(
            origins,
            vec![SettingsOrigin::Builtin, SettingsOrigin::File, SettingsOrigin::Env, SettingsOrigin::Cli]
        );
    }

    #[test]
    fn test_missing_file_is_skipped() {
        let effective =
            EffectiveSettings::build(Some(Path::new("/nonexistent/calc.toml")), &[], None).unwrap();
        assert_eq!(effective.sources.len(), 1);
    }

    #[test]
    fn test_unknown_key_rejected() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "scratch = \"/tmp\"").unwrap();
        let err = EffectiveSettings::build(Some(file.path()), &[], None).unwrap_err();
        assert!(matches!(err, SettingsError::Validation(_)));
    }

    #[test]
    fn test_empty_command_rejected() {
        let cli = ConfigMap::new().with("dftb_command", "");
        let err = EffectiveSettings::build(None, &[], Some(&cli)).unwrap_err();
        assert!(err.to_string().contains("dftb_command"));
    }

    #[test]
    fn test_bad_toml() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "results_dir = ").unwrap();
        let err = EffectiveSettings::build(Some(file.path()), &[], None).unwrap_err();
        assert!(matches!(err, SettingsError::Parse(_)));
    }

    #[test]
    fn test_command_lookup() {
        let settings = Settings::default();
        assert_eq!(settings.command(Program::Dftb).to_vec(), vec!["dftb+"]);
        assert_eq!(settings.command(Program::Psi4).to_vec(), vec!["psi4"]);
    }
}
