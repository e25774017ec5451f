//! Top-level configuration for ghost.
//!
//! The configuration is a YAML document holding the optional master keeper
//! name and a map of named keeper entries. Each entry is an unstructured
//! mapping with a `type` key; the rest of the keys belong to the plugin
//! registered for that type and are decoded by its builder. Any leaf value
//! may be a secret reference (see [`SecretRef`]) resolved at build time.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Default configuration file name under the home directory.
const CONFIG_FILE: &str = ".ghost.yaml";

/// The mapping key that marks a secret reference.
pub const SECRET_REF_KEY: &str = "__SECRET__";

/// An unstructured keeper configuration entry.
pub type KeeperEntry = serde_yaml::Mapping;

/// The `type` string of a keeper entry, if present.
pub fn entry_type(entry: &KeeperEntry) -> Option<&str> {
    entry.get("type").and_then(serde_yaml::Value::as_str)
}

/// A reference to a secret embedded in configuration.
///
/// Appears as `{__SECRET__: {keeper, secret, field}}` anywhere inside a
/// keeper entry and is replaced with the referenced string at build time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SecretRef {
    /// Name of the keeper holding the secret.
    #[serde(default)]
    pub keeper: String,

    /// Id or name of the secret to fetch.
    #[serde(default)]
    pub secret: String,

    /// Attribute or custom field to extract.
    #[serde(default)]
    pub field: String,
}

/// The top-level ghost configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Keeper used when the caller does not name one explicitly.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub master: Option<String>,

    /// Named keeper entries.
    #[serde(default)]
    pub keepers: BTreeMap<String, KeeperEntry>,
}

impl Config {
    /// Create an empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve the configuration path: the requested path if given,
    /// otherwise `$HOME/.ghost.yaml`.
    pub fn path(requested: Option<&Path>) -> std::io::Result<PathBuf> {
        if let Some(p) = requested {
            if let Some(dir) = p.parent() {
                if !dir.as_os_str().is_empty() && !dir.is_dir() {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::NotFound,
                        format!(
                            "requested configuration path directory {:?} does not exist",
                            dir
                        ),
                    ));
                }
            }
            return Ok(p.to_path_buf());
        }

        let home = dirs::home_dir().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, "unable to locate home directory")
        })?;
        Ok(home.join(CONFIG_FILE))
    }

    /// Load the configuration from the given path, or from the default
    /// path. A missing file yields an empty configuration.
    pub fn load(requested: Option<&Path>) -> anyhow::Result<Self> {
        let path = Self::path(requested)?;
        if !path.exists() {
            return Ok(Self::new());
        }

        let data = std::fs::read_to_string(&path)?;
        let config = serde_yaml::from_str(&data)?;
        Ok(config)
    }

    /// Save the configuration atomically: the document is written to a
    /// temporary file in the same directory with mode 0600 and renamed
    /// over the target.
    pub fn save(&self, requested: Option<&Path>) -> anyhow::Result<()> {
        let path = Self::path(requested)?;
        let dir = path
            .parent()
            .filter(|d| !d.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        tmp.write_all(serde_yaml::to_string(self)?.as_bytes())?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(tmp.path(), std::fs::Permissions::from_mode(0o600))?;
        }

        tmp.persist(&path)?;
        Ok(())
    }

    /// Look up a keeper entry by name.
    pub fn keeper(&self, name: &str) -> Option<&KeeperEntry> {
        self.keepers.get(name)
    }

    /// Resolve the keeper the caller asked for, falling back to the
    /// configured master keeper.
    pub fn resolve_keeper_name<'a>(&'a self, explicit: Option<&'a str>) -> anyhow::Result<&'a str> {
        if let Some(name) = explicit {
            return Ok(name);
        }
        self.master
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("no keeper named and no master keeper configured"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_yaml() -> &'static str {
        r#"
master: main
keepers:
  main:
    type: memory
  files:
    type: low
    path: /tmp/secrets.yaml
"#
    }

    #[test]
    fn test_parse_round_trip() {
        let config: Config = serde_yaml::from_str(sample_yaml()).unwrap();
        assert_eq!(config.master.as_deref(), Some("main"));
        assert_eq!(config.keepers.len(), 2);
        assert_eq!(entry_type(config.keeper("main").unwrap()), Some("memory"));
        assert_eq!(entry_type(config.keeper("files").unwrap()), Some("low"));

        let rendered = serde_yaml::to_string(&config).unwrap();
        let reparsed: Config = serde_yaml::from_str(&rendered).unwrap();
        assert_eq!(reparsed.master, config.master);
        assert_eq!(reparsed.keepers.len(), config.keepers.len());
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ghost.yaml");
        let config = Config::load(Some(&path)).unwrap();
        assert!(config.master.is_none());
        assert!(config.keepers.is_empty());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ghost.yaml");

        let mut config = Config::new();
        config.master = Some("main".to_string());
        let mut entry = KeeperEntry::new();
        entry.insert("type".into(), "memory".into());
        config.keepers.insert("main".to_string(), entry);
        config.save(Some(&path)).unwrap();

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }

        let reloaded = Config::load(Some(&path)).unwrap();
        assert_eq!(reloaded.master.as_deref(), Some("main"));
        assert!(reloaded.keeper("main").is_some());
    }

    #[test]
    fn test_resolve_keeper_name() {
        let mut config = Config::new();
        assert!(config.resolve_keeper_name(None).is_err());
        config.master = Some("main".to_string());
        assert_eq!(config.resolve_keeper_name(None).unwrap(), "main");
        assert_eq!(config.resolve_keeper_name(Some("other")).unwrap(), "other");
    }

    #[test]
    fn test_secret_ref_decodes() {
        let yaml = r#"
keeper: vault
secret: api-key
field: password
"#;
        let r: SecretRef = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(r.keeper, "vault");
        assert_eq!(r.secret, "api-key");
        assert_eq!(r.field, "password");
    }
}
