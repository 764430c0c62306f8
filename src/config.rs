//! Static server configuration, loaded from a TOML file at startup
//! (spec.6.4's key configuration variables).

use std::time::Duration;

use camino::Utf8PathBuf;
use color_eyre::Result;
use color_eyre::eyre::{Context, eyre};
use serde::Deserialize;

use crate::dispatch::{PasswordEntry, Permission};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub connection_timeout_secs: u64,
    pub max_connections: usize,
    pub max_command_list_size: usize,
    pub max_output_buffer_size: usize,
    pub max_playlist_length: usize,
    pub save_absolute_paths_in_playlists: bool,
    /// Repeatable `password = "<sha256>@<perm,perm,...>"` entries.
    pub password: Vec<String>,
    /// Comma-separated permission list granted to a connection that never
    /// sends `password`. `None` means "derive from whether any password is
    /// configured" (see [`Config::default_permission`]).
    pub default_permissions: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            connection_timeout_secs: 60,
            max_connections: 10,
            max_command_list_size: 2048 * 1024,
            max_output_buffer_size: 8192 * 1024,
            max_playlist_length: 16_384,
            save_absolute_paths_in_playlists: false,
            password: Vec::new(),
            default_permissions: None,
        }
    }
}

impl Config {
    pub fn load(path: &Utf8PathBuf) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("Could not read config file: {path}"))?;
        toml::from_str(&text).wrap_err_with(|| format!("Could not parse config file: {path}"))
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }

    pub fn max_command_list_bytes(&self) -> usize {
        self.max_command_list_size
    }

    pub fn max_output_buffer_bytes(&self) -> usize {
        self.max_output_buffer_size
    }

    pub fn passwords(&self) -> Result<Vec<PasswordEntry>> {
        self.password.iter().map(|entry| parse_password_entry(entry)).collect()
    }

    /// The permission a freshly-connected client starts with, before it (if
    /// ever) calls `password`. Explicit `default_permissions` wins; absent
    /// that, an unprotected server (no `password` entries) grants everything,
    /// matching `Permission`'s own "fully trusted when nothing is configured"
    /// default, while a protected one starts new connections at READ-only
    /// until they authenticate.
    pub fn default_permission(&self) -> Result<Permission> {
        match &self.default_permissions {
            Some(list) => parse_permission_list(list),
            None if self.password.is_empty() => Ok(Permission::default()),
            None => Ok(Permission::NONE),
        }
    }
}

fn parse_permission_list(list: &str) -> Result<Permission> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .try_fold(Permission::NONE, |acc, name| Ok(acc.union(parse_permission_name(name)?)))
}

fn parse_permission_name(name: &str) -> Result<Permission> {
    match name {
        "read" => Ok(Permission::READ),
        "add" => Ok(Permission::ADD),
        "control" => Ok(Permission::CONTROL),
        "admin" => Ok(Permission::ADMIN),
        other => Err(eyre!("unknown permission \"{other}\"")),
    }
}

fn parse_password_entry(entry: &str) -> Result<PasswordEntry> {
    let (hash, perms) = entry
        .split_once('@')
        .ok_or_else(|| eyre!("password entry \"{entry}\" is missing \"@<perm,...>\""))?;
    Ok(PasswordEntry {
        sha256_hex: hash.trim().to_lowercase(),
        permission: parse_permission_list(perms)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_spec_defaults() {
        let config = Config::default();
        assert_eq!(config.connection_timeout_secs, 60);
        assert_eq!(config.max_connections, 10);
        assert_eq!(config.max_playlist_length, 16_384);
        assert!(!config.save_absolute_paths_in_playlists);
    }

    #[test]
    fn toml_with_partial_fields_fills_in_defaults() {
        let toml = r#"
            max_connections = 5
        "#;
        let config: Config = toml::from_str(toml).expect("config should parse");
        assert_eq!(config.max_connections, 5);
        assert_eq!(config.connection_timeout_secs, 60);
    }

    #[test]
    fn password_entry_parses_hash_and_permissions() {
        let config = Config {
            password: vec!["deadbeef@read,add".to_string()],
            ..Config::default()
        };
        let entries = config.passwords().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].sha256_hex, "deadbeef");
        assert!(entries[0].permission.contains(Permission::READ));
        assert!(entries[0].permission.contains(Permission::ADD));
        assert!(!entries[0].permission.contains(Permission::ADMIN));
    }

    #[test]
    fn password_entry_without_at_sign_is_rejected() {
        let config = Config {
            password: vec!["deadbeef".to_string()],
            ..Config::default()
        };
        assert!(config.passwords().is_err());
    }

    #[test]
    fn default_permission_is_full_trust_without_any_password() {
        let config = Config::default();
        assert_eq!(config.default_permission().unwrap(), Permission::default());
    }

    #[test]
    fn default_permission_is_none_when_passwords_are_configured() {
        let config = Config {
            password: vec!["deadbeef@admin".to_string()],
            ..Config::default()
        };
        assert_eq!(config.default_permission().unwrap(), Permission::NONE);
    }
}
