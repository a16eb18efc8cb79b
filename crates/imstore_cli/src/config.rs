//! `serve` settings: JSON config file merged with command-line flags.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use imstore_core::StorageConfig;
use imstore_replication::ReplicationConfig;
use imstore_server::ServerConfig;
use serde::Deserialize;

/// Keys accepted in the `--config` file. All optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    /// Storage root.
    pub root: Option<PathBuf>,
    /// RPC listen address.
    pub rpc_listen: Option<SocketAddr>,
    /// Replication listen address (master).
    pub sync_listen: Option<SocketAddr>,
    /// Master to follow; empty or absent means this node is the master.
    pub master: Option<String>,
    /// Messages per offline sync.
    pub limit: Option<usize>,
    /// Offline records examined per sync.
    pub hard_limit: Option<usize>,
    /// Messages per group sync.
    pub group_limit: Option<usize>,
    /// Block file size.
    pub block_size: Option<u64>,
}

impl FileConfig {
    /// Reads a config file.
    pub fn load(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let data = std::fs::read_to_string(path)
            .map_err(|err| format!("cannot read {}: {err}", path.display()))?;
        let config = serde_json::from_str(&data)
            .map_err(|err| format!("invalid config {}: {err}", path.display()))?;
        Ok(config)
    }
}

/// Explicit command-line values. `None` defers to the file, then defaults.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    /// `--root`.
    pub root: Option<PathBuf>,
    /// `--rpc-listen`.
    pub rpc_listen: Option<SocketAddr>,
    /// `--sync-listen`.
    pub sync_listen: Option<SocketAddr>,
    /// `--master`.
    pub master: Option<String>,
    /// `--limit`.
    pub limit: Option<usize>,
    /// `--hard-limit`.
    pub hard_limit: Option<usize>,
    /// `--group-limit`.
    pub group_limit: Option<usize>,
    /// `--block-size`.
    pub block_size: Option<u64>,
}

/// Fully resolved settings for `serve`.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Storage root.
    pub root: PathBuf,
    /// Storage engine configuration.
    pub storage: StorageConfig,
    /// RPC server configuration.
    pub server: ServerConfig,
    /// Replication configuration.
    pub replication: ReplicationConfig,
}

impl Settings {
    /// Merges flags over the file over defaults.
    pub fn resolve(flags: Overrides, file: FileConfig) -> Result<Self, String> {
        let root = flags
            .root
            .or(file.root)
            .ok_or("Storage root required for serve (--root or \"root\" in the config file)")?;

        let defaults = StorageConfig::default();
        let storage = StorageConfig {
            limit: flags.limit.or(file.limit).unwrap_or(defaults.limit),
            hard_limit: flags.hard_limit.or(file.hard_limit).unwrap_or(defaults.hard_limit),
            group_limit: flags.group_limit.or(file.group_limit).unwrap_or(defaults.group_limit),
            block_size: flags.block_size.or(file.block_size).unwrap_or(defaults.block_size),
            ..defaults
        };
        storage.validate().map_err(|err| err.to_string())?;

        let server = match flags.rpc_listen.or(file.rpc_listen) {
            Some(addr) => ServerConfig::new(addr),
            None => ServerConfig::default(),
        };
        let sync_listen = flags
            .sync_listen
            .or(file.sync_listen)
            .unwrap_or(ReplicationConfig::default().listen_addr);
        let mut replication = ReplicationConfig::new(sync_listen);
        if let Some(master) = flags.master.or(file.master) {
            replication = replication.with_master(master);
        }

        Ok(Self {
            root,
            storage,
            server,
            replication,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_win_over_file() {
        let file: FileConfig = serde_json::from_str(
            r#"{"root": "/data/im", "limit": 500, "hard_limit": 1000, "master": "10.0.0.1:13333"}"#,
        )
        .unwrap();
        let flags = Overrides {
            limit: Some(400),
            ..Overrides::default()
        };
        let settings = Settings::resolve(flags, file).unwrap();
        assert_eq!(settings.root, PathBuf::from("/data/im"));
        assert_eq!(settings.storage.limit, 400);
        assert_eq!(settings.storage.hard_limit, 1000);
        assert_eq!(settings.replication.master_addr.as_deref(), Some("10.0.0.1:13333"));
    }

    #[test]
    fn defaults_apply() {
        let flags = Overrides {
            root: Some("/tmp/im".into()),
            ..Overrides::default()
        };
        let settings = Settings::resolve(flags, FileConfig::default()).unwrap();
        assert_eq!(settings.storage.limit, 3000);
        assert_eq!(settings.storage.group_limit, 100);
        assert!(!settings.replication.is_slave());
        assert_eq!(settings.server.bind_addr, ServerConfig::default().bind_addr);
    }

    #[test]
    fn empty_master_means_master() {
        let file: FileConfig = serde_json::from_str(r#"{"root": "/x", "master": ""}"#).unwrap();
        let settings = Settings::resolve(Overrides::default(), file).unwrap();
        assert!(!settings.replication.is_slave());
    }

    #[test]
    fn invalid_limits_rejected() {
        let flags = Overrides {
            root: Some("/tmp/im".into()),
            limit: Some(1000),
            hard_limit: Some(1500),
            ..Overrides::default()
        };
        assert!(Settings::resolve(flags, FileConfig::default()).is_err());
        assert!(Settings::resolve(Overrides::default(), FileConfig::default()).is_err());
    }

    #[test]
    fn unknown_keys_rejected() {
        assert!(serde_json::from_str::<FileConfig>(r#"{"rot": "/x"}"#).is_err());
    }
}
