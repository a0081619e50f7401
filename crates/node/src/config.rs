//! Node Configuration

use std::{
    path::{Path, PathBuf},
    str::FromStr,
};

use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use stake_engine::{OperatorShare, Permission, RoleStore, StaticOperatorDirectory};
use stake_types::{Domain, ProtocolConfig, Pubkey};

/// Permissions held by one account on both domains
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleGrant {
    /// Base58 account
    pub account: String,
    pub permissions: Vec<Permission>,
}

/// A node operator entitled to reward shares
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperatorEntry {
    /// Base58 account
    pub operator: String,
    pub home: Domain,
    pub weight: u64,
}

/// Node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// HTTP RPC bind address
    pub rpc_addr: String,
    /// Data directory for persistent state, one subdirectory per domain
    pub data_dir: PathBuf,
    /// Local block time in milliseconds
    pub block_time_ms: u64,
    /// Save state every N blocks (0 = only on shutdown)
    pub save_interval: u64,
    /// How often relayers retry their backlog
    pub relay_retry_ms: u64,
    /// Protocol parameters for the L1 engine
    pub l1: ProtocolConfig,
    /// Protocol parameters for the L2 engine
    pub l2: ProtocolConfig,
    pub roles: Vec<RoleGrant>,
    pub operators: Vec<OperatorEntry>,
    /// Base64 ed25519 seed signing L1 messages. Generated per run if unset.
    pub l1_attester_key: Option<String>,
    /// Base64 ed25519 seed signing L2 messages. Generated per run if unset.
    pub l2_attester_key: Option<String>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            rpc_addr: "127.0.0.1:8899".to_string(),
            data_dir: PathBuf::from("./data"),
            block_time_ms: 1_000,
            save_interval: 300,
            relay_retry_ms: 1_000,
            l1: ProtocolConfig::default(),
            l2: ProtocolConfig::default(),
            roles: Vec::new(),
            operators: Vec::new(),
            l1_attester_key: None,
            l2_attester_key: None,
        }
    }
}

impl NodeConfig {
    /// Load from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: NodeConfig = serde_json::from_str(&raw)
            .with_context(|| format!("parsing config {}", path.display()))?;
        config.l1.validate().context("l1 protocol config")?;
        config.l2.validate().context("l2 protocol config")?;
        Ok(config)
    }

    /// Build the role table shared by both engines
    pub fn role_store(&self) -> Result<RoleStore> {
        let roles = RoleStore::new();
        for grant in &self.roles {
            let account = parse_pubkey(&grant.account)?;
            for permission in &grant.permissions {
                roles.grant(account, *permission);
            }
        }
        Ok(roles)
    }

    /// Build the operator directory shared by both engines
    pub fn operator_directory(&self) -> Result<StaticOperatorDirectory> {
        let directory = StaticOperatorDirectory::default();
        for entry in &self.operators {
            directory.upsert(OperatorShare {
                operator: parse_pubkey(&entry.operator)?,
                home: entry.home,
                weight: entry.weight,
            });
        }
        Ok(directory)
    }

    /// Attester signing key for `domain`
    pub fn attester_key(&self, domain: Domain) -> Result<SigningKey> {
        let encoded = match domain {
            Domain::L1 => &self.l1_attester_key,
            Domain::L2 => &self.l2_attester_key,
        };
        match encoded {
            Some(encoded) => {
                let bytes = BASE64
                    .decode(encoded)
                    .with_context(|| format!("{} attester key is not base64", domain))?;
                let seed: [u8; 32] = bytes
                    .try_into()
                    .map_err(|_| anyhow!("{} attester key must be 32 bytes", domain))?;
                Ok(SigningKey::from_bytes(&seed))
            }
            None => {
                tracing::warn!("No {} attester key configured, generating one for this run", domain);
                Ok(SigningKey::generate(&mut OsRng))
            }
        }
    }

    pub fn protocol(&self, domain: Domain) -> &ProtocolConfig {
        match domain {
            Domain::L1 => &self.l1,
            Domain::L2 => &self.l2,
        }
    }
}

fn parse_pubkey(value: &str) -> Result<Pubkey> {
    Pubkey::from_str(value).map_err(|e| anyhow!("invalid account {}: {}", value, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use stake_engine::{Authorizer, OperatorDirectory};
    use std::io::Write;

    #[test]
    fn test_partial_config_fills_defaults() {
        let admin = Pubkey::new_unique();
        let operator = Pubkey::new_unique();
        let raw = format!(
            r#"{{
                "rpc_addr": "0.0.0.0:9000",
                "l2": {{ "fee_basis_points": 0 }},
                "roles": [{{ "account": "{}", "permissions": ["Admin", "Allocator"] }}],
                "operators": [{{ "operator": "{}", "home": "L2", "weight": 3 }}]
            }}"#,
            admin, operator
        );
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(raw.as_bytes()).unwrap();

        let config = NodeConfig::load(file.path()).unwrap();
        assert_eq!(config.rpc_addr, "0.0.0.0:9000");
        assert_eq!(config.save_interval, 300);
        assert_eq!(config.data_dir, PathBuf::from("./data"));
        assert_eq!(config.l2.fee_basis_points, 0);
        assert_eq!(config.l2.blocks_to_finalize, ProtocolConfig::default().blocks_to_finalize);

        let roles = config.role_store().unwrap();
        assert!(roles.is_authorized(&admin, Permission::Allocator));
        assert!(!roles.is_authorized(&admin, Permission::Depositor));

        let operators = config.operator_directory().unwrap().operators();
        assert_eq!(operators.len(), 1);
        assert_eq!(operators[0].home, Domain::L2);
    }

    #[test]
    fn test_invalid_protocol_config_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(br#"{ "l1": { "max_relative_delta_bps": 0 } }"#)
            .unwrap();
        assert!(NodeConfig::load(file.path()).is_err());
    }

    #[test]
    fn test_attester_key_decoding() {
        let config = NodeConfig {
            l1_attester_key: Some(BASE64.encode([7u8; 32])),
            l2_attester_key: Some(BASE64.encode([7u8; 16])),
            ..Default::default()
        };
        let key = config.attester_key(Domain::L1).unwrap();
        assert_eq!(key.to_bytes(), [7u8; 32]);
        assert!(config.attester_key(Domain::L2).is_err());
    }
}
