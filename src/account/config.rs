//-
// Copyright (c) 2026, the Popsync authors
//
// This file is part of Popsync.
//
// Popsync is free software: you can redistribute it and/or modify it under
// the terms of  the GNU General Public  License as published  by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// Popsync is distributed in the hope  that it will be useful,  but WITHOUT
// ANY WARRANTY;  without even  the implied  warranty of  MERCHANTABILITY or
// FITNESS FOR  A PARTICULAR PURPOSE.  See the  GNU General  Public License
// for more details.
//
// You should have received a copy of the GNU General Public License along
// with Popsync. If not, see <http://www.gnu.org/licenses/>.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::sync::engine::SyncPolicy;
use crate::sync::fetch::Completeness;

/// Transport security for the account's connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Security {
    /// Plain TCP.
    None,
    /// TLS from the first byte.
    Tls,
}

/// One account's configuration, stored as TOML.
///
/// Everything except the server coordinates has a default, so a minimal
/// file is just `host` and `user`.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct AccountConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_security")]
    pub security: Security,
    pub user: String,
    /// Stored password; when absent, the embedding application is asked
    /// through the prompt channel at connect time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_io_timeout_secs")]
    pub io_timeout_secs: u64,
    #[serde(default = "default_true")]
    pub verify_certificates: bool,

    /// Fetch only the first MIME part of each message.
    #[serde(default)]
    pub partial_retrieval: bool,
    /// Re-fetch cached entries whose completeness does not match the
    /// request.
    #[serde(default)]
    pub strict_retrieval: bool,
    /// Delete messages from the server once they are this old.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete_after_days: Option<u32>,
}

fn default_port() -> u16 {
    110
}

fn default_security() -> Security {
    Security::None
}

fn default_connect_timeout_secs() -> u64 {
    60
}

fn default_io_timeout_secs() -> u64 {
    120
}

fn default_true() -> bool {
    true
}

impl AccountConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn io_timeout(&self) -> Option<Duration> {
        if 0 == self.io_timeout_secs {
            None
        } else {
            Some(Duration::from_secs(self.io_timeout_secs))
        }
    }

    pub fn policy(&self) -> SyncPolicy {
        SyncPolicy {
            completeness: if self.partial_retrieval {
                Completeness::Partial
            } else {
                Completeness::Full
            },
            strict_retrieval: self.strict_retrieval,
            delete_after_days: self.delete_after_days,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn minimal_config_gets_defaults() {
        let config: AccountConfig = toml::from_str(
            r#"
host = "mail.example.org"
user = "sam"
"#,
        )
        .unwrap();

        assert_eq!("mail.example.org", config.host);
        assert_eq!(110, config.port);
        assert_eq!(Security::None, config.security);
        assert_eq!(None, config.password);
        assert!(config.verify_certificates);
        assert_eq!(Duration::from_secs(60), config.connect_timeout());
        assert_eq!(Some(Duration::from_secs(120)), config.io_timeout());
        assert_eq!(None, config.delete_after_days);
    }

    #[test]
    fn full_config_round_trips() {
        let config: AccountConfig = toml::from_str(
            r#"
host = "mail.example.org"
port = 995
security = "tls"
user = "sam"
password = "hunter2"
connect_timeout_secs = 10
io_timeout_secs = 0
verify_certificates = false
partial_retrieval = true
strict_retrieval = true
delete_after_days = 30
"#,
        )
        .unwrap();

        assert_eq!(Security::Tls, config.security);
        assert_eq!(Some("hunter2".to_owned()), config.password);
        assert_eq!(None, config.io_timeout());

        let policy = config.policy();
        assert_eq!(Completeness::Partial, policy.completeness);
        assert!(policy.strict_retrieval);
        assert_eq!(Some(30), policy.delete_after_days);

        let text = toml::to_string(&config).unwrap();
        let reparsed: AccountConfig = toml::from_str(&text).unwrap();
        assert_eq!(config.port, reparsed.port);
        assert_eq!(config.security, reparsed.security);
        assert_eq!(config.delete_after_days, reparsed.delete_after_days);
    }
}
