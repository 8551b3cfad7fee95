// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) PALAVER. All rights reserved.

use std::path::PathBuf;
use std::str::FromStr;

use palaver::ws::WsParams;
use palaver_node::challenge::ChallengeParams;
use palaver_node::chat::ChatParams;
use palaver_node::clients::moderation::ModerationConf;
use palaver_node::clients::storage::StorageConf;
use palaver_node::clients::EndpointConf;
use palaver_node::database::DatabaseOptions;
use palaver_node::presence::PresenceParams;
use palaver_node::status::StatusParams;
use palaver_node::tombola::TombolaParams;
use serde::{Deserialize, Serialize};

use crate::args::Args;

#[derive(Serialize, Deserialize, Clone, Default)]
pub(crate) struct Config {
    log_level: Option<String>,
    log_type: Option<String>,
    log_filter: Option<String>,

    #[serde(default)]
    pub(crate) http: HttpConfig,

    #[serde(default)]
    pub(crate) db: DbConfig,

    #[serde(default)]
    pub(crate) auth: AuthConfig,

    #[serde(default)]
    pub(crate) chat: ChatParams,

    #[serde(default)]
    pub(crate) status: StatusParams,

    #[serde(default)]
    pub(crate) presence: PresenceParams,

    #[serde(default)]
    pub(crate) ws: WsParams,

    #[serde(default)]
    pub(crate) tombola: TombolaParams,

    #[serde(default)]
    pub(crate) challenge: ChallengeParams,

    #[serde(default)]
    pub(crate) moderation: ModerationConf,

    #[serde(default)]
    pub(crate) clients: ClientsConfig,
}

/// Default log_level.
const DEFAULT_LOG_LEVEL: &str = "info";

/// Default log_type.
const DEFAULT_LOG_TYPE: &str = "coloured";

#[derive(Serialize, Deserialize, Clone)]
#[serde(default)]
pub(crate) struct HttpConfig {
    pub listen_addr: String,
    /// Allowed CORS origins; empty means permissive.
    pub cors_allow_origins: Vec<String>,
    pub max_body_bytes: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".into(),
            cors_allow_origins: Vec::new(),
            max_body_bytes: 25 * 1024 * 1024,
        }
    }
}

#[derive(Serialize, Deserialize, Clone)]
#[serde(default)]
pub(crate) struct DbConfig {
    pub path: PathBuf,
    #[serde(flatten)]
    pub options: DatabaseOptions,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./palaver-data"),
            options: DatabaseOptions::default(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone)]
#[serde(default)]
pub(crate) struct AuthConfig {
    /// HS256 secret user tokens are verified with.
    pub jwt_secret: String,
    /// Shared bearer secret for service-to-service calls and webhooks.
    pub service_secret: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "palaver-dev-jwt-secret".into(),
            service_secret: "palaver-dev-service-secret".into(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone)]
#[serde(default)]
pub(crate) struct ClientsConfig {
    pub directory: EndpointConf,
    pub payments: EndpointConf,
    pub storage: StorageConf,
    pub notifier: EndpointConf,
}

impl Default for ClientsConfig {
    fn default() -> Self {
        Self {
            directory: EndpointConf {
                timeout: std::time::Duration::from_secs(10),
                ..Default::default()
            },
            payments: EndpointConf {
                timeout: std::time::Duration::from_secs(5),
                ..Default::default()
            },
            storage: StorageConf::default(),
            notifier: EndpointConf {
                timeout: std::time::Duration::from_secs(5),
                ..Default::default()
            },
        }
    }
}

impl From<&Args> for Config {
    fn from(args: &Args) -> Self {
        let mut config =
            args.config.as_ref().map_or(Config::default(), |conf_path| {
                let toml = std::fs::read_to_string(conf_path)
                    .expect("config file should be readable");
                toml::from_str(&toml).expect("config file should be valid")
            });

        if let Some(log_level) = args.log_level {
            config.log_level = Some(log_level.to_string());
        }
        if let Some(log_type) = &args.log_type {
            config.log_type = Some(log_type.clone());
        }
        if let Some(log_filter) = &args.log_filter {
            config.log_filter = Some(log_filter.clone());
        }
        if let Some(db_path) = &args.db_path {
            config.db.path = db_path.clone();
        }
        if let Some(listen) = &args.http_listen_addr {
            config.http.listen_addr = listen.clone();
        }
        config
    }
}

impl Config {
    pub(crate) fn log_type(&self) -> String {
        match &self.log_type {
            None => DEFAULT_LOG_TYPE.into(),
            Some(log_type) => log_type.into(),
        }
    }

    pub(crate) fn log_level(&self) -> tracing::Level {
        let log_level = match &self.log_level {
            None => DEFAULT_LOG_LEVEL,
            Some(log_level) => log_level,
        };
        tracing::Level::from_str(log_level).unwrap_or(tracing::Level::INFO)
    }

    pub(crate) fn log_filter(&self) -> Option<&str> {
        self.log_filter.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_carries_all_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.http.listen_addr, "0.0.0.0:8080");
        assert_eq!(config.tombola.ticket_price, 200);
        assert_eq!(config.tombola.max_tickets_per_user_per_month, 25);
        assert_eq!(config.challenge.vote_price, 200);
        assert_eq!(config.challenge.max_entrepreneurs, 3);
        assert_eq!(config.status.default_expiry_hours, 24);
        assert_eq!(config.status.max_content_len, 2000);
        assert_eq!(config.chat.max_content_len, 5000);
        assert_eq!(config.chat.free_messages, 3);
        assert_eq!(config.log_level(), tracing::Level::INFO);
    }

    #[test]
    fn sections_override_individually() {
        let config: Config = toml::from_str(
            r#"
            log_level = "debug"
            log_type = "json"

            [http]
            listen_addr = "127.0.0.1:9000"

            [tombola]
            ticket_price = 500

            [presence]
            online_ttl = "5m"
            typing_ttl = "10s"

            [clients.directory]
            base_url = "http://directory.internal"
            timeout = "10s"

            [moderation]
            backend = "saas-image"
            block_threshold = 0.9
            "#,
        )
        .unwrap();

        assert_eq!(config.log_level(), tracing::Level::DEBUG);
        assert_eq!(config.log_type(), "json");
        assert_eq!(config.http.listen_addr, "127.0.0.1:9000");
        assert_eq!(config.tombola.ticket_price, 500);
        assert_eq!(
            config.presence.online_ttl,
            std::time::Duration::from_secs(300)
        );
        assert_eq!(
            config.clients.directory.base_url,
            "http://directory.internal"
        );
        assert_eq!(config.moderation.block_threshold, 0.9);
        // Untouched sections keep their defaults.
        assert_eq!(config.challenge.vote_price, 200);
    }
}
