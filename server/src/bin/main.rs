// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) PALAVER. All rights reserved.

mod args;
mod config;

use std::sync::Arc;

use axum::http::HeaderValue;
use clap::Parser;
use palaver::http::auth::AuthKeys;
use palaver::{Services, SharedState};
use palaver_node::challenge::{ChallengeCore, VoteCore};
use palaver_node::chat::{ConversationCore, MessageCore};
use palaver_node::clients::directory::HttpDirectory;
use palaver_node::clients::notifier::HttpNotifier;
use palaver_node::clients::payments::HttpPayments;
use palaver_node::clients::storage::HttpStorage;
use palaver_node::clients::{
    moderation, DirectoryClient, NotifierClient, PaymentsClient, StorageClient,
};
use palaver_node::clock::{Clock, SystemClock};
use palaver_node::database::rocksdb::Backend;
use palaver_node::database::DB;
use palaver_node::presence::{PresenceBoard, PresenceSweepSrv};
use palaver_node::realtime::Bus;
use palaver_node::status::{StatusCore, StatusReaperSrv};
use palaver_node::tombola::TombolaCore;
use palaver_node::{LongLivedService, Node};
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tracing::info;

use crate::args::Args;
use crate::config::Config;

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = Config::from(&args);

    configure_log(&config)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(serve(config))
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let db = Backend::create_or_open(&config.db.path, config.db.options.clone());
    let node = Node::new(db);

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let bus = Bus::new();
    let presence = PresenceBoard::new(config.presence, clock.clone());

    let secret = config.auth.service_secret.clone();
    let directory: Arc<dyn DirectoryClient> =
        Arc::new(HttpDirectory::new(&config.clients.directory, &secret));
    let payments: Arc<dyn PaymentsClient> =
        Arc::new(HttpPayments::new(&config.clients.payments, &secret));
    let storage: Arc<dyn StorageClient> =
        Arc::new(HttpStorage::new(&config.clients.storage, &secret));
    let notifier: Arc<dyn NotifierClient> =
        Arc::new(HttpNotifier::new(&config.clients.notifier, &secret));
    let moderation = moderation::build(&config.moderation, &secret);

    let db_handle = node.database();
    let conversations = Arc::new(ConversationCore::new(
        db_handle.clone(),
        directory.clone(),
        bus.clone(),
        clock.clone(),
        config.chat,
    ));
    let messages = Arc::new(MessageCore::new(
        db_handle.clone(),
        directory.clone(),
        storage.clone(),
        bus.clone(),
        clock.clone(),
        config.chat,
    ));
    let statuses = Arc::new(StatusCore::new(
        db_handle.clone(),
        conversations.clone(),
        directory.clone(),
        storage.clone(),
        moderation,
        bus.clone(),
        clock.clone(),
        config.status,
    ));
    let tombola = Arc::new(TombolaCore::new(
        db_handle.clone(),
        payments.clone(),
        notifier.clone(),
        clock.clone(),
        config.tombola,
    ));
    let challenges = Arc::new(ChallengeCore::new(
        db_handle.clone(),
        payments.clone(),
        clock.clone(),
        config.challenge.clone(),
    ));
    let votes = Arc::new(VoteCore::new(
        db_handle.clone(),
        payments.clone(),
        clock.clone(),
        config.challenge.clone(),
        config.tombola,
    ));

    // Background services: status expiry and presence pruning.
    let service_list: Vec<Box<dyn LongLivedService<Backend>>> = vec![
        Box::new(StatusReaperSrv::new(
            clock.clone(),
            config.status.reaper_interval,
        )),
        Box::new(PresenceSweepSrv::new(presence.clone())),
    ];
    let supervisor = node.clone();
    let background =
        tokio::spawn(async move { supervisor.spawn_all(service_list).await });

    let state: SharedState = Arc::new(Services {
        conversations,
        messages,
        statuses,
        tombola,
        challenges,
        votes,
        presence,
        bus,
        auth: AuthKeys::new(&config.auth.jwt_secret, &config.auth.service_secret),
        ws: config.ws,
    });

    let cors = if config.http.cors_allow_origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<HeaderValue> = config
            .http
            .cors_allow_origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    };

    let app = palaver::router(state)
        .layer(RequestBodyLimitLayer::new(config.http.max_body_bytes))
        .layer(cors);

    let listener =
        tokio::net::TcpListener::bind(&config.http.listen_addr).await?;
    info!(
        event = "http listening",
        addr = %listener.local_addr()?,
        version = %&palaver::VERSION_BUILD[..],
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    background.abort();
    info!("shutdown ...");
    Ok(())
}

fn configure_log(config: &Config) -> anyhow::Result<()> {
    let filter = match config.log_filter() {
        Some(filter) => tracing_subscriber::EnvFilter::try_new(filter)?,
        None => tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(
                    config.log_level().to_string().to_lowercase(),
                )
            }),
    };

    // Generate a subscriber with the desired log level.
    let subscriber =
        tracing_subscriber::fmt::Subscriber::builder().with_env_filter(filter);

    // Set the subscriber as global, so it is used as the default in all
    // threads for the remainder of the duration of the program.
    match config.log_type().as_str() {
        "json" => {
            let subscriber = subscriber.json().flatten_event(true).finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        "plain" => {
            let subscriber = subscriber.with_ansi(false).finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        "coloured" => {
            let subscriber = subscriber.finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        _ => unreachable!(),
    };
    Ok(())
}
