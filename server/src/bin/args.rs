// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.
//
// Copyright (c) PALAVER. All rights reserved.

use std::path::PathBuf;

use clap::builder::PossibleValuesParser;
use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    author = "Palaver. All rights reserved.",
    version = &palaver::VERSION_BUILD[..],
    about = "Palaver community backend server",
)]
pub struct Args {
    /// Configuration file path
    #[clap(long, short, env = "PALAVER_CONFIG_TOML", value_parser)]
    pub config: Option<PathBuf>,

    /// Output log level
    #[clap(long)]
    pub log_level: Option<tracing::Level>,

    /// Change the log format accordingly
    #[clap(long, value_parser = PossibleValuesParser::new(["coloured", "plain", "json"]))]
    pub log_type: Option<String>,

    /// Add log filter(s)
    #[clap(long)]
    pub log_filter: Option<String>,

    /// Path to the document store
    #[clap(long, value_parser)]
    pub db_path: Option<PathBuf>,

    /// Address the HTTP server should listen on
    #[clap(long)]
    pub http_listen_addr: Option<String>,
}
