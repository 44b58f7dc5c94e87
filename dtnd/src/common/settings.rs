// Copyright (C) 2024 The dtnd Authors
//
// This file is part of dtnd.
//
// dtnd is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// dtnd is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

use std::env;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutingKind {
    Epidemic,
    Prophet,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub my_node_id: String,
    pub store_path: String,
    pub tcpcl_listen_address: String,
    pub mtcp_listen_address: String,
    pub routing: RoutingKind,
    /// Parse administrative records of bundles passing through, not only
    /// those addressed to this node.
    pub inspect_all_bundles: bool,
    pub keepalive_interval: u16,
    /// Statically configured peers, e.g. `tcpcl://[::1]:4556` or
    /// `mtcp://[::1]:16162#dtn://node2`.
    pub static_peers: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            my_node_id: "dtn://defaultnodeid".into(),
            store_path: "/tmp/dtnd-store".into(),
            tcpcl_listen_address: "[::1]:4556".into(),
            mtcp_listen_address: "[::1]:16162".into(),
            routing: RoutingKind::Epidemic,
            inspect_all_bundles: false,
            keepalive_interval: 60,
            static_peers: Vec::new(),
        }
    }
}

impl Settings {
    pub fn from_env() -> Self {
        let mut settings = Settings::default();
        if let Ok(setting) = env::var("NODE_ID") {
            settings.my_node_id = setting;
        }
        if let Ok(setting) = env::var("STORE_PATH") {
            settings.store_path = setting;
        }
        if let Ok(setting) = env::var("TCPCL_LISTEN_ADDRESS") {
            settings.tcpcl_listen_address = setting;
        }
        if let Ok(setting) = env::var("MTCP_LISTEN_ADDRESS") {
            settings.mtcp_listen_address = setting;
        }
        if let Ok(setting) = env::var("ROUTING") {
            settings.routing = match setting.as_str() {
                "prophet" => RoutingKind::Prophet,
                _ => RoutingKind::Epidemic,
            };
        }
        if let Ok(setting) = env::var("INSPECT_ALL_BUNDLES") {
            settings.inspect_all_bundles = setting == "1" || setting == "true";
        }
        if let Ok(setting) = env::var("TCPCL_KEEPALIVE_INTERVAL") {
            if let Ok(interval) = setting.parse() {
                settings.keepalive_interval = interval;
            }
        }
        if let Ok(setting) = env::var("STATIC_PEERS") {
            settings.static_peers = setting
                .split(',')
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        settings
    }
}
