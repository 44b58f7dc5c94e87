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

use std::time::Duration;

use bp7::endpoint::Endpoint;
use log::{error, info, warn};
use tokio::sync::{broadcast, mpsc};
use url::Url;

mod bundleprotocolagent;
mod bundlestorageagent;
mod clientagent;
mod common;
mod convergenceagent;
mod cron;
mod discovery;
mod mtcpconvergenceagent;
mod routingagent;
mod tcpclconvergenceagent;

use crate::{
    bundleprotocolagent::messages::RetryPending,
    bundlestorageagent::messages::DeleteExpired,
    common::{
        messages::Shutdown,
        settings::{RoutingKind, Settings},
    },
    convergenceagent::messages::{RegisterCla, RegisterClaReceiver},
    cron::messages::RegisterCronJob,
    discovery::ClaType,
    routingagent::messages::{AgeTick, GcTick},
};

use actix::{System, SystemService};

fn parse_static_peer(peer: &str) -> Result<RegisterCla, String> {
    let url = Url::parse(peer).map_err(|e| format!("{e}"))?;
    if url.host_str().is_none() {
        return Err(String::from("missing host"));
    }
    if url.port().is_none() {
        return Err(String::from("missing port"));
    }
    // the address is the peer string without the node-id fragment
    let address = peer
        .split('#')
        .next()
        .expect("split always yields at least one element")
        .to_string();
    let node = match url.fragment() {
        Some(fragment) => {
            Some(Endpoint::new(fragment).ok_or_else(|| format!("invalid node id {fragment}"))?)
        }
        None => None,
    };
    let cla_type = match url.scheme() {
        "tcpcl" => ClaType::Tcpcl,
        "mtcp" => ClaType::Mtcp,
        other => return Err(format!("unknown convergence scheme {other}")),
    };
    Ok(RegisterCla {
        cla_type,
        address,
        node,
        permanent: true,
    })
}

#[actix_rt::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    info!("Starting up");
    let settings: Settings = Settings::from_env();
    info!("Starting with settings: {settings:?}");

    let node_endpoint = match Endpoint::new(&settings.my_node_id) {
        Some(endpoint) => endpoint,
        None => {
            error!("{} is not a valid node id. Aborting...", settings.my_node_id);
            return;
        }
    };
    if node_endpoint.is_null_endpoint() {
        error!("The null endpoint cannot be a node id. Aborting...");
        return;
    }

    // Probing the store before anything else runs turns a broken store
    // path into a clean startup abort instead of an actor panic loop.
    drop(sled::open(&settings.store_path).expect("the bundle store must be openable"));

    let (notify_shutdown, _) = broadcast::channel::<()>(1);
    let (shutdown_complete_tx, mut shutdown_complete_rx) = mpsc::channel::<()>(1);

    let clientagent_addr = clientagent::agent::Daemon::from_registry();
    let cron_addr = cron::agent::Daemon::from_registry();
    let convergence_addr = convergenceagent::agent::Daemon::from_registry();
    let tcpcl_server_addr = tcpclconvergenceagent::agent::TCPCLServer::from_registry();

    let tcpcl_listener = tcpclconvergenceagent::agent::tcpcl_listener(
        notify_shutdown.subscribe(),
        shutdown_complete_tx.clone(),
        tcpcl_server_addr.clone(),
    )
    .await
    .unwrap();
    let mtcp_listener = mtcpconvergenceagent::agent::mtcp_listener(
        notify_shutdown.subscribe(),
        shutdown_complete_tx.clone(),
    )
    .await
    .unwrap();

    convergence_addr.do_send(RegisterClaReceiver {
        cla_type: ClaType::Tcpcl,
        endpoint: node_endpoint.node_endpoint(),
    });
    convergence_addr.do_send(RegisterClaReceiver {
        cla_type: ClaType::Mtcp,
        endpoint: node_endpoint.node_endpoint(),
    });

    for peer in &settings.static_peers {
        match parse_static_peer(peer) {
            Ok(registration) => convergence_addr.do_send(registration),
            Err(e) => warn!("Ignoring static peer {peer}: {e}"),
        }
    }

    cron_addr.do_send(RegisterCronJob {
        name: String::from("pending_bundles"),
        interval: Duration::from_secs(10),
        task: Box::new(|| {
            crate::bundleprotocolagent::agent::Daemon::from_registry().do_send(RetryPending {});
        }),
    });
    cron_addr.do_send(RegisterCronJob {
        name: String::from("clean_store"),
        interval: Duration::from_secs(600),
        task: Box::new(|| {
            crate::bundlestorageagent::agent::Daemon::from_registry().do_send(DeleteExpired {});
        }),
    });
    cron_addr.do_send(RegisterCronJob {
        name: String::from("routing_gc"),
        interval: Duration::from_secs(300),
        task: Box::new(|| {
            crate::routingagent::agent::Daemon::from_registry().do_send(GcTick {});
        }),
    });
    if settings.routing == RoutingKind::Prophet {
        cron_addr.do_send(RegisterCronJob {
            name: String::from("prophet_age"),
            interval: Duration::from_secs(30),
            task: Box::new(|| {
                crate::routingagent::agent::Daemon::from_registry().do_send(AgeTick {});
            }),
        });
    }

    // pick up whatever a previous run left pending
    bundleprotocolagent::agent::Daemon::from_registry().do_send(RetryPending {});

    let ctrl_c = tokio::signal::ctrl_c();

    tokio::select! {
        res = tcpcl_listener => {
            if res.is_err() {
                error!("something bad happened with the tcpcl listener. Aborting...");
            }
        }
        res = mtcp_listener => {
            if res.is_err() {
                error!("something bad happened with the mtcp listener. Aborting...");
            }
        }
        _ = ctrl_c => {
            info!("Shutting down");
        }
    }

    info!("Stopping external connections");
    // When `notify_shutdown` is dropped, all tasks which have `subscribe`d
    // will receive the shutdown signal and can exit
    drop(notify_shutdown);
    // Drop final `Sender` so the `Receiver` below can complete
    drop(shutdown_complete_tx);

    info!("Stopping individual actors");
    cron_addr.do_send(Shutdown {});
    clientagent_addr.do_send(Shutdown {});
    tcpcl_server_addr.do_send(Shutdown {});

    info!("Now stopping actor system");
    System::current().stop();

    // Wait for all active listeners to finish processing. As the `Sender`
    // handles held by the listeners are dropped when they exit, the `mpsc`
    // channel closes and `recv()` returns `None`.
    let _ = shutdown_complete_rx.recv().await;

    info!("All done, see you");
}
