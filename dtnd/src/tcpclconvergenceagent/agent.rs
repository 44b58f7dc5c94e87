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

use std::{collections::HashMap, io, net::SocketAddr, time::Duration};

use log::{error, info, warn};
use tcpcl::session::TCPCLSession;
use tokio::{
    net::{TcpListener, TcpStream},
    sync::{broadcast, mpsc},
    task::JoinHandle,
    time::timeout,
};

use crate::{
    common::{messages::Shutdown, settings::Settings},
    convergenceagent::messages::CLUnregisterNode,
};

use actix::{prelude::*, spawn};

use super::{
    messages::ConnectRemote,
    session_agent::{NewClientConnectedOnSocket, TCPCLSessionAgent},
};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

pub async fn tcpcl_listener(
    mut shutdown: broadcast::Receiver<()>,
    _shutdown_complete_sender: mpsc::Sender<()>,
    tcpcl_server: Addr<TCPCLServer>,
) -> Result<JoinHandle<()>, io::Error> {
    let settings = Settings::from_env();

    let socket: SocketAddr = settings.tcpcl_listen_address.parse().unwrap();

    info!("TCPCL server listening on {socket}");

    let listener = TcpListener::bind(&socket).await?;

    let joinhandle = spawn(async move {
        loop {
            tokio::select! {
                conn = listener.accept() => {
                    match conn {
                        Ok((stream, address)) => {
                            tcpcl_server.do_send(NewClientConnectedOnSocket { stream, address });
                        },
                        Err(e) => {
                            error!("Error accepting a tcpcl connection: {e:?}");
                        }
                    }
                }
                _ = shutdown.recv() => {
                    info!("Received shutdown message, stopping the tcpcl socket");
                    break;
                }
            }
        }

        drop(listener); // implicitly closes the socket

        info!("TCPCL socket has shutdown. See you");
        // _shutdown_complete_sender is implicitly dropped here
    });
    Ok(joinhandle)
}

/// Keeps one session agent per peer address, for inbound and dialed
/// connections alike.
#[derive(Default)]
pub struct TCPCLServer {
    my_node_id: String,
    keepalive_interval: u16,
    sessions: HashMap<String, Addr<TCPCLSessionAgent>>,
}

impl Actor for TCPCLServer {
    type Context = Context<Self>;

    fn started(&mut self, _ctx: &mut Self::Context) {
        let settings = Settings::from_env();
        self.my_node_id = settings.my_node_id;
        self.keepalive_interval = settings.keepalive_interval;
    }
}

impl actix::Supervised for TCPCLServer {}

impl SystemService for TCPCLServer {}

impl Handler<NewClientConnectedOnSocket> for TCPCLServer {
    type Result = ();

    fn handle(&mut self, msg: NewClientConnectedOnSocket, _ctx: &mut Self::Context) -> Self::Result {
        let NewClientConnectedOnSocket { stream, address } = msg;
        info!("New tcpcl client connected from {address}");
        let session = match TCPCLSession::new(
            stream,
            true,
            self.my_node_id.clone(),
            self.keepalive_interval,
        ) {
            Ok(session) => session,
            Err(e) => {
                error!("Error handling a new incoming connection, dropping it: {e:?}");
                return;
            }
        };
        let session_address = format!("tcpcl://{address}");
        let agent = TCPCLSessionAgent::new(session, session_address.clone());
        self.sessions.insert(session_address, agent);
    }
}

impl Handler<ConnectRemote> for TCPCLServer {
    type Result = ();

    fn handle(&mut self, msg: ConnectRemote, ctx: &mut Self::Context) -> Self::Result {
        let ConnectRemote { address } = msg;
        let Some(socket_address) = address.strip_prefix("tcpcl://").map(String::from) else {
            error!("Not a tcpcl address: {address}");
            return;
        };

        let node_id = self.my_node_id.clone();
        let keepalive_interval = self.keepalive_interval;
        let fut = async move {
            match timeout(CONNECT_TIMEOUT, TcpStream::connect(&socket_address)).await {
                Ok(Ok(stream)) => {
                    TCPCLSession::new(stream, false, node_id, keepalive_interval)
                        .map_err(|e| format!("{e:?}"))
                }
                Ok(Err(e)) => Err(format!("{e:?}")),
                Err(_) => Err(String::from("connect timed out")),
            }
        };
        fut.into_actor(self)
            .map(move |result, act, _ctx| match result {
                Ok(session) => {
                    let agent = TCPCLSessionAgent::new(session, address.clone());
                    act.sessions.insert(address, agent);
                }
                Err(e) => {
                    warn!("Error connecting to {address}: {e}");
                    crate::convergenceagent::agent::Daemon::from_registry()
                        .do_send(CLUnregisterNode {
                            address,
                            node: None,
                        });
                }
            })
            .spawn(ctx);
    }
}

impl Handler<Shutdown> for TCPCLServer {
    type Result = ();

    fn handle(&mut self, _msg: Shutdown, _ctx: &mut Self::Context) -> Self::Result {
        for (_, session) in self.sessions.drain() {
            session.do_send(Shutdown {});
        }
    }
}
