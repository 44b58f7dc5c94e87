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

use std::net::SocketAddr;

use bp7::{bundle::Bundle, endpoint::Endpoint};
use log::{debug, error, warn};
use tcpcl::{
    connection_info::ConnectionInfo, errors::TransferSendErrors, session::TCPCLSession,
    session::TransferRequest, transfer::Transfer,
};
use tokio::{
    net::TcpStream,
    sync::{mpsc, oneshot},
};
use tokio_stream::wrappers::ReceiverStream;

use crate::{
    common::{messages::Shutdown, settings::Settings},
    convergenceagent::messages::{
        AgentForwardBundle, CLRegisterNode, CLUnregisterNode, EventBundleReceived,
    },
};

use actix::prelude::*;

use super::messages::ForceShutdown;

#[derive(Message)]
#[rtype(result = "()")]
pub struct NewClientConnectedOnSocket {
    pub stream: TcpStream,
    pub address: SocketAddr,
}

/// Bridges one [`TCPCLSession`] task into the actor world: inbound
/// transfers become decoded bundles on the manager's channel, forward
/// requests go out through the session's send channel.
pub struct TCPCLSessionAgent {
    address: String,
    local_endpoint: Endpoint,
    close_channel: Option<oneshot::Sender<()>>,
    send_channel: mpsc::Sender<TransferRequest>,
}

impl Actor for TCPCLSessionAgent {
    type Context = Context<Self>;
}

impl StreamHandler<Transfer> for TCPCLSessionAgent {
    fn handle(&mut self, item: Transfer, _ctx: &mut Self::Context) {
        match Bundle::try_from(item.data) {
            Ok(bundle) => {
                debug!(
                    "Completed transfer {} with bundle {}",
                    item.id,
                    bundle.id()
                );
                crate::convergenceagent::agent::Daemon::from_registry().do_send(
                    EventBundleReceived {
                        bundle,
                        endpoint: self.local_endpoint.clone(),
                    },
                );
            }
            Err(e) => {
                error!("Error deserializing bundle from remote: {e:?}");
            }
        }
    }

    fn finished(&mut self, _ctx: &mut Self::Context) {
        // The transfer stream ends when the session does; the session end
        // handler below decides whether this actor dies.
    }
}

impl StreamHandler<ConnectionInfo> for TCPCLSessionAgent {
    fn handle(&mut self, item: ConnectionInfo, ctx: &mut Self::Context) {
        let Some(peer_node_id) = item.peer_node_id.as_deref() else {
            warn!("Session established without a peer node id, closing it");
            ctx.stop();
            return;
        };
        match Endpoint::new(peer_node_id) {
            Some(node) => {
                crate::convergenceagent::agent::Daemon::from_registry().do_send(
                    CLRegisterNode {
                        address: self.address.clone(),
                        node,
                        sender: ctx.address().recipient(),
                    },
                );
            }
            None => {
                warn!("Peer sent the invalid node id '{peer_node_id}'");
                ctx.stop();
            }
        }
    }

    fn finished(&mut self, _ctx: &mut Self::Context) {
        // the established oneshot fires at most once, nothing to do
    }
}

impl Handler<AgentForwardBundle> for TCPCLSessionAgent {
    type Result = ();

    fn handle(&mut self, msg: AgentForwardBundle, ctx: &mut Self::Context) -> Self::Result {
        let AgentForwardBundle { pack, responder } = msg;

        let bundle_data: Vec<u8> = match (&pack.bundle).try_into() {
            Ok(bundle_data) => bundle_data,
            Err(e) => {
                error!("Error serializing bundle: {e:?}");
                let _ = responder.send(false);
                return;
            }
        };

        let (result_sender, result_receiver) = oneshot::channel();
        let channel = self.send_channel.clone();
        let fut = async move { channel.send((bundle_data, result_sender)).await };
        fut.into_actor(self)
            .map(|res, _act, ctx| {
                if res.is_err() {
                    error!("Error handing a bundle to the tcpcl session. Killing the connection");
                    let _ = responder.send(false);
                    ctx.stop();
                    return;
                }
                let listener = async move {
                    match result_receiver.await {
                        Ok(Ok(())) => {
                            let _ = responder.send(true);
                        }
                        Ok(Err(e)) => {
                            match e {
                                TransferSendErrors::BundleTooLarge { max_size } => warn!(
                                    "Peer only accepts transfers up to {max_size} bytes"
                                ),
                                e => warn!("Error during sending of a bundle: {e:?}"),
                            }
                            let _ = responder.send(false);
                        }
                        Err(_) => {
                            debug!("The session died before confirming the transfer");
                            let _ = responder.send(false);
                        }
                    }
                };
                tokio::spawn(listener); // the result flows through the responder
            })
            .wait(ctx);
    }
}

impl Handler<Shutdown> for TCPCLSessionAgent {
    type Result = ();

    fn handle(&mut self, _msg: Shutdown, ctx: &mut Self::Context) -> Self::Result {
        if let Some(c) = self.close_channel.take() {
            if c.send(()).is_err() {
                warn!(
                    "Error sending shutdown message to the tcpcl session. Forcing it to die by stopping us"
                );
                ctx.stop();
            }
        }
    }
}

impl Handler<ForceShutdown> for TCPCLSessionAgent {
    type Result = ();

    fn handle(&mut self, _msg: ForceShutdown, ctx: &mut Self::Context) -> Self::Result {
        ctx.stop();
    }
}

impl TCPCLSessionAgent {
    pub fn new(mut session: TCPCLSession, address: String) -> Addr<Self> {
        let settings = Settings::from_env();
        let local_endpoint = Endpoint::new(&settings.my_node_id).unwrap();

        TCPCLSessionAgent::create(|ctx| {
            ctx.add_stream(ReceiverStream::new(session.get_receive_channel()));

            let established_channel = session.get_established_channel();
            ctx.add_stream(async_stream::stream! {
                if let Ok(info) = established_channel.await {
                    yield info;
                }
            });

            let close_channel = session.get_close_channel();
            let send_channel = session.get_send_channel();

            let session_agent_address = ctx.address();
            let session_end_address = address.clone();

            let fut = async move {
                if let Err(e) = session.manage_connection().await {
                    warn!("Connection closed with error: {e:?}");
                }
                let info = session.get_connection_info();
                let node = info.peer_node_id.as_deref().and_then(Endpoint::new);
                crate::convergenceagent::agent::Daemon::from_registry().do_send(
                    CLUnregisterNode {
                        address: session_end_address,
                        node,
                    },
                );
                session_agent_address.do_send(ForceShutdown {});
            };
            tokio::spawn(fut); // we never need the join handle again

            TCPCLSessionAgent {
                address,
                local_endpoint,
                close_channel: Some(close_channel),
                send_channel,
            }
        })
    }
}
