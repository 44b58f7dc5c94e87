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

//! Minimal TCP convergence layer: a connection is a one-way byte stream of
//! CBOR byte strings, each wrapping one encoded bundle. The listener side
//! is a pure receiver, dialed connections are pure senders.

use std::{io, net::SocketAddr, time::Duration};

use bp7::{bundle::Bundle, endpoint::Endpoint};
use bytes::{Buf, BytesMut};
use log::{debug, error, info, warn};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    sync::{broadcast, mpsc, oneshot},
    task::JoinHandle,
    time::timeout,
};

use crate::{
    common::{messages::Shutdown, settings::Settings},
    convergenceagent::messages::{
        AgentForwardBundle, CLRegisterNode, CLUnregisterNode, EventBundleReceived,
    },
};

use actix::{prelude::*, spawn};

use super::messages::ConnectRemote;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

type MtcpSendRequest = (Vec<u8>, oneshot::Sender<bool>);

/// Parses the head of a CBOR byte string (major type 2, definite length).
///
/// Returns the header length and payload length once enough bytes are
/// buffered, `Ok(None)` while the head is still incomplete, and an error
/// for anything that is not a definite-length byte string.
fn parse_byte_string_header(buf: &[u8]) -> Result<Option<(usize, usize)>, ()> {
    if buf.is_empty() {
        return Ok(None);
    }
    let initial = buf[0];
    if initial >> 5 != 2 {
        return Err(());
    }
    let additional = initial & 0x1F;
    let (header_len, payload_len) = match additional {
        n @ 0..=23 => (1, u64::from(n)),
        24 => {
            if buf.len() < 2 {
                return Ok(None);
            }
            (2, u64::from(buf[1]))
        }
        25 => {
            if buf.len() < 3 {
                return Ok(None);
            }
            (3, u64::from(u16::from_be_bytes(buf[1..3].try_into().unwrap())))
        }
        26 => {
            if buf.len() < 5 {
                return Ok(None);
            }
            (5, u64::from(u32::from_be_bytes(buf[1..5].try_into().unwrap())))
        }
        27 => {
            if buf.len() < 9 {
                return Ok(None);
            }
            (9, u64::from_be_bytes(buf[1..9].try_into().unwrap()))
        }
        _ => return Err(()),
    };
    Ok(Some((header_len, payload_len as usize)))
}

fn frame_bundle(data: &[u8]) -> Vec<u8> {
    serde_cbor::to_vec(&serde_bytes::Bytes::new(data))
        .expect("serializing a byte string cannot fail")
}

pub async fn mtcp_listener(
    mut shutdown: broadcast::Receiver<()>,
    _shutdown_complete_sender: mpsc::Sender<()>,
) -> Result<JoinHandle<()>, io::Error> {
    let settings = Settings::from_env();
    let local_endpoint = Endpoint::new(&settings.my_node_id).unwrap();

    let socket: SocketAddr = settings.mtcp_listen_address.parse().unwrap();

    info!("MTCP server listening on {socket}");

    let listener = TcpListener::bind(&socket).await?;

    let joinhandle = spawn(async move {
        loop {
            tokio::select! {
                conn = listener.accept() => {
                    match conn {
                        Ok((stream, address)) => {
                            debug!("New mtcp sender connected from {address}");
                            let endpoint = local_endpoint.clone();
                            spawn(async move {
                                handle_incoming(stream, endpoint).await;
                            });
                        },
                        Err(e) => {
                            error!("Error accepting an mtcp connection: {e:?}");
                        }
                    }
                }
                _ = shutdown.recv() => {
                    info!("Received shutdown message, stopping the mtcp socket");
                    break;
                }
            }
        }

        drop(listener);

        info!("MTCP socket has shutdown. See you");
        // _shutdown_complete_sender is implicitly dropped here
    });
    Ok(joinhandle)
}

async fn handle_incoming(mut stream: TcpStream, local_endpoint: Endpoint) {
    let mut buf = BytesMut::with_capacity(64 * 1024);
    loop {
        loop {
            let (header_len, payload_len) = match parse_byte_string_header(&buf) {
                Ok(Some(head)) => head,
                Ok(None) => break,
                Err(()) => {
                    warn!("Peer sent something that is not an mtcp frame, closing");
                    return;
                }
            };
            if buf.len() < header_len + payload_len {
                break;
            }
            buf.advance(header_len);
            let frame = buf[..payload_len].to_vec();
            buf.advance(payload_len);
            match Bundle::try_from(frame) {
                Ok(bundle) => {
                    crate::convergenceagent::agent::Daemon::from_registry().do_send(
                        EventBundleReceived {
                            bundle,
                            endpoint: local_endpoint.clone(),
                        },
                    );
                }
                Err(e) => {
                    warn!("Undecodable bundle on an mtcp stream, closing: {e:?}");
                    return;
                }
            }
        }

        match stream.read_buf(&mut buf).await {
            Ok(0) => {
                debug!("The mtcp sender hung up");
                return;
            }
            Ok(_) => {}
            Err(e) => {
                warn!("Error reading from an mtcp stream: {e}");
                return;
            }
        }
    }
}

/// Dials MTCP peers and keeps one writer task plus session actor per
/// address.
#[derive(Default)]
pub struct MTCPAgent {}

impl Actor for MTCPAgent {
    type Context = Context<Self>;
}

impl actix::Supervised for MTCPAgent {}

impl SystemService for MTCPAgent {}

impl Handler<ConnectRemote> for MTCPAgent {
    type Result = ();

    fn handle(&mut self, msg: ConnectRemote, ctx: &mut Self::Context) -> Self::Result {
        let ConnectRemote { address, node } = msg;
        let Some(socket_address) = address.strip_prefix("mtcp://").map(String::from) else {
            error!("Not an mtcp address: {address}");
            return;
        };

        let fut = async move {
            match timeout(CONNECT_TIMEOUT, TcpStream::connect(&socket_address)).await {
                Ok(Ok(stream)) => Ok(stream),
                Ok(Err(e)) => Err(format!("{e:?}")),
                Err(_) => Err(String::from("connect timed out")),
            }
        };
        fut.into_actor(self)
            .map(move |result, _act, _ctx| match result {
                Ok(stream) => {
                    MTCPSessionAgent::start_for(stream, address, node);
                }
                Err(e) => {
                    warn!("Error connecting to {address}: {e}");
                    crate::convergenceagent::agent::Daemon::from_registry()
                        .do_send(CLUnregisterNode {
                            address,
                            node: Some(node),
                        });
                }
            })
            .spawn(ctx);
    }
}

/// One dialed MTCP connection. Sends are serialized by the writer task
/// owning the socket.
pub struct MTCPSessionAgent {
    sender: Option<mpsc::Sender<MtcpSendRequest>>,
}

impl Actor for MTCPSessionAgent {
    type Context = Context<Self>;
}

impl Handler<AgentForwardBundle> for MTCPSessionAgent {
    type Result = ();

    fn handle(&mut self, msg: AgentForwardBundle, ctx: &mut Self::Context) -> Self::Result {
        let AgentForwardBundle { pack, responder } = msg;
        let Some(sender) = self.sender.clone() else {
            let _ = responder.send(false);
            return;
        };

        let bundle_data: Vec<u8> = match (&pack.bundle).try_into() {
            Ok(bundle_data) => bundle_data,
            Err(e) => {
                error!("Error serializing bundle: {e:?}");
                let _ = responder.send(false);
                return;
            }
        };

        let (result_sender, result_receiver) = oneshot::channel();
        let fut = async move { sender.send((bundle_data, result_sender)).await };
        fut.into_actor(self)
            .map(|res, _act, ctx| {
                if res.is_err() {
                    error!("The mtcp writer is gone. Killing the connection");
                    let _ = responder.send(false);
                    ctx.stop();
                    return;
                }
                tokio::spawn(async move {
                    let ok = result_receiver.await.unwrap_or(false);
                    let _ = responder.send(ok);
                });
            })
            .wait(ctx);
    }
}

impl Handler<Shutdown> for MTCPSessionAgent {
    type Result = ();

    fn handle(&mut self, _msg: Shutdown, ctx: &mut Self::Context) -> Self::Result {
        // dropping the mailbox ends the writer task and thereby the session
        self.sender = None;
        ctx.stop();
    }
}

impl MTCPSessionAgent {
    pub fn start_for(stream: TcpStream, address: String, node: Endpoint) -> Addr<Self> {
        let (sender, receiver) = mpsc::channel::<MtcpSendRequest>(8);

        let agent = MTCPSessionAgent {
            sender: Some(sender),
        }
        .start();

        crate::convergenceagent::agent::Daemon::from_registry().do_send(CLRegisterNode {
            address: address.clone(),
            node: node.clone(),
            sender: agent.clone().recipient(),
        });

        spawn(writer_task(stream, receiver, address, node));
        agent
    }
}

async fn writer_task(
    mut stream: TcpStream,
    mut receiver: mpsc::Receiver<MtcpSendRequest>,
    address: String,
    node: Endpoint,
) {
    while let Some((data, result)) = receiver.recv().await {
        let frame = frame_bundle(&data);
        match stream.write_all(&frame).await {
            Ok(()) => {
                let _ = result.send(true);
            }
            Err(e) => {
                warn!("Error writing to the mtcp stream at {address}: {e}");
                let _ = result.send(false);
                break;
            }
        }
    }
    let _ = stream.shutdown().await;
    crate::convergenceagent::agent::Daemon::from_registry().do_send(CLUnregisterNode {
        address,
        node: Some(node),
    });
}

#[cfg(test)]
mod tests {
    use super::{frame_bundle, parse_byte_string_header};

    #[test]
    fn header_parsing_matches_framing() {
        for len in [0usize, 5, 23, 24, 255, 256, 70000] {
            let data = vec![0xAB; len];
            let frame = frame_bundle(&data);
            let (header_len, payload_len) = parse_byte_string_header(&frame)
                .unwrap()
                .expect("complete frame must parse");
            assert_eq!(payload_len, len);
            assert_eq!(header_len + payload_len, frame.len());
            assert_eq!(&frame[header_len..], &data[..]);
        }
    }

    #[test]
    fn incomplete_heads_wait_for_more() {
        let frame = frame_bundle(&vec![0x00; 300]);
        // a 300 byte payload needs a two byte length, so the head is 3 bytes
        assert!(parse_byte_string_header(&frame[..1]).unwrap().is_none());
        assert!(parse_byte_string_header(&frame[..2]).unwrap().is_none());
        assert!(parse_byte_string_header(&frame[..3]).unwrap().is_some());
    }

    #[test]
    fn non_byte_strings_are_rejected() {
        // a CBOR array is not a valid mtcp frame
        assert!(parse_byte_string_header(&[0x82]).is_err());
    }
}
