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

use std::collections::HashMap;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use log::{debug, warn};
use tokio::{
    net::TcpStream,
    sync::{mpsc, oneshot},
    time::Instant,
};
use tokio_util::codec::Framed;

use crate::{
    connection_info::ConnectionInfo,
    errors::{ErrorType, TransferSendErrors},
    messages::{Codec, Messages},
    stages::{
        SessionState, StageHandler, StageUpdate, contact::ContactStage,
        sess_established::SessEstablishedStage, sess_init::SessInitStage,
    },
    ticker::Ticker,
    transfer::Transfer,
};

pub type TransferRequest = (Vec<u8>, oneshot::Sender<Result<(), TransferSendErrors>>);

/// One TCP convergence-layer session over an accepted or dialed stream.
///
/// The owner takes the channel ends it cares about and then lets
/// [`TCPCLSession::manage_connection`] run to completion on its own task.
pub struct TCPCLSession {
    framed: Framed<TcpStream, Codec>,
    handler: StageHandler,
    ticker: Ticker,
    connection_info: ConnectionInfo,
    established_channel: (
        Option<oneshot::Sender<ConnectionInfo>>,
        Option<oneshot::Receiver<ConnectionInfo>>,
    ),
    close_channel: (Option<oneshot::Sender<()>>, Option<oneshot::Receiver<()>>),
    receive_channel: (mpsc::Sender<Transfer>, Option<mpsc::Receiver<Transfer>>),
    send_channel: (
        mpsc::Sender<TransferRequest>,
        Option<mpsc::Receiver<TransferRequest>>,
    ),
    pending_sends: HashMap<u64, oneshot::Sender<Result<(), TransferSendErrors>>>,
}

impl TCPCLSession {
    pub fn new(
        stream: TcpStream,
        is_server: bool,
        node_id: String,
        keepalive_interval: u16,
    ) -> Result<Self, std::io::Error> {
        let peer_address = stream.peer_addr()?;
        let state = SessionState::new(is_server, node_id, keepalive_interval);
        let handler = StageHandler::new(
            state,
            vec![
                Box::new(ContactStage::new()),
                Box::new(SessInitStage::new()),
                Box::new(SessEstablishedStage::new()),
            ],
        );

        let established_channel = oneshot::channel();
        let close_channel = oneshot::channel();
        let receive_channel = mpsc::channel(8);
        let send_channel = mpsc::channel(8);

        Ok(TCPCLSession {
            framed: Framed::new(stream, Codec::default()),
            handler,
            ticker: Ticker::new(),
            connection_info: ConnectionInfo {
                peer_address,
                peer_node_id: None,
                max_bundle_size: None,
            },
            established_channel: (Some(established_channel.0), Some(established_channel.1)),
            close_channel: (Some(close_channel.0), Some(close_channel.1)),
            receive_channel: (receive_channel.0, Some(receive_channel.1)),
            send_channel: (send_channel.0, Some(send_channel.1)),
            pending_sends: HashMap::new(),
        })
    }

    /// Fires once with the peer's parameters when the handshake finished.
    pub fn get_established_channel(&mut self) -> oneshot::Receiver<ConnectionInfo> {
        self.established_channel
            .1
            .take()
            .expect("established channel may only be taken once")
    }

    /// Requests an orderly session termination when triggered.
    pub fn get_close_channel(&mut self) -> oneshot::Sender<()> {
        self.close_channel
            .0
            .take()
            .expect("close channel may only be taken once")
    }

    /// Completed inbound transfers.
    pub fn get_receive_channel(&mut self) -> mpsc::Receiver<Transfer> {
        self.receive_channel
            .1
            .take()
            .expect("receive channel may only be taken once")
    }

    pub fn get_send_channel(&self) -> mpsc::Sender<TransferRequest> {
        self.send_channel.0.clone()
    }

    pub fn get_connection_info(&self) -> ConnectionInfo {
        self.connection_info.clone()
    }

    /// Runs the session until it terminates or fails.
    pub async fn manage_connection(&mut self) -> Result<(), ErrorType> {
        let out = self.drive().await;
        for (_, responder) in self.pending_sends.drain() {
            let _ = responder.send(Err(TransferSendErrors::SessionTerminated));
        }
        if let Err(e) = &out {
            debug!("Session to {} ended with: {e:?}", self.connection_info.peer_address);
        }
        out
    }

    async fn drive(&mut self) -> Result<(), ErrorType> {
        let initial = self.handler.start();
        self.send_messages(initial).await?;

        let mut close_receiver = self
            .close_channel
            .1
            .take()
            .expect("the close receiver stays with the session");
        let mut send_receiver = self
            .send_channel
            .1
            .take()
            .expect("the send receiver stays with the session");
        let mut close_requested = false;
        let mut send_closed = false;
        let mut established_fired = false;

        loop {
            if self.handler.is_finished() {
                return Ok(());
            }
            if self.handler.is_established() && !established_fired {
                established_fired = true;
                self.connection_info.peer_node_id = self.handler.state.peer_node_id.clone();
                self.connection_info.max_bundle_size = self.handler.state.transfer_mtu;
                if let Some(sender) = self.established_channel.0.take() {
                    let _ = sender.send(self.connection_info.clone());
                }
                if let Some(keepalive) = self.keepalive_duration() {
                    self.ticker.reschedule(keepalive);
                }
            }

            tokio::select! {
                frame = self.framed.next() => match frame {
                    Some(Ok(msg)) => {
                        let update = self.handler.handle_message(msg)?;
                        self.apply_update(update).await?;
                    }
                    Some(Err(e)) => return Err(e.into()),
                    None => {
                        return if self.handler.state.terminated || close_requested {
                            Ok(())
                        } else {
                            Err(ErrorType::ConnectionClosed)
                        };
                    }
                },
                request = send_receiver.recv(), if self.handler.is_established() && !send_closed => {
                    match request {
                        Some((data, responder)) => self.submit_transfer(data, responder).await?,
                        None => send_closed = true,
                    }
                },
                now = self.ticker.tick() => {
                    let update = self.handler.on_tick(now)?;
                    self.apply_update(update).await?;
                    // keep the timeout watch alive even on idle connections
                    if let Some(keepalive) = self.keepalive_duration() {
                        self.ticker.reschedule(keepalive);
                    }
                },
                _ = &mut close_receiver, if !close_requested => {
                    close_requested = true;
                    let msgs = self.handler.close();
                    self.send_messages(msgs).await?;
                }
            }
        }
    }

    async fn submit_transfer(
        &mut self,
        data: Vec<u8>,
        responder: oneshot::Sender<Result<(), TransferSendErrors>>,
    ) -> Result<(), ErrorType> {
        if let Some(max_size) = self.handler.state.transfer_mtu {
            if data.len() as u64 > max_size {
                let _ = responder.send(Err(TransferSendErrors::BundleTooLarge { max_size }));
                return Ok(());
            }
        }
        match self.handler.start_transfer(data) {
            Ok((id, update)) => {
                self.pending_sends.insert(id, responder);
                self.apply_update(update).await
            }
            Err(e) => {
                warn!("Dropping transfer request: {e:?}");
                let _ = responder.send(Err(TransferSendErrors::SessionNotEstablished));
                Ok(())
            }
        }
    }

    async fn apply_update(&mut self, update: StageUpdate) -> Result<(), ErrorType> {
        for transfer in update.delivered {
            // an unread receive channel applies backpressure here
            let _ = self.receive_channel.0.send(transfer).await;
        }
        for id in update.acked {
            if let Some(responder) = self.pending_sends.remove(&id) {
                let _ = responder.send(Ok(()));
            }
        }
        for id in update.refused {
            if let Some(responder) = self.pending_sends.remove(&id) {
                let _ = responder.send(Err(TransferSendErrors::PeerRefused { transfer_id: id }));
            }
        }
        self.send_messages(update.send).await
    }

    async fn send_messages(&mut self, msgs: Vec<Messages>) -> Result<(), ErrorType> {
        if msgs.is_empty() {
            return Ok(());
        }
        for msg in msgs {
            self.framed.send(msg).await.map_err(ErrorType::IoError)?;
        }
        self.handler.note_sent(Instant::now());
        // sending postpones the next keepalive
        if let Some(keepalive) = self.keepalive_duration() {
            self.ticker.reschedule(keepalive);
        }
        Ok(())
    }

    fn keepalive_duration(&self) -> Option<Duration> {
        if !self.handler.is_established() {
            return None;
        }
        match self.handler.state.negotiated_keepalive {
            Some(0) | None => None,
            Some(secs) => Some(Duration::from_secs(u64::from(secs))),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::net::{TcpListener, TcpStream};

    use super::TCPCLSession;

    async fn session_pair() -> (TCPCLSession, TCPCLSession) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (
            TCPCLSession::new(client, false, String::from("dtn://active"), 2).unwrap(),
            TCPCLSession::new(server, true, String::from("dtn://passive"), 2).unwrap(),
        )
    }

    #[tokio::test]
    async fn handshake_and_transfer() {
        let (mut active, mut passive) = session_pair().await;

        let active_established = active.get_established_channel();
        let passive_established = passive.get_established_channel();
        let mut passive_receive = passive.get_receive_channel();
        let send = active.get_send_channel();
        let active_close = active.get_close_channel();

        let active_task = tokio::spawn(async move {
            let _ = active.manage_connection().await;
        });
        let passive_task = tokio::spawn(async move {
            let _ = passive.manage_connection().await;
        });

        let active_info = active_established.await.unwrap();
        let passive_info = passive_established.await.unwrap();
        assert_eq!(active_info.peer_node_id.as_deref(), Some("dtn://passive"));
        assert_eq!(passive_info.peer_node_id.as_deref(), Some("dtn://active"));

        let (result_tx, result_rx) = tokio::sync::oneshot::channel();
        send.send((b"bundle bytes".to_vec(), result_tx))
            .await
            .unwrap();
        let transfer = tokio::time::timeout(Duration::from_secs(5), passive_receive.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(transfer.data, b"bundle bytes");
        result_rx.await.unwrap().unwrap();

        active_close.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), active_task)
            .await
            .unwrap()
            .unwrap();
        tokio::time::timeout(Duration::from_secs(5), passive_task)
            .await
            .unwrap()
            .unwrap();
    }
}
