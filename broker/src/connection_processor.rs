// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Per-connection state machine.
//!
//! One [`ConnectionProcessor`] is owned by each connection task. It knows
//! nothing about sockets: it is handed decoded [`Packet`]s and a couple of
//! shared collaborators (the session registry, the subscription tree) and
//! returns what happened. Keeping the state machine free of I/O is what
//! lets every transition be exercised directly in tests.

use codec::{
    ConnAckPacket, ConnectReturnCode, Error, ErrorKind, Packet, PublishPacket, SubAckPacket,
    SubscribeReturnCode,
};
use log::{debug, info, warn};

use crate::session_registry::{PacketSender, SessionRegistry};
use crate::subscription_tree::SubscriptionTreeManager;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    None,
    Connected,
    Disconnected,
}

/// What the connection's I/O loop should do after a packet was processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Keep,
    Close,
}

/// Reply to hand back to the client, if the processed packet produces one.
///
/// Publish never produces a direct reply: matching subscribers are sent
/// to through their own [`PacketSender`] rather than returned here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    None,
    ConnAck(ConnAckPacket),
    SubAck(SubAckPacket),
    PingResponse,
}

/// Drives one client connection through Connect / Connected / Disconnected.
pub struct ConnectionProcessor {
    status: Status,
    client_id: Option<String>,
    sender: PacketSender,
}

impl ConnectionProcessor {
    #[must_use]
    pub fn new(sender: PacketSender) -> Self {
        Self {
            status: Status::None,
            client_id: None,
            sender,
        }
    }

    #[must_use]
    pub fn client_id(&self) -> Option<&str> {
        self.client_id.as_deref()
    }

    /// Process one decoded packet, returning what the caller should do
    /// with the connection and what (if anything) to write back.
    ///
    /// # Errors
    ///
    /// Returns the [`codec::ErrorKind`] violated by this packet in the
    /// processor's current state, e.g. [`ErrorKind::NotConnected`] for
    /// anything but Connect before a session is established, or
    /// [`ErrorKind::DuplicateConnectProtocolViolation`] for a second
    /// Connect. Every error here means the connection must be closed.
    pub async fn process(
        &mut self,
        packet: Packet,
        sessions: &SessionRegistry,
        subscriptions: &SubscriptionTreeManager,
    ) -> Result<(Disposition, Response), Error> {
        self.check_state(&packet)?;
        match packet {
            Packet::Connect(connect) => {
                self.status = Status::Connected;
                self.process_connect(connect, sessions).await
            }
            Packet::Publish(publish) => {
                self.process_publish(publish, sessions, subscriptions).await
            }
            Packet::Subscribe(subscribe) => {
                self.process_subscribe(subscribe, sessions, subscriptions).await
            }
            Packet::PingRequest => Ok((Disposition::Keep, Response::PingResponse)),
            Packet::Disconnect => {
                self.status = Status::Disconnected;
                self.process_disconnect(sessions).await
            }
        }
    }

    fn check_state(&self, packet: &Packet) -> Result<(), Error> {
        match (self.status, packet) {
            (Status::None, Packet::Connect(_)) => Ok(()),
            (Status::None, _) | (Status::Disconnected, _) => Err(ErrorKind::NotConnected.into()),
            (Status::Connected, Packet::Connect(_)) => {
                Err(ErrorKind::DuplicateConnectProtocolViolation.into())
            }
            (Status::Connected, _) => Ok(()),
        }
    }

    async fn process_connect(
        &mut self,
        connect: codec::ConnectPacket,
        sessions: &SessionRegistry,
    ) -> Result<(Disposition, Response), Error> {
        debug!(
            "connect client_id={} keep_alive={}",
            connect.client_id, connect.keep_alive
        );
        if let Err(err) = sessions.claim(&connect.client_id, self.sender.clone()) {
            if err.kind() == ErrorKind::SessionInUse {
                return Ok((
                    Disposition::Close,
                    Response::ConnAck(ConnAckPacket {
                        session_present: false,
                        return_code: ConnectReturnCode::IdentifierRejected,
                    }),
                ));
            }
            return Err(err);
        }
        self.client_id = Some(connect.client_id);
        Ok((
            Disposition::Keep,
            Response::ConnAck(ConnAckPacket {
                session_present: false,
                return_code: ConnectReturnCode::Accepted,
            }),
        ))
    }

    async fn process_publish(
        &mut self,
        publish: PublishPacket,
        sessions: &SessionRegistry,
        subscriptions: &SubscriptionTreeManager,
    ) -> Result<(Disposition, Response), Error> {
        let topic = publish.topic.clone();
        info!("publish topic={}", topic.as_str());
        let matched = subscriptions.snapshot().matching_sessions(&topic);
        for client_id in matched {
            if let Some(target_sender) = sessions.sender(&client_id) {
                if target_sender
                    .send(Packet::Publish(publish.clone()))
                    .await
                    .is_err()
                {
                    warn!("dropping publish for disconnected client {client_id}");
                }
            }
        }
        Ok((Disposition::Keep, Response::None))
    }

    async fn process_subscribe(
        &mut self,
        subscribe: codec::SubscribePacket,
        sessions: &SessionRegistry,
        subscriptions: &SubscriptionTreeManager,
    ) -> Result<(Disposition, Response), Error> {
        let client_id = self
            .client_id
            .clone()
            .expect("Connected status implies client_id is set");
        let mut return_codes = Vec::with_capacity(subscribe.filters.len());
        for (filter, qos) in &subscribe.filters {
            match subscriptions.add_filter(filter, &client_id) {
                Ok(()) => return_codes.push(SubscribeReturnCode::Success(*qos)),
                Err(_err) => return_codes.push(SubscribeReturnCode::Failure),
            }
        }
        sessions.add_filters(
            &client_id,
            subscribe.filters.iter().map(|(filter, _)| filter.clone()),
        )?;
        Ok((
            Disposition::Keep,
            Response::SubAck(SubAckPacket {
                packet_id: subscribe.packet_id,
                return_codes,
            }),
        ))
    }

    async fn process_disconnect(
        &mut self,
        sessions: &SessionRegistry,
    ) -> Result<(Disposition, Response), Error> {
        if let Some(client_id) = &self.client_id {
            let _ignore_missing = sessions.release(client_id);
        }
        Ok((Disposition::Close, Response::None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codec::{ConnectPacket, ProtocolLevel, SubscribePacket, Topic, TopicFilter};

    fn processor() -> (ConnectionProcessor, tokio::sync::mpsc::Receiver<Packet>) {
        let (tx, rx) = tokio::sync::mpsc::channel(16);
        (ConnectionProcessor::new(tx), rx)
    }

    fn connect(client_id: &str) -> Packet {
        Packet::Connect(ConnectPacket {
            protocol_level: ProtocolLevel::V311,
            clean_session: true,
            keep_alive: 60,
            client_id: client_id.to_string(),
            will: None,
            username: None,
            password: None,
        })
    }

    #[test]
    fn test_publish_before_connect_is_rejected() {
        tokio_test::block_on(async {
            let (mut processor, _rx) = processor();
            let sessions = SessionRegistry::new();
            let subscriptions = SubscriptionTreeManager::new();
            let publish = Packet::Publish(codec::PublishPacket {
                dup: false,
                qos: codec::QoS::AtMostOnce,
                retain: false,
                topic: Topic::new("a/b").unwrap(),
                packet_id: None,
                payload: Vec::new(),
            });
            let err = processor
                .process(publish, &sessions, &subscriptions)
                .await
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::NotConnected);
        });
    }

    #[test]
    fn test_connect_then_duplicate_connect_is_rejected() {
        tokio_test::block_on(async {
            let (mut processor, _rx) = processor();
            let sessions = SessionRegistry::new();
            let subscriptions = SubscriptionTreeManager::new();
            let (disposition, response) = processor
                .process(connect("device-1"), &sessions, &subscriptions)
                .await
                .unwrap();
            assert_eq!(disposition, Disposition::Keep);
            assert!(matches!(response, Response::ConnAck(_)));

            let err = processor
                .process(connect("device-1"), &sessions, &subscriptions)
                .await
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::DuplicateConnectProtocolViolation);
        });
    }

    #[test]
    fn test_ping_replies_with_pong() {
        tokio_test::block_on(async {
            let (mut processor, _rx) = processor();
            let sessions = SessionRegistry::new();
            let subscriptions = SubscriptionTreeManager::new();
            processor
                .process(connect("device-1"), &sessions, &subscriptions)
                .await
                .unwrap();
            let (disposition, response) = processor
                .process(Packet::PingRequest, &sessions, &subscriptions)
                .await
                .unwrap();
            assert_eq!(disposition, Disposition::Keep);
            assert_eq!(response, Response::PingResponse);
        });
    }

    #[test]
    fn test_second_connect_with_same_client_id_from_another_connection_is_rejected() {
        tokio_test::block_on(async {
            let sessions = SessionRegistry::new();
            let subscriptions = SubscriptionTreeManager::new();

            let (mut first, _rx1) = processor();
            first
                .process(connect("device-1"), &sessions, &subscriptions)
                .await
                .unwrap();

            let (mut second, _rx2) = processor();
            let (disposition, response) = second
                .process(connect("device-1"), &sessions, &subscriptions)
                .await
                .unwrap();
            assert_eq!(disposition, Disposition::Close);
            assert!(matches!(
                response,
                Response::ConnAck(ConnAckPacket {
                    return_code: ConnectReturnCode::IdentifierRejected,
                    ..
                })
            ));
        });
    }

    #[test]
    fn test_subscribe_then_publish_fans_out_to_matching_session() {
        tokio_test::block_on(async {
            let sessions = SessionRegistry::new();
            let subscriptions = SubscriptionTreeManager::new();

            let (mut subscriber, mut sub_rx) = processor();
            subscriber
                .process(connect("subscriber"), &sessions, &subscriptions)
                .await
                .unwrap();
            let subscribe = Packet::Subscribe(SubscribePacket {
                packet_id: 1,
                filters: vec![(
                    TopicFilter::new("sport/tennis/#").unwrap(),
                    codec::QoS::AtMostOnce,
                )],
            });
            let (_disposition, response) = subscriber
                .process(subscribe, &sessions, &subscriptions)
                .await
                .unwrap();
            assert!(matches!(response, Response::SubAck(_)));

            let (mut publisher, _pub_rx) = processor();
            publisher
                .process(connect("publisher"), &sessions, &subscriptions)
                .await
                .unwrap();
            let publish = Packet::Publish(codec::PublishPacket {
                dup: false,
                qos: codec::QoS::AtMostOnce,
                retain: false,
                topic: Topic::new("sport/tennis/wimbledon/player1").unwrap(),
                packet_id: None,
                payload: b"cool!".to_vec(),
            });
            let (disposition, response) = publisher
                .process(publish, &sessions, &subscriptions)
                .await
                .unwrap();
            assert_eq!(disposition, Disposition::Keep);
            assert_eq!(response, Response::None);

            let forwarded = sub_rx.try_recv().expect("publish forwarded to subscriber");
            let Packet::Publish(forwarded) = forwarded else {
                panic!("expected a forwarded Publish packet");
            };
            assert_eq!(forwarded.payload, b"cool!");
        });
    }
}
