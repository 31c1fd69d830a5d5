// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! End-to-end exercise of Connect -> Subscribe -> Publish across two
//! independent connections sharing one registry and one subscription tree,
//! the same collaborators a real accept loop would hand each connection.

use codec::{ConnAckPacket, ConnectPacket, ConnectReturnCode, Packet, ProtocolLevel, PublishPacket, QoS, SubscribePacket, Topic, TopicFilter};
use mqtt_broker::connection_processor::{ConnectionProcessor, Disposition, Response};
use mqtt_broker::session_registry::SessionRegistry;
use mqtt_broker::subscription_tree::SubscriptionTreeManager;

fn connect_packet(client_id: &str) -> Packet {
    Packet::Connect(ConnectPacket {
        protocol_level: ProtocolLevel::V311,
        clean_session: true,
        keep_alive: 30,
        client_id: client_id.to_string(),
        will: None,
        username: None,
        password: None,
    })
}

#[test]
fn test_two_clients_share_registry_and_tree() {
    tokio_test::block_on(async {
        let sessions = SessionRegistry::new();
        let subscriptions = SubscriptionTreeManager::new();

        let (subscriber_tx, mut subscriber_rx) = tokio::sync::mpsc::channel(16);
        let mut subscriber = ConnectionProcessor::new(subscriber_tx);
        let (disposition, response) = subscriber
            .process(connect_packet("weather-display"), &sessions, &subscriptions)
            .await
            .unwrap();
        assert_eq!(disposition, Disposition::Keep);
        assert_eq!(
            response,
            Response::ConnAck(ConnAckPacket {
                session_present: false,
                return_code: ConnectReturnCode::Accepted,
            })
        );

        let subscribe = Packet::Subscribe(SubscribePacket {
            packet_id: 42,
            filters: vec![(TopicFilter::new("weather/+/temperature").unwrap(), QoS::AtMostOnce)],
        });
        let (disposition, response) = subscriber
            .process(subscribe, &sessions, &subscriptions)
            .await
            .unwrap();
        assert_eq!(disposition, Disposition::Keep);
        assert!(matches!(response, Response::SubAck(_)));

        let (publisher_tx, _publisher_rx) = tokio::sync::mpsc::channel(16);
        let mut publisher = ConnectionProcessor::new(publisher_tx);
        publisher
            .process(connect_packet("sensor-7"), &sessions, &subscriptions)
            .await
            .unwrap();

        let publish = Packet::Publish(PublishPacket {
            dup: false,
            qos: QoS::AtMostOnce,
            retain: false,
            topic: Topic::new("weather/boston/temperature").unwrap(),
            packet_id: None,
            payload: b"14C".to_vec(),
        });
        let (disposition, response) = publisher
            .process(publish, &sessions, &subscriptions)
            .await
            .unwrap();
        assert_eq!(disposition, Disposition::Keep);
        assert_eq!(response, Response::None);

        let delivered = subscriber_rx.try_recv().expect("subscriber receives the matched publish");
        let Packet::Publish(delivered) = delivered else {
            panic!("expected a Publish packet");
        };
        assert_eq!(delivered.payload, b"14C");
        assert!(subscriber_rx.try_recv().is_err());

        assert_eq!(sessions.count(), 2);
    });
}

#[test]
fn test_publish_to_unrelated_topic_is_not_delivered() {
    tokio_test::block_on(async {
        let sessions = SessionRegistry::new();
        let subscriptions = SubscriptionTreeManager::new();

        let (subscriber_tx, mut subscriber_rx) = tokio::sync::mpsc::channel(16);
        let mut subscriber = ConnectionProcessor::new(subscriber_tx);
        subscriber
            .process(connect_packet("alarm-panel"), &sessions, &subscriptions)
            .await
            .unwrap();
        let subscribe = Packet::Subscribe(SubscribePacket {
            packet_id: 1,
            filters: vec![(TopicFilter::new("security/#").unwrap(), QoS::AtMostOnce)],
        });
        subscriber
            .process(subscribe, &sessions, &subscriptions)
            .await
            .unwrap();

        let (publisher_tx, _publisher_rx) = tokio::sync::mpsc::channel(16);
        let mut publisher = ConnectionProcessor::new(publisher_tx);
        publisher
            .process(connect_packet("sensor-7"), &sessions, &subscriptions)
            .await
            .unwrap();
        let publish = Packet::Publish(PublishPacket {
            dup: false,
            qos: QoS::AtMostOnce,
            retain: false,
            topic: Topic::new("weather/boston/temperature").unwrap(),
            packet_id: None,
            payload: b"14C".to_vec(),
        });
        publisher
            .process(publish, &sessions, &subscriptions)
            .await
            .unwrap();

        assert!(subscriber_rx.try_recv().is_err());
    });
}
