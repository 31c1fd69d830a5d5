// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! MQTT 3.1.1 wire codec.
//!
//! Parsing is byte-at-a-time (see [`parser`]) so a connection can feed
//! bytes as they arrive off the network without buffering a whole packet
//! first. Encoding goes the other way: a packet is always serialized in
//! one call since the broker only ever writes complete packets.

mod base;
mod connect;
mod error;
mod packet;
pub mod parser;
mod publish;
mod serialize;
mod subscribe;
pub mod topic;
pub mod utils;
mod var_int;

pub use base::{PacketId, PacketType, ProtocolLevel, QoS, PROTOCOL_NAME};
pub use connect::{ConnAckPacket, ConnectPacket, ConnectParser, ConnectReturnCode, Will};
pub use error::{Error, ErrorKind, Result};
pub use packet::{Packet, Parser};
pub use parser::Progress;
pub use publish::{PublishPacket, PublishParser};
pub use serialize::{encode_disconnect, encode_ping_request, encode_ping_response, EncodePacket};
pub use subscribe::{
    SubAckPacket, SubscribeParser, SubscribePacket, SubscribeReturnCode, UnsubscribePacket,
};
pub use topic::{Topic, TopicFilter};
pub use var_int::{encoded_len as var_int_encoded_len, MAX_VALUE as MAX_REMAINING_LENGTH};
