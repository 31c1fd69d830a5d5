// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Encoders for the packets the broker needs to write to the wire, plus
//! a handful of encoders used only to build fixtures in tests.

use crate::base::{PacketType, PROTOCOL_NAME};
use crate::connect::{ConnAckPacket, ConnectPacket};
use crate::error::Error;
use crate::publish::PublishPacket;
use crate::subscribe::{SubAckPacket, SubscribePacket};
use crate::var_int;

fn write_string(buf: &mut Vec<u8>, s: &str) {
    #[allow(clippy::cast_possible_truncation)]
    let len = s.len() as u16;
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(s.as_bytes());
}

fn write_binary(buf: &mut Vec<u8>, data: &[u8]) {
    #[allow(clippy::cast_possible_truncation)]
    let len = data.len() as u16;
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(data);
}

fn finish(buf: &mut Vec<u8>, packet_type: PacketType, body: Vec<u8>) -> Result<(), Error> {
    #[allow(clippy::cast_possible_truncation)]
    let len = body.len() as u32;
    buf.push(packet_type.to_byte());
    var_int::encode(len, buf)?;
    buf.extend_from_slice(&body);
    Ok(())
}

/// Types that can serialize themselves onto the wire.
pub trait EncodePacket {
    /// # Errors
    ///
    /// Returns an error if the encoded remaining length would exceed
    /// [`var_int::MAX_VALUE`].
    fn encode(&self, buf: &mut Vec<u8>) -> Result<(), Error>;
}

impl EncodePacket for ConnAckPacket {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<(), Error> {
        let body = vec![u8::from(self.session_present), self.return_code as u8];
        finish(buf, PacketType::ConnectAck, body)
    }
}

impl EncodePacket for SubAckPacket {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<(), Error> {
        let mut body = Vec::with_capacity(2 + self.return_codes.len());
        body.extend_from_slice(&self.packet_id.to_be_bytes());
        body.extend(self.return_codes.iter().map(|rc| rc.to_byte()));
        finish(buf, PacketType::SubscribeAck, body)
    }
}

impl EncodePacket for PublishPacket {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<(), Error> {
        let mut body = Vec::new();
        write_string(&mut body, self.topic.as_str());
        if let Some(packet_id) = self.packet_id {
            body.extend_from_slice(&packet_id.to_be_bytes());
        }
        body.extend_from_slice(&self.payload);
        finish(
            buf,
            PacketType::Publish {
                dup: self.dup,
                qos: self.qos,
                retain: self.retain,
            },
            body,
        )
    }
}

/// Zero-body PINGRESP.
pub fn encode_ping_response(buf: &mut Vec<u8>) -> Result<(), Error> {
    finish(buf, PacketType::PingResponse, Vec::new())
}

impl EncodePacket for ConnectPacket {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<(), Error> {
        let mut body = Vec::new();
        write_string(&mut body, PROTOCOL_NAME);
        body.push(self.protocol_level as u8);
        let mut flags = 0u8;
        if self.clean_session {
            flags |= 0x02;
        }
        if let Some(will) = &self.will {
            flags |= 0x04;
            flags |= (will.qos as u8) << 3;
            if will.retain {
                flags |= 0x20;
            }
        }
        if self.username.is_some() {
            flags |= 0x80;
        }
        if self.password.is_some() {
            flags |= 0x40;
        }
        body.push(flags);
        body.extend_from_slice(&self.keep_alive.to_be_bytes());
        write_string(&mut body, &self.client_id);
        if let Some(will) = &self.will {
            write_string(&mut body, &will.topic);
            write_binary(&mut body, &will.message);
        }
        if let Some(username) = &self.username {
            write_string(&mut body, username);
        }
        if let Some(password) = &self.password {
            write_binary(&mut body, password);
        }
        finish(buf, PacketType::Connect, body)
    }
}

impl EncodePacket for SubscribePacket {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<(), Error> {
        let mut body = Vec::new();
        body.extend_from_slice(&self.packet_id.to_be_bytes());
        for (filter, qos) in &self.filters {
            write_string(&mut body, filter.as_str());
            body.push(*qos as u8);
        }
        finish(buf, PacketType::Subscribe, body)
    }
}

/// Zero-body PINGREQ, used only to build test fixtures.
pub fn encode_ping_request(buf: &mut Vec<u8>) -> Result<(), Error> {
    finish(buf, PacketType::PingRequest, Vec::new())
}

/// Zero-body DISCONNECT, used only to build test fixtures.
pub fn encode_disconnect(buf: &mut Vec<u8>) -> Result<(), Error> {
    finish(buf, PacketType::Disconnect, Vec::new())
}

