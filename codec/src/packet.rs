// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Top-level control packet type and the byte-at-a-time [`Parser`] that
//! assembles one from a fixed header plus whichever per-type body parser
//! the header's packet type calls for.

use crate::base::PacketType;
use crate::connect::{ConnectPacket, ConnectParser};
use crate::error::{Error, ErrorKind};
use crate::parser::{FixedHeaderParser, Progress};
use crate::publish::{PublishPacket, PublishParser};
use crate::subscribe::{SubscribePacket, SubscribeParser};

/// A control packet the broker can receive from a client.
///
/// Connack, Suback and Pingresp are broker-to-client only and so never
/// appear here; a client sending one is rejected by [`dispatch`] before a
/// [`Packet`] would ever be built for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Connect(ConnectPacket),
    Publish(PublishPacket),
    Subscribe(SubscribePacket),
    PingRequest,
    Disconnect,
}

impl Packet {
    #[must_use]
    pub const fn packet_type(&self) -> &'static str {
        match self {
            Self::Connect(_) => "CONNECT",
            Self::Publish(_) => "PUBLISH",
            Self::Subscribe(_) => "SUBSCRIBE",
            Self::PingRequest => "PINGREQ",
            Self::Disconnect => "DISCONNECT",
        }
    }
}

#[derive(Debug)]
enum Body {
    Connect(ConnectParser),
    Publish(PublishParser),
    Subscribe(SubscribeParser),
    /// Header already fully describes the packet; nothing more to read.
    Empty(Packet),
}

#[derive(Debug)]
enum State {
    Header(FixedHeaderParser),
    Body(Body),
    /// A complete packet has been produced; [`Parser::reset`] must be
    /// called before any further byte is accepted.
    Done,
}

/// Assembles one control packet at a time from a byte stream.
///
/// `feed` accepts exactly one byte and reports [`Progress`]. Once it
/// reports [`Progress::Ready`] the parser will refuse any further byte
/// until [`Parser::reset`] is called, matching the rule that a connection
/// processes one packet fully before starting the next.
#[derive(Debug)]
pub struct Parser {
    state: State,
}

impl Parser {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: State::Header(FixedHeaderParser::new()),
        }
    }

    pub fn reset(&mut self) {
        self.state = State::Header(FixedHeaderParser::new());
    }

    /// # Errors
    ///
    /// Propagates any protocol violation raised by the fixed header or the
    /// per-type body parser. [`ErrorKind::FeatureNotImplemented`] is
    /// raised as soon as the fixed header of an unsupported packet type
    /// (Puback, Pubrec, Pubrel, Pubcomp, Unsubscribe, Unsuback) completes;
    /// its body is never parsed.
    pub fn feed(&mut self, byte: u8) -> Result<Progress<Packet>, Error> {
        match &mut self.state {
            State::Header(header) => match header.feed(byte)? {
                Progress::Pending => Ok(Progress::Pending),
                Progress::Ready((packet_type, length)) => {
                    self.state = State::Body(dispatch(packet_type, length)?);
                    if let State::Body(Body::Empty(_)) = &self.state {
                        self.finish_empty()
                    } else {
                        Ok(Progress::Pending)
                    }
                }
            },
            State::Body(body) => {
                let progress = match body {
                    Body::Connect(parser) => parser.feed(byte)?.map(Packet::Connect),
                    Body::Publish(parser) => parser.feed(byte)?.map(Packet::Publish),
                    Body::Subscribe(parser) => parser.feed(byte)?.map(Packet::Subscribe),
                    Body::Empty(_) => {
                        return Err(ErrorKind::MalformedControlPacket.into());
                    }
                };
                if matches!(progress, Progress::Ready(_)) {
                    self.state = State::Done;
                }
                Ok(progress)
            }
            State::Done => Err(ErrorKind::MalformedControlPacket.into()),
        }
    }

    fn finish_empty(&mut self) -> Result<Progress<Packet>, Error> {
        let State::Body(Body::Empty(packet)) = std::mem::replace(&mut self.state, State::Done)
        else {
            unreachable!("finish_empty only called from the Empty body state")
        };
        Ok(Progress::Ready(packet))
    }
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Progress<T> {
    fn map<U>(self, f: impl FnOnce(T) -> U) -> Progress<U> {
        match self {
            Progress::Pending => Progress::Pending,
            Progress::Ready(value) => Progress::Ready(f(value)),
        }
    }
}

fn dispatch(packet_type: PacketType, length: u32) -> Result<Body, Error> {
    match packet_type {
        PacketType::Connect => Ok(Body::Connect(ConnectParser::new(length))),
        PacketType::Publish { dup, qos, retain } => {
            Ok(Body::Publish(PublishParser::new(dup, qos, retain, length)))
        }
        PacketType::Subscribe => Ok(Body::Subscribe(SubscribeParser::new(length))),
        PacketType::PingRequest => empty(length, Packet::PingRequest),
        PacketType::Disconnect => empty(length, Packet::Disconnect),
        PacketType::ConnectAck | PacketType::SubscribeAck => {
            Err(ErrorKind::ControlPacketNotAllowed.into())
        }
        PacketType::PingResponse => Err(ErrorKind::ControlPacketNotAllowed.into()),
        PacketType::PublishAck
        | PacketType::PublishReceived
        | PacketType::PublishRelease
        | PacketType::PublishComplete
        | PacketType::Unsubscribe
        | PacketType::UnsubscribeAck => Err(ErrorKind::FeatureNotImplemented.into()),
    }
}

fn empty(length: u32, packet: Packet) -> Result<Body, Error> {
    if length != 0 {
        return Err(ErrorKind::MalformedControlPacket.into());
    }
    Ok(Body::Empty(packet))
}
