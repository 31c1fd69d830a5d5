// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

use std::convert::TryFrom;

use crate::base::{ProtocolLevel, QoS, PROTOCOL_NAME};
use crate::error::{Error, ErrorKind};
use crate::parser::{BinaryParser, Progress, RemainingBudget, StringParser};
use crate::utils::random_client_id;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectPacket {
    pub protocol_level: ProtocolLevel,
    pub clean_session: bool,
    pub keep_alive: u16,
    pub client_id: String,
    pub will: Option<Will>,
    pub username: Option<String>,
    pub password: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Will {
    pub topic: String,
    pub message: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ConnectFlags {
    has_username: bool,
    has_password: bool,
    will_retain: bool,
    will_qos: u8,
    has_will: bool,
    clean_session: bool,
}

impl ConnectFlags {
    fn parse(byte: u8) -> Result<Self, Error> {
        if byte & 0x01 != 0 {
            return Err(ErrorKind::ConnectFlagProtocolViolation.into());
        }
        let has_will = byte & 0x04 != 0;
        let will_qos = (byte & 0x18) >> 3;
        if will_qos == 0x03 {
            return Err(ErrorKind::WillMessageProtocolViolation.into());
        }
        if !has_will && (will_qos != 0 || byte & 0x20 != 0) {
            return Err(ErrorKind::WillMessageProtocolViolation.into());
        }
        let has_username = byte & 0x80 != 0;
        let has_password = byte & 0x40 != 0;
        if has_password && !has_username {
            return Err(ErrorKind::ConnectFlagProtocolViolation.into());
        }
        Ok(Self {
            has_username,
            has_password,
            will_retain: byte & 0x20 != 0,
            will_qos,
            has_will,
            clean_session: byte & 0x02 != 0,
        })
    }
}

#[derive(Debug)]
enum State {
    ProtocolName(StringParser),
    ProtocolLevel,
    Flags,
    KeepAliveHigh,
    KeepAliveLow(u8),
    ClientId(StringParser),
    WillTopic(StringParser),
    WillMessage(BinaryParser),
    Username(StringParser),
    Password(BinaryParser),
    Ready,
}

/// Byte-at-a-time parser for a Connect packet body.
///
/// Fields are consumed strictly in wire order; which optional fields are
/// expected is only known once the connect-flags byte has been seen, so the
/// state machine resolves `Flags` into the exact sequence of remaining
/// states at that point.
#[derive(Debug)]
pub struct ConnectParser {
    state: State,
    budget: RemainingBudget,
    flags: Option<ConnectFlags>,
    protocol_level: Option<ProtocolLevel>,
    keep_alive: u16,
    client_id: Option<String>,
    will_topic: Option<String>,
    will_message: Option<Vec<u8>>,
    username: Option<String>,
    password: Option<Vec<u8>>,
}

impl ConnectParser {
    #[must_use]
    pub fn new(remaining_length: u32) -> Self {
        Self {
            state: State::ProtocolName(StringParser::new()),
            budget: RemainingBudget::new(remaining_length),
            flags: None,
            protocol_level: None,
            keep_alive: 0,
            client_id: None,
            will_topic: None,
            will_message: None,
            username: None,
            password: None,
        }
    }

    /// # Errors
    ///
    /// Returns an error on any protocol violation; the connection must be
    /// closed in every case (Connect has no error that can be ignored).
    pub fn feed(&mut self, byte: u8) -> Result<Progress<ConnectPacket>, Error> {
        self.budget.consume()?;
        match &mut self.state {
            State::ProtocolName(parser) => {
                if let Progress::Ready(name) = parser.feed(byte)? {
                    if name != PROTOCOL_NAME {
                        return Err(ErrorKind::ProtocolNameViolation.into());
                    }
                    self.state = State::ProtocolLevel;
                }
                Ok(Progress::Pending)
            }
            State::ProtocolLevel => {
                let level = ProtocolLevel::try_from(byte)?;
                if level != ProtocolLevel::V311 {
                    return Err(ErrorKind::UnacceptableProtocolLevel.into());
                }
                self.protocol_level = Some(level);
                self.state = State::Flags;
                Ok(Progress::Pending)
            }
            State::Flags => {
                self.flags = Some(ConnectFlags::parse(byte)?);
                self.state = State::KeepAliveHigh;
                Ok(Progress::Pending)
            }
            State::KeepAliveHigh => {
                self.state = State::KeepAliveLow(byte);
                Ok(Progress::Pending)
            }
            State::KeepAliveLow(high) => {
                self.keep_alive = u16::from_be_bytes([*high, byte]);
                self.state = State::ClientId(StringParser::new());
                Ok(Progress::Pending)
            }
            State::ClientId(parser) => {
                if let Progress::Ready(client_id) = parser.feed(byte)? {
                    self.client_id = Some(client_id);
                    self.advance_past_client_id()?;
                }
                Ok(Progress::Pending)
            }
            State::WillTopic(parser) => {
                if let Progress::Ready(topic) = parser.feed(byte)? {
                    self.will_topic = Some(topic);
                    self.state = State::WillMessage(BinaryParser::new());
                }
                Ok(Progress::Pending)
            }
            State::WillMessage(parser) => {
                if let Progress::Ready(message) = parser.feed(byte)? {
                    self.will_message = Some(message);
                    self.advance_past_will()?;
                }
                Ok(Progress::Pending)
            }
            State::Username(parser) => {
                if let Progress::Ready(username) = parser.feed(byte)? {
                    self.username = Some(username);
                    self.advance_past_username()?;
                }
                Ok(Progress::Pending)
            }
            State::Password(parser) => {
                if let Progress::Ready(password) = parser.feed(byte)? {
                    self.password = Some(password);
                    self.state = State::Ready;
                }
                Ok(Progress::Pending)
            }
            State::Ready => Err(ErrorKind::MalformedControlPacket.into()),
        }
        .and_then(|progress| self.finish_if_ready(progress))
    }

    fn advance_past_client_id(&mut self) -> Result<(), Error> {
        let flags = self.flags.expect("flags set before client id");
        let empty_id = self.client_id.as_deref().is_some_and(str::is_empty);
        if empty_id && !flags.clean_session {
            return Err(ErrorKind::CleanSessionNotSetForEmptyClientId.into());
        }
        if empty_id {
            self.client_id = Some(random_client_id());
        }
        self.state = if flags.has_will {
            State::WillTopic(StringParser::new())
        } else if flags.has_username {
            State::Username(StringParser::new())
        } else if flags.has_password {
            return Err(ErrorKind::ConnectFlagProtocolViolation.into());
        } else {
            State::Ready
        };
        Ok(())
    }

    fn advance_past_will(&mut self) -> Result<(), Error> {
        let flags = self.flags.expect("flags set before will");
        self.state = if flags.has_username {
            State::Username(StringParser::new())
        } else if flags.has_password {
            return Err(ErrorKind::ConnectFlagProtocolViolation.into());
        } else {
            State::Ready
        };
        Ok(())
    }

    fn advance_past_username(&mut self) -> Result<(), Error> {
        let flags = self.flags.expect("flags set before username");
        self.state = if flags.has_password {
            State::Password(BinaryParser::new())
        } else {
            State::Ready
        };
        Ok(())
    }

    fn finish_if_ready(
        &mut self,
        progress: Progress<ConnectPacket>,
    ) -> Result<Progress<ConnectPacket>, Error> {
        if !matches!(self.state, State::Ready) {
            return Ok(progress);
        }
        if self.budget.remaining() != 0 {
            return Err(ErrorKind::ControlPacketLength.into());
        }
        let flags = self.flags.expect("flags set by Ready state");
        let will = if flags.has_will {
            Some(Will {
                topic: self.will_topic.clone().expect("will topic set"),
                message: self.will_message.clone().expect("will message set"),
                qos: QoS::try_from(flags.will_qos)?,
                retain: flags.will_retain,
            })
        } else {
            None
        };
        Ok(Progress::Ready(ConnectPacket {
            protocol_level: self.protocol_level.expect("protocol level set"),
            clean_session: flags.clean_session,
            keep_alive: self.keep_alive,
            client_id: self.client_id.clone().expect("client id set"),
            will,
            username: self.username.clone(),
            password: self.password.clone(),
        }))
    }
}

/// Result of a Connect attempt, echoed back on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectReturnCode {
    Accepted = 0x00,
    UnacceptableProtocolVersion = 0x01,
    IdentifierRejected = 0x02,
    ServerUnavailable = 0x03,
    BadUserNameOrPassword = 0x04,
    NotAuthorized = 0x05,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnAckPacket {
    pub session_present: bool,
    pub return_code: ConnectReturnCode,
}
