// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::fmt;

/// Closed set of protocol-level failures that a parser, serializer or the
/// connection processor can raise.
///
/// Every variant maps to one unambiguous wire-level or session-level
/// violation; there is no catch-all variant so that callers can match
/// exhaustively and decide per-kind whether the connection must be closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidControlPacketType,
    MalformedRemainingLength,
    StringLengthViolation,
    DuplicateConnectProtocolViolation,
    ConnectProtocolViolation,
    ProtocolNameViolation,
    UnacceptableProtocolLevel,
    ConnectFlagProtocolViolation,
    WillMessageProtocolViolation,
    AuthorizationProtocolViolation,
    ControlPacketLength,
    MalformedControlPacket,
    PacketIdentifierLengthViolation,
    SubscribeProtocolViolation,
    InvalidTopicFilter,
    FeatureNotImplemented,
    ControlPacketNotAllowed,
    DupFlagViolation,
    InvalidQoSLevel,
    PublishProtocolViolation,
    NotConnected,
    SessionInUse,
    SessionNotFound,
    NoPacketSender,
    InvalidWildcardInTopic,
    CleanSessionNotSetForEmptyClientId,
}

impl ErrorKind {
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::InvalidControlPacketType => "invalid control packet type",
            Self::MalformedRemainingLength => "malformed remaining length",
            Self::StringLengthViolation => "string length violation",
            Self::DuplicateConnectProtocolViolation => "duplicate connect protocol violation",
            Self::ConnectProtocolViolation => "connect protocol violation",
            Self::ProtocolNameViolation => "protocol name violation",
            Self::UnacceptableProtocolLevel => "unacceptable protocol level",
            Self::ConnectFlagProtocolViolation => "connect flag not set to zero",
            Self::WillMessageProtocolViolation => "will message protocol violation",
            Self::AuthorizationProtocolViolation => "authorization protocol violation",
            Self::ControlPacketLength => "control packet length error",
            Self::MalformedControlPacket => "malformed control packet",
            Self::PacketIdentifierLengthViolation => "packet identifier length violation",
            Self::SubscribeProtocolViolation => "subscribe protocol violation",
            Self::InvalidTopicFilter => "invalid topic filter",
            Self::FeatureNotImplemented => "feature not implemented",
            Self::ControlPacketNotAllowed => "control packet not allowed",
            Self::DupFlagViolation => "dup flag violation",
            Self::InvalidQoSLevel => "invalid QoS level",
            Self::PublishProtocolViolation => "publish protocol violation",
            Self::NotConnected => "not connected",
            Self::SessionInUse => "session is in use for client id",
            Self::SessionNotFound => "cannot find session for client id",
            Self::NoPacketSender => "no packet sender",
            Self::InvalidWildcardInTopic => "invalid wildcard in topic name",
            Self::CleanSessionNotSetForEmptyClientId => {
                "clean session not set for empty client id"
            }
        }
    }

    /// Whether this kind of error requires the network connection to be closed.
    ///
    /// Only a handful of subscribe/publish-local violations are survivable;
    /// everything that indicates the wire stream itself is desynchronized
    /// (framing, protocol negotiation, session bookkeeping) is fatal.
    #[must_use]
    pub const fn is_fatal(self) -> bool {
        !matches!(self, Self::FeatureNotImplemented)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Error {
    kind: ErrorKind,
}

impl Error {
    #[must_use]
    pub const fn new(kind: ErrorKind) -> Self {
        Self { kind }
    }

    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.kind.message())
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;
