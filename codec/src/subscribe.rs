// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

use std::convert::TryFrom;

use crate::base::{PacketId, QoS};
use crate::error::{Error, ErrorKind};
use crate::parser::{PacketIdentifierParser, Progress, RemainingBudget, StringParser};
use crate::topic::TopicFilter;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribePacket {
    pub packet_id: PacketId,
    pub filters: Vec<(TopicFilter, QoS)>,
}

#[derive(Debug)]
enum State {
    PacketId(PacketIdentifierParser),
    Filter(StringParser),
    Qos(String),
    Ready,
}

/// Byte-at-a-time parser for a Subscribe packet body.
///
/// Filters that repeat a topic string are kept only on first occurrence:
/// a client resubscribing mid-packet almost certainly means to update the
/// requested QoS in place, so later duplicates are dropped rather than
/// reordering the list the way a sort-then-dedup pass would.
#[derive(Debug)]
pub struct SubscribeParser {
    state: State,
    budget: RemainingBudget,
    packet_id: Option<PacketId>,
    filters: Vec<(TopicFilter, QoS)>,
    seen: Vec<String>,
}

impl SubscribeParser {
    #[must_use]
    pub fn new(remaining_length: u32) -> Self {
        Self {
            state: State::PacketId(PacketIdentifierParser::new()),
            budget: RemainingBudget::new(remaining_length),
            packet_id: None,
            filters: Vec::new(),
            seen: Vec::new(),
        }
    }

    /// # Errors
    ///
    /// Returns [`ErrorKind::InvalidTopicFilter`] for a malformed filter
    /// string or [`ErrorKind::InvalidQoSLevel`] for a requested QoS byte
    /// outside `{0, 1, 2}`.
    pub fn feed(&mut self, byte: u8) -> Result<Progress<SubscribePacket>, Error> {
        self.budget.consume()?;
        match &mut self.state {
            State::PacketId(parser) => {
                if let Progress::Ready(id) = parser.feed(byte) {
                    self.packet_id = Some(id);
                    self.state = State::Filter(StringParser::new());
                }
            }
            State::Filter(parser) => {
                if let Progress::Ready(filter) = parser.feed(byte)? {
                    self.state = State::Qos(filter);
                }
            }
            State::Qos(filter) => {
                if byte & 0xfc != 0 {
                    return Err(ErrorKind::InvalidQoSLevel.into());
                }
                let qos = QoS::try_from(byte)?;
                let filter_str = std::mem::take(filter);
                if !self.seen.contains(&filter_str) {
                    self.seen.push(filter_str.clone());
                    let topic_filter = TopicFilter::new(&filter_str)?;
                    self.filters.push((topic_filter, qos));
                }
                self.state = if self.budget.remaining() == 0 {
                    State::Ready
                } else {
                    State::Filter(StringParser::new())
                };
            }
            State::Ready => return Err(ErrorKind::MalformedControlPacket.into()),
        }
        if matches!(self.state, State::Ready) {
            if self.filters.is_empty() {
                return Err(ErrorKind::SubscribeProtocolViolation.into());
            }
            return Ok(Progress::Ready(SubscribePacket {
                packet_id: self.packet_id.expect("packet id set before filters"),
                filters: std::mem::take(&mut self.filters),
            }));
        }
        Ok(Progress::Pending)
    }
}

/// Per-filter outcome reported back to the subscribing client. `Failure`
/// corresponds to the wire value `0x80`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeReturnCode {
    Success(QoS),
    Failure,
}

impl SubscribeReturnCode {
    #[must_use]
    pub const fn to_byte(self) -> u8 {
        match self {
            Self::Success(qos) => qos as u8,
            Self::Failure => 0x80,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubAckPacket {
    pub packet_id: PacketId,
    pub return_codes: Vec<SubscribeReturnCode>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsubscribePacket {
    pub packet_id: PacketId,
    pub filters: Vec<TopicFilter>,
}
