//
// Copyright (c) The Bgpsd Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;

use bgpsd_utils::bytes::{BytesExt, BytesMutExt, TLS_BUF};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use num_traits::{FromPrimitive, ToPrimitive};
use serde::{Deserialize, Serialize};

use crate::packet::capability::Capabilities;
use crate::packet::consts::{
    BGP_VERSION, CeaseSubcode, ErrorCode, MAX_PKTSIZE, MSGSIZE_HEADER,
    MSGSIZE_KEEPALIVE, MSGSIZE_NOTIFICATION_MIN, MSGSIZE_OPEN_MIN,
    MSGSIZE_RREFRESH, MSGSIZE_UPDATE_MIN, MessageHeaderErrorSubcode,
    MessageType, OpenMessageErrorSubcode, OpenParamType, Role,
    RouteRefreshErrorSubcode,
};
use crate::packet::error::{
    DecodeError, DecodeResult, MessageHeaderError, OpenMessageError,
    RouteRefreshMessageError,
};

//
// BGP message.
//
// Encoding format (message header):
//
// 0                   1                   2                   3
// 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                                                               |
// +                                                               +
// |                                                               |
// +                                                               +
// |                           Marker                              |
// +                                                               +
// |                                                               |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |          Length               |      Type     |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum Message {
    Open(OpenMsg),
    Update(UpdateMsg),
    Notification(NotificationMsg),
    Keepalive(KeepaliveMsg),
    RouteRefresh(RouteRefreshMsg),
}

//
// OPEN Message.
//
// Encoding format (message body):
//
// 0                   1                   2                   3
// 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
// +-+-+-+-+-+-+-+-+
// |    Version    |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |     My Autonomous System      |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |           Hold Time           |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                         BGP Identifier                        |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// | Opt Parm Len  |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                                                               |
// |             Optional Parameters (variable)                    |
// |                                                               |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//
// The optional parameters hold a single capability TLV list. When the list
// would overflow the one-byte length field, the RFC 9072 extended encoding is
// used: the length field carries the sentinel 255 and an Extended Length
// parameter with two-byte lengths follows.
//
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct OpenMsg {
    pub version: u8,
    pub short_as: u16,
    pub holdtime: u16,
    pub identifier: Ipv4Addr,
    pub capa: Capabilities,
    pub role: Option<Role>,
    pub as4: Option<u32>,
}

//
// UPDATE Message.
//
// The message body is opaque to the session engine: it is framed and handed
// to the RDE verbatim.
//
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct UpdateMsg {
    pub data: Bytes,
}

//
// NOTIFICATION Message.
//
// Encoding format (message body):
//
// 0                   1                   2                   3
// 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// | Error code    | Error subcode |   Data (variable)             |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct NotificationMsg {
    pub error_code: u8,
    pub error_subcode: u8,
    pub data: Vec<u8>,
}

//
// KEEPALIVE Message.
//
// A KEEPALIVE message consists of only the message header and has a length of
// 19 octets.
//
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct KeepaliveMsg {}

//
// ROUTE-REFRESH Message.
//
// Encoding format (message body):
//
// 0       7      15      23      31
// +-------+-------+-------+-------+
// |      AFI      | Subt. | SAFI  |
// +-------+-------+-------+-------+
//
// The subtype field is the RFC 2918 reserved byte, reused by RFC 7313 for
// the BoRR/EoRR demarcation messages.
//
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct RouteRefreshMsg {
    pub afi: u16,
    pub subtype: u8,
    pub safi: u8,
}

// ===== impl Message =====

impl Message {
    const MSG_LEN_POS: std::ops::Range<usize> = 16..18;

    // Encodes BGP message into a bytes buffer.
    pub fn encode(&self) -> Bytes {
        TLS_BUF.with(|buf| {
            let mut buf = buf.borrow_mut();
            buf.clear();

            // Marker field.
            buf.put_u128(u128::MAX);
            // The length field will be initialized later.
            buf.put_u16(0);

            // Message type and body.
            match self {
                Message::Open(msg) => msg.encode(&mut buf),
                Message::Update(msg) => msg.encode(&mut buf),
                Message::Notification(msg) => msg.encode(&mut buf),
                Message::Keepalive(msg) => msg.encode(&mut buf),
                Message::RouteRefresh(msg) => msg.encode(&mut buf),
            }

            // Rewrite message length.
            let msg_len = buf.len() as u16;
            buf[Self::MSG_LEN_POS].copy_from_slice(&msg_len.to_be_bytes());

            buf.clone().freeze()
        })
    }

    // Parses and validates a message header from the start of the buffer.
    //
    // Returns `None` if the buffer doesn't yet contain a full header, and
    // the total message length and type otherwise. The per-type length
    // floors are enforced here so that a message is rejected before its body
    // is buffered.
    pub fn parse_header(
        data: &[u8],
    ) -> DecodeResult<Option<(usize, MessageType)>> {
        if data.len() < MSGSIZE_HEADER {
            return Ok(None);
        }

        let mut buf = Bytes::copy_from_slice(&data[0..MSGSIZE_HEADER]);

        // Parse and validate marker.
        let marker = buf.get_u128();
        if marker != u128::MAX {
            return Err(MessageHeaderError::ConnectionNotSynchronized.into());
        }

        // Parse and validate message length.
        let msg_len = buf.get_u16();
        if (msg_len as usize) < MSGSIZE_HEADER
            || msg_len as usize > MAX_PKTSIZE
        {
            return Err(MessageHeaderError::BadMessageLength(msg_len).into());
        }

        // Parse and validate message type.
        let msg_type = buf.get_u8();
        let Some(msg_etype) = MessageType::from_u8(msg_type) else {
            return Err(MessageHeaderError::BadMessageType(msg_type).into());
        };

        // Validate the message length against the per-type floor.
        let valid = match msg_etype {
            MessageType::Open => msg_len >= MSGSIZE_OPEN_MIN,
            MessageType::Update => msg_len >= MSGSIZE_UPDATE_MIN,
            MessageType::Notification => msg_len >= MSGSIZE_NOTIFICATION_MIN,
            MessageType::Keepalive => msg_len == MSGSIZE_KEEPALIVE,
            MessageType::RouteRefresh => msg_len >= MSGSIZE_RREFRESH,
        };
        if !valid {
            return Err(MessageHeaderError::BadMessageLength(msg_len).into());
        }

        Ok(Some((msg_len as usize, msg_etype)))
    }

    // Decode buffer into a BGP message.
    //
    // The buffer must contain exactly one full message.
    pub fn decode(data: &[u8]) -> DecodeResult<Self> {
        let Some((msg_len, msg_type)) = Self::parse_header(data)? else {
            return Err(MessageHeaderError::BadMessageLength(
                data.len() as u16,
            )
            .into());
        };
        let mut buf = Bytes::copy_from_slice(&data[MSGSIZE_HEADER..msg_len]);

        match msg_type {
            MessageType::Open => {
                let msg = OpenMsg::decode(&mut buf)?;
                Ok(Message::Open(msg))
            }
            MessageType::Update => {
                let msg = UpdateMsg::decode(&mut buf)?;
                Ok(Message::Update(msg))
            }
            MessageType::Notification => {
                let msg = NotificationMsg::decode(&mut buf)?;
                Ok(Message::Notification(msg))
            }
            MessageType::Keepalive => {
                let msg = KeepaliveMsg::decode(&mut buf)?;
                Ok(Message::Keepalive(msg))
            }
            MessageType::RouteRefresh => {
                let msg = RouteRefreshMsg::decode(&mut buf)?;
                Ok(Message::RouteRefresh(msg))
            }
        }
    }

    pub fn msg_type(&self) -> MessageType {
        match self {
            Message::Open(_) => MessageType::Open,
            Message::Update(_) => MessageType::Update,
            Message::Notification(_) => MessageType::Notification,
            Message::Keepalive(_) => MessageType::Keepalive,
            Message::RouteRefresh(_) => MessageType::RouteRefresh,
        }
    }
}

// ===== impl OpenMsg =====

impl OpenMsg {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(MessageType::Open as u8);
        buf.put_u8(self.version);
        buf.put_u16(self.short_as);
        buf.put_u16(self.holdtime);
        buf.put_ipv4(&self.identifier);

        // Capabilities.
        let mut capas = BytesMut::new();
        self.capa.encode(&mut capas, self.as4, self.role);

        if capas.is_empty() {
            buf.put_u8(0);
        } else if capas.len() + 2 >= 255 {
            // RFC 9072: sentinel length plus extended headers with two-byte
            // length fields.
            buf.put_u8(255);
            buf.put_u8(OpenParamType::ExtendedLength as u8);
            buf.put_u16(capas.len() as u16 + 1 + 2);
            buf.put_u8(OpenParamType::Capabilities as u8);
            buf.put_u16(capas.len() as u16);
            buf.put_slice(&capas);
        } else {
            buf.put_u8(capas.len() as u8 + 2);
            buf.put_u8(OpenParamType::Capabilities as u8);
            buf.put_u8(capas.len() as u8);
            buf.put_slice(&capas);
        }
    }

    pub fn decode(buf: &mut Bytes) -> DecodeResult<Self> {
        let msg_len = (buf.remaining() + MSGSIZE_HEADER) as u16;

        // Parse and validate BGP version.
        let version = buf.get_u8();
        if version != BGP_VERSION {
            return Err(OpenMessageError::UnsupportedVersion(version).into());
        }

        // Parse and validate the short AS number.
        let short_as = buf.get_u16();
        if short_as == 0 {
            return Err(OpenMessageError::BadPeerAs.into());
        }

        // Parse hold time. Whether the value is acceptable depends on the
        // configured minimum and is checked by the caller.
        let holdtime = buf.get_u16();

        // Parse and validate BGP identifier. It is treated as an opaque
        // value of which only zero is invalid.
        let identifier = buf.get_ipv4();
        if identifier.is_unspecified() {
            return Err(OpenMessageError::BadBgpIdentifier.into());
        }

        // Parse the optional parameters, switching to two-byte parameter
        // lengths when the RFC 9072 extended form is detected.
        let mut extended = false;
        let mut opt_param_len = buf.get_u8() as u16;
        if opt_param_len == 0 {
            if msg_len != MSGSIZE_OPEN_MIN {
                return Err(OpenMessageError::MalformedOptParam.into());
            }
        } else {
            if msg_len < MSGSIZE_OPEN_MIN + 1 {
                return Err(OpenMessageError::MalformedOptParam.into());
            }
            if buf.chunk()[0] == OpenParamType::ExtendedLength as u8 {
                let _sentinel = buf.get_u8();
                if buf.remaining() < 2 {
                    return Err(OpenMessageError::MalformedOptParam.into());
                }
                opt_param_len = buf.get_u16();
                extended = true;
            }
            let extra: u32 = if extended { 3 } else { 0 };
            if opt_param_len as u32 + extra
                != (msg_len - MSGSIZE_OPEN_MIN) as u32
            {
                return Err(OpenMessageError::MalformedOptParam.into());
            }
        }

        let mut capa = Capabilities::default();
        let mut role = None;
        let mut as4 = None;
        let mut plen = opt_param_len as usize;
        while plen > 0 {
            let hdr_len = if extended { 3 } else { 2 };
            if plen < hdr_len || buf.remaining() < hdr_len {
                return Err(OpenMessageError::MalformedOptParam.into());
            }
            let param_type = buf.get_u8();
            let param_len = if extended {
                buf.get_u16() as usize
            } else {
                buf.get_u8() as usize
            };
            plen -= hdr_len;
            if param_len > plen || param_len > buf.remaining() {
                return Err(OpenMessageError::MalformedOptParam.into());
            }
            let mut param_value = buf.copy_to_bytes(param_len);
            plen -= param_len;

            match OpenParamType::from_u8(param_type) {
                Some(OpenParamType::Capabilities) => {
                    capa.parse(&mut param_value, &mut role, &mut as4)?;
                }
                _ => {
                    return Err(OpenMessageError::UnsupportedOptParam(
                        param_type,
                    )
                    .into());
                }
            }
        }

        Ok(OpenMsg {
            version,
            short_as,
            holdtime,
            identifier,
            capa,
            role,
            as4,
        })
    }

    // Returns the peer's real AS number, preferring the 4-octet capability
    // value over the short AS field.
    pub fn real_as(&self) -> u32 {
        self.as4.unwrap_or(self.short_as as u32)
    }
}

// ===== impl UpdateMsg =====

impl UpdateMsg {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(MessageType::Update as u8);
        buf.put_slice(&self.data);
    }

    pub fn decode(buf: &mut Bytes) -> DecodeResult<Self> {
        // The body is passed to the RDE verbatim. In case of errors the
        // whole session is reset with a NOTIFICATION anyway, so nothing is
        // validated here.
        let data = buf.copy_to_bytes(buf.remaining());
        Ok(UpdateMsg { data })
    }
}

// ===== impl NotificationMsg =====

impl NotificationMsg {
    pub fn new(
        error_code: impl ToPrimitive,
        error_subcode: impl ToPrimitive,
    ) -> Self {
        NotificationMsg {
            error_code: error_code.to_u8().unwrap(),
            error_subcode: error_subcode.to_u8().unwrap(),
            data: Default::default(),
        }
    }

    pub fn with_data(
        error_code: impl ToPrimitive,
        error_subcode: impl ToPrimitive,
        data: Vec<u8>,
    ) -> Self {
        NotificationMsg {
            data,
            ..Self::new(error_code, error_subcode)
        }
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(MessageType::Notification as u8);
        buf.put_u8(self.error_code);
        buf.put_u8(self.error_subcode);

        // Cap the data to the maximum message size.
        let max_data = MAX_PKTSIZE - MSGSIZE_NOTIFICATION_MIN as usize;
        let len = std::cmp::min(self.data.len(), max_data);
        buf.put_slice(&self.data[..len]);
    }

    pub fn decode(buf: &mut Bytes) -> DecodeResult<Self> {
        let error_code = buf.get_u8();
        let error_subcode = buf.get_u8();

        Ok(NotificationMsg {
            error_code,
            error_subcode,
            data: buf.to_vec(),
        })
    }

    // Extracts the RFC 9003 shutdown communication of an administrative
    // Cease notification, if present.
    pub fn shutdown_reason(&self) -> Option<String> {
        if self.error_code != ErrorCode::Cease as u8
            || (self.error_subcode != CeaseSubcode::AdministrativeShutdown as u8
                && self.error_subcode
                    != CeaseSubcode::AdministrativeReset as u8)
        {
            return None;
        }

        let reason_len = *self.data.first()? as usize;
        if reason_len == 0 {
            return None;
        }
        let reason = self.data.get(1..1 + reason_len)?;
        Some(String::from_utf8_lossy(reason).into_owned())
    }
}

impl From<&DecodeError> for NotificationMsg {
    fn from(error: &DecodeError) -> NotificationMsg {
        let error_code;
        let error_subcode;
        let mut data = vec![];

        match error {
            DecodeError::MessageHeader(error) => {
                error_code = ErrorCode::MessageHeaderError as u8;
                error_subcode = match error {
                    MessageHeaderError::ConnectionNotSynchronized => {
                        MessageHeaderErrorSubcode::ConnectionNotSynchronized
                    }
                    MessageHeaderError::BadMessageLength(len) => {
                        data = len.to_be_bytes().to_vec();
                        MessageHeaderErrorSubcode::BadMessageLength
                    }
                    MessageHeaderError::BadMessageType(msg_type) => {
                        data = vec![*msg_type];
                        MessageHeaderErrorSubcode::BadMessageType
                    }
                } as u8;
            }
            DecodeError::OpenMessage(error) => {
                error_code = ErrorCode::OpenMessageError as u8;
                error_subcode = match error {
                    OpenMessageError::UnsupportedVersion(..) => {
                        // Data carries the largest supported version.
                        data = (BGP_VERSION as u16).to_be_bytes().to_vec();
                        OpenMessageErrorSubcode::UnsupportedVersionNumber
                    }
                    OpenMessageError::BadPeerAs => {
                        OpenMessageErrorSubcode::BadPeerAs
                    }
                    OpenMessageError::BadBgpIdentifier => {
                        OpenMessageErrorSubcode::BadBgpIdentifier
                    }
                    OpenMessageError::UnsupportedOptParam(..) => {
                        OpenMessageErrorSubcode::UnsupportedOptParam
                    }
                    OpenMessageError::MalformedOptParam => {
                        OpenMessageErrorSubcode::Unspecific
                    }
                } as u8;
            }
            DecodeError::RouteRefreshMessage(error) => {
                error_code = ErrorCode::RouteRefreshMessageError as u8;
                error_subcode = match error {
                    RouteRefreshMessageError::InvalidMessageLength(len) => {
                        data = len.to_be_bytes().to_vec();
                        RouteRefreshErrorSubcode::InvalidMessageLength
                    }
                } as u8;
            }
        }

        NotificationMsg {
            error_code,
            error_subcode,
            data,
        }
    }
}

// ===== impl KeepaliveMsg =====

impl KeepaliveMsg {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(MessageType::Keepalive as u8);
    }

    pub fn decode(_buf: &mut Bytes) -> DecodeResult<Self> {
        // A KEEPALIVE message consists of only the message header.
        Ok(KeepaliveMsg {})
    }
}

// ===== impl RouteRefreshMsg =====

impl RouteRefreshMsg {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(MessageType::RouteRefresh as u8);
        buf.put_u16(self.afi);
        buf.put_u8(self.subtype);
        buf.put_u8(self.safi);
    }

    pub fn decode(buf: &mut Bytes) -> DecodeResult<Self> {
        let afi = buf.get_u16();
        let subtype = buf.get_u8();
        let safi = buf.get_u8();

        // Any ORF data that might follow is ignored.
        buf.advance(buf.remaining());

        Ok(RouteRefreshMsg { afi, subtype, safi })
    }
}
