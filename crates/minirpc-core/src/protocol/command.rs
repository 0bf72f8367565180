//! Command header and frame body encoding.

use crate::config::ProtocolConfig;
use crate::{Result, RpcError};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;

/// Request-kind discriminator carried in [`Header::command_type`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum CommandType {
    /// Method invocation.
    Request = 0,
    /// Successful invocation result.
    Response = 1,
    /// Failed invocation or rejected request.
    Fault = 2,
}

impl CommandType {
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(CommandType::Request),
            1 => Some(CommandType::Response),
            2 => Some(CommandType::Fault),
            _ => None,
        }
    }
}

impl fmt::Display for CommandType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CommandType::Request => "request",
            CommandType::Response => "response",
            CommandType::Fault => "fault",
        };
        write!(f, "{}", name)
    }
}

/// Fixed-size frame header.
///
/// `command_type` is kept raw so that frames with a type this build does not
/// know can still be decoded, answered and skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub request_id: u32,
    pub version: u32,
    pub command_type: u32,
}

impl Header {
    pub fn new(request_id: u32, version: u32, command_type: CommandType) -> Self {
        Self {
            request_id,
            version,
            command_type: command_type.as_u32(),
        }
    }

    /// Header for a frame of the given raw type.
    pub fn with_raw_type(request_id: u32, version: u32, command_type: u32) -> Self {
        Self {
            request_id,
            version,
            command_type,
        }
    }

    /// The decoded type, or `None` for values unknown to this build.
    pub fn kind(&self) -> Option<CommandType> {
        CommandType::from_u32(self.command_type)
    }

    pub const fn len() -> usize {
        ProtocolConfig::HEADER_LEN
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32(self.request_id);
        buf.put_u32(self.version);
        buf.put_u32(self.command_type);
    }

    pub fn decode(buf: &mut Bytes) -> Result<Self> {
        if buf.remaining() < Self::len() {
            return Err(RpcError::Protocol {
                message: format!(
                    "frame of {} bytes is shorter than the {}-byte header",
                    buf.remaining(),
                    Self::len()
                ),
            });
        }
        Ok(Self {
            request_id: buf.get_u32(),
            version: buf.get_u32(),
            command_type: buf.get_u32(),
        })
    }
}

/// One framed request or response: header plus opaque payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    header: Header,
    payload: Bytes,
}

impl Command {
    pub fn new(header: Header, payload: impl Into<Bytes>) -> Self {
        Self {
            header,
            payload: payload.into(),
        }
    }

    /// A response or fault answering `request`, keeping its id and version.
    pub fn reply_to(request: &Header, command_type: CommandType, payload: impl Into<Bytes>) -> Self {
        Self::new(
            Header::new(request.request_id, request.version, command_type),
            payload,
        )
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn request_id(&self) -> u32 {
        self.header.request_id
    }

    /// Copy of this command stamped with a different request id.
    pub fn with_request_id(&self, request_id: u32) -> Self {
        Self {
            header: Header {
                request_id,
                ..self.header
            },
            payload: self.payload.clone(),
        }
    }

    /// Size of [`encode`](Self::encode)'s output.
    pub fn encoded_len(&self) -> usize {
        Header::len() + self.payload.len()
    }

    /// Encode header and payload into one frame body (without length prefix).
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Header::len() + self.payload.len());
        self.header.encode(&mut buf);
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    /// Decode a frame body produced by [`Command::encode`].
    pub fn decode(frame: impl Into<Bytes>) -> Result<Self> {
        let mut frame = frame.into();
        let header = Header::decode(&mut frame)?;
        Ok(Self {
            header,
            payload: frame,
        })
    }
}
