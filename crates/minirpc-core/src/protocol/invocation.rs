//! Invocation payloads exchanged inside [`Command`] frames.
//!
//! This is the one piece of protocol logic the client stub and the server
//! dispatcher must agree on: a request carries the interface name, the method
//! name and the JSON-encoded argument tuple; a response carries the JSON
//! return value; a fault carries an [`RpcFault`].

use super::command::{Command, CommandType, Header};
use crate::{Result, RpcError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Body of a [`CommandType::Request`] frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    pub interface: String,
    pub method: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

impl RpcRequest {
    pub fn new(
        interface: impl Into<String>,
        method: impl Into<String>,
        args: serde_json::Value,
    ) -> Self {
        Self {
            interface: interface.into(),
            method: method.into(),
            args,
        }
    }

    /// Build the request frame. The transport assigns the request id.
    pub fn to_command(&self, version: u32) -> Result<Command> {
        let payload = serde_json::to_vec(self)?;
        Ok(Command::new(
            Header::new(0, version, CommandType::Request),
            payload,
        ))
    }

    pub fn from_command(command: &Command) -> Result<Self> {
        serde_json::from_slice(command.payload()).map_err(|e| RpcError::Protocol {
            message: format!("malformed invocation request: {}", e),
        })
    }
}

/// Classification of a fault response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    /// The target method ran and failed.
    Invocation,
    ServiceNotFound,
    MethodNotFound,
    /// The request body or its arguments could not be decoded.
    BadRequest,
    UnsupportedVersion,
    UnknownCommandType,
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FaultKind::Invocation => "invocation",
            FaultKind::ServiceNotFound => "service not found",
            FaultKind::MethodNotFound => "method not found",
            FaultKind::BadRequest => "bad request",
            FaultKind::UnsupportedVersion => "unsupported version",
            FaultKind::UnknownCommandType => "unknown command type",
        };
        write!(f, "{}", name)
    }
}

/// Body of a [`CommandType::Fault`] frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcFault {
    pub kind: FaultKind,
    pub message: String,
}

impl RpcFault {
    pub fn new(kind: FaultKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Fault frame answering `request`.
    pub fn into_command(self, request: &Header) -> Command {
        let payload = serde_json::to_vec(&self).unwrap_or_default();
        Command::reply_to(request, CommandType::Fault, payload)
    }
}

/// Success frame answering `request`.
pub fn success_command(request: &Header, value: &serde_json::Value) -> Result<Command> {
    let payload = serde_json::to_vec(value)?;
    Ok(Command::reply_to(request, CommandType::Response, payload))
}

/// Turn a response frame back into the method's return value.
///
/// Fault frames become [`RpcError::RemoteFault`]; anything else that is not a
/// response is a protocol violation.
pub fn decode_response<R: DeserializeOwned>(response: &Command) -> Result<R> {
    match response.header().kind() {
        Some(CommandType::Response) => {
            serde_json::from_slice(response.payload()).map_err(|e| RpcError::Protocol {
                message: format!("malformed invocation result: {}", e),
            })
        }
        Some(CommandType::Fault) => {
            let fault: RpcFault =
                serde_json::from_slice(response.payload()).map_err(|e| RpcError::Protocol {
                    message: format!("malformed fault response: {}", e),
                })?;
            Err(RpcError::RemoteFault {
                kind: fault.kind,
                message: fault.message,
            })
        }
        _ => Err(RpcError::Protocol {
            message: format!(
                "unexpected command type {} in response to request {}",
                response.header().command_type,
                response.request_id()
            ),
        }),
    }
}
