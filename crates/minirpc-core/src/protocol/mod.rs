//! Wire protocol shared by clients and servers.
//!
//! A frame is a 4-byte big-endian length prefix followed by a fixed 12-byte
//! header and an opaque payload:
//!
//! ```text
//! [u32 BE: len][u32 BE: request_id][u32 BE: version][u32 BE: type][payload]
//! ```
//!
//! `len` counts header plus payload. The payload of invocation frames is JSON
//! (see [`invocation`]); the framing itself never looks inside it.

pub mod command;
pub mod frame;
pub mod invocation;

pub use command::{Command, CommandType, Header};
pub use frame::{check_frame_size, read_command, read_frame, write_command, write_frame};
pub use invocation::{FaultKind, RpcFault, RpcRequest};
