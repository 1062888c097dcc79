//! Line-delimited JSON surface over stdio, for a UI process that keeps one
//! backend alive across many requests.

pub mod protocol;
mod server;

pub use protocol::{RpcRequest, ServerMessage};
pub use server::{Server, ShutdownHandle};
