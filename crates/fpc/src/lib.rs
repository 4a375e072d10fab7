//! FPC transport core.
//!
//! A bidirectional, message-oriented IPC layer over connected
//! `SOCK_SEQPACKET` Unix domain sockets: a fixed-layout frame codec
//! ([`fpc_proto`]), an out-of-line payload mechanism for large payloads,
//! an endpoint state machine supporting concurrent send/receive/
//! request-reply/descriptor passing, and a listener that surfaces inbound
//! connections as a bounded, cancellable sequence of endpoints.
//!
//! Construct endpoints with [`pair()`] (in-process) or
//! [`connect_path`] (connect to a listening address), or accept them from
//! a [`Listener`].

#![deny(missing_docs)]

mod client;
mod config;
mod endpoint;
mod error;
mod listener;
mod message;
mod ool;
mod pair;
mod socket;

pub use client::{connect_path, connect_path_with_config, connect_relative, connect_relative_with_config};
pub use config::{EndpointConfig, OOL_THRESHOLD};
pub use endpoint::{Endpoint, EndpointState, Incoming};
pub use error::{FpcError, Result};
pub use listener::{Connections, Listener};
pub use message::{DescriptorRef, Message, ReplyToken};
pub use pair::{pair, pair_with_config};
pub use socket::PeerCredentials;
