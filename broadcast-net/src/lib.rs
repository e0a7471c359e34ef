//! The broadcast client, broadcast server, and cluster membership/election
//! logic built on top of [`broadcast_core`]'s wire message.

pub mod client;
pub mod cluster;
pub mod server;
pub mod server_list;
pub mod settings;
pub mod transport;

pub use client::{BroadcastClient, ClientError, Inbound};
pub use server::{BroadcastServer, ServerStartError};
pub use settings::{ClientSettings, NetworkBinding, ServerSettings, DEFAULT_SERVER_PORT};
pub use transport::{NullTransport, Transport, UdpTransport};
