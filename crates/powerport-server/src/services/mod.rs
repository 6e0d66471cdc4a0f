//! Background services for powerport-server.

pub mod node_poller;

pub use node_poller::NodePoller;
