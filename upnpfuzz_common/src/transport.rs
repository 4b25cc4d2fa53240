/// Implements the `Transport` trait for TCP
pub mod tcp;

/// Implements the `Transport` trait for UDP unicast and multicast
pub mod udp;
