//! Collection of common implementations for `upnpfuzz_core`
//!
//! `upnpfuzz_common` contains the protocol adapters for the UPnP protocol family and ready to
//! use implementations of the other `traits` of `upnpfuzz_core`.

//! Currently there are the following common implementations:

//! - `ProtocolAdapter`
//!     - `SsdpAdapter`: M-SEARCH and NOTIFY messages sent over UDP.
//!     - `SoapAdapter`: Calls every action found in the service descriptions of a device.
//!     - `EspAdapter`: Subscribes, renews and cancels event subscriptions.
//! - `HealthCheck`
//!     - `HttpHealthcheck`: Polls a status url of the target.
//! - `ResetHandler`
//!     - `CommandResetHandler`: Runs a shell command to restart the target.
//!     - `WaitResetHandler`: Does nothing, for targets restarting on their own.
//! - `ExternalMutator`
//!     - `CommandMutator`: Runs a program like radamsa for every mutation.
//! - `Transport`
//!     - `TcpTransport`: Connects to a TCP server and sends a single request.
//!     - `UdpTransport`: Sends a datagram and waits for one answer from any source.
//!
//! `Discovery` finds the UPnP devices in the local network with a multicast search.
//!
#![deny(missing_docs)]
#![deny(unsafe_code, clippy::unwrap_used)]
#![warn(clippy::pedantic)]

/// A collection of differed `Transport` implementations
pub mod transport;

/// The `ProtocolAdapter` implementations for SSDP, SOAP and ESP
pub mod adapter;

/// A collection of differed `ResetHandler` implementations
pub mod resethandler;

/// A collection of differed `HealthCheck` implementations
pub mod healthcheck;

/// A collection of differed `ExternalMutator` implementations
pub mod mutator;

/// Finds UPnP devices with a multicast M-SEARCH
pub mod discovery;

#[cfg(test)]
mod testutil;
