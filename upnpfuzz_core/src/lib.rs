//!
//! `upnpfuzz_core` is the campaign engine of a mutation-based fuzzer for the UPnP protocol family:
//! SSDP discovery, SOAP device control and event subscriptions (ESP).
//!
//! UPnP stacks run on routers, printers and media boxes where it is rarely possible to build a
//! harness around the firmware. `upnpfuzz` therefore talks to the live device: it builds
//! well-formed requests, corrupts chosen fields, sends them over the wire, decides whether the
//! target survived, stores reproducible crash evidence and restarts the target to continue.
//!
//! To use the `upnpfuzz_core` you have to implement the following traits:
//! - `ProtocolAdapter`: Builds the baseline requests and sends them to the target
//! - `HealthCheck`: Optional, used to verify the correct working of the target
//! - `ResetHandler`: Used to restart the target in case it did crash
//! - `ExternalMutator`: Optional, delegates the mutation to an external tool
//!
//! Ready to use implementations for SSDP, SOAP and ESP can be found in the `upnpfuzz_common`
//! crate.
//!
//! ```rs
//! #[tokio::main]
//! async fn main() {
//!     let logger = Logger::try_init(false).ok();
//!     let settings = CampaignSettings {
//!         strategy: Strategy::Overflow,
//!         crash_dir: Some("crashes".into()),
//!         iterations: Some(1000),
//!         ..Default::default()
//!     };
//!     let config = CampaignConfig::try_from(settings).unwrap();
//!
//!     let adapter = SsdpAdapter::new("192.168.0.1:1900".parse().unwrap(), config.settings().network_timeout, None);
//!     let campaign: CampaignBuilder<_, HttpHealthcheck, _, CommandMutator> =
//!         CampaignBuilder::new(adapter, WaitResetHandler);
//!
//!     match campaign.start(config, true, logger, CancellationToken::new()).await {
//!         Ok(summary) => println!("{} crashes", summary.crashes),
//!         Err(err) => eprintln!("{err}"),
//!     }
//! }
//! ```
//!

#![deny(missing_docs)]
#![deny(unsafe_code, clippy::unwrap_used)]
#![warn(clippy::pedantic)]

/// Contains all `traits` that have to be defined to use `upnpfuzz_core`. There are common
/// implementations in the `upnpfuzz_common` crate that could be used.
pub mod traits;

/// Well-formed requests with named mutable fields and the mutated requests derived from them.
pub mod request;

/// Contains the campaign engine and the TUI which can also be used in a headless mode.
pub mod fuzz;

/// Validated configuration of a campaign.
pub mod config;

/// Manage the logger. This can be used to initialize the `tracing_subscriber` in case
/// `upnpfuzz_core` is used in headless mode.
pub mod log;

/// Crash directory of the campaign
pub mod output;

/// Replays crashes that were found by a campaign.
pub mod triage;

/// Contains all the different errors `upnpfuzz_core` can return.
pub mod error;

/// Strategies and the mutation engine applying them to baseline requests.
pub mod mutator;

/// Injection catalog and overflow lengths.
pub mod payloads;

/// Decides whether the target survived a request.
pub mod liveness;

/// Restarts the target after a crash.
pub mod recovery;

/// Contains the `CampaignArgs` and `CampaignBuilder` to start `upnpfuzz_core` from a CLI.
pub mod cli;

/// Crash records and their metadata
pub mod types;
