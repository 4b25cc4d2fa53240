use clap::{Args, Parser, Subcommand};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use upnpfuzz_common::adapter::esp::EspAdapter;
use upnpfuzz_common::adapter::soap::{self, ActionFilter, SoapAdapter};
use upnpfuzz_common::adapter::ssdp::SsdpAdapter;
use upnpfuzz_common::discovery::Discovery;
use upnpfuzz_common::healthcheck::http::HttpHealthcheck;
use upnpfuzz_common::mutator::command::CommandMutator;
use upnpfuzz_common::resethandler::command::CommandResetHandler;
use upnpfuzz_common::resethandler::wait::WaitResetHandler;
use upnpfuzz_common::transport::tcp::TcpTransport;
use upnpfuzz_common::transport::udp::UdpTransport;
use upnpfuzz_core::cli::{CampaignArgs, CampaignBuilder, parse_seconds};
use upnpfuzz_core::config::CampaignConfig;
use upnpfuzz_core::error::UpnpFuzzError;
use upnpfuzz_core::log::Logger;
use upnpfuzz_core::liveness::LivenessVerdict;
use upnpfuzz_core::output::CrashRecorder;
use upnpfuzz_core::request::ProtocolKind;
use upnpfuzz_core::traits::{ProtocolAdapter, ResetHandler, Transport};
use upnpfuzz_core::triage::replay::CrashReplay;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
/// The Universal Plug and Play (UPnP) fuzzer
struct Cli {
    /// Show debug logs including every request
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Find UPnP devices in the local network
    Discover {
        /// Seconds to wait for answers
        #[arg(long, value_parser = parse_seconds, default_value = "5")]
        network_timeout: Duration,
        /// Local address the search is sent from
        #[arg(long)]
        interface_ip: Option<Ipv4Addr>,
    },
    /// List the SOAP actions of a device
    List {
        /// Url of the device description
        #[arg(long)]
        soap: String,
        /// Which actions to list
        #[arg(long, default_value = "all")]
        soap_type: ActionFilter,
        /// Seconds a single request may take
        #[arg(long, value_parser = parse_seconds, default_value = "5")]
        network_timeout: Duration,
    },
    /// Fuzz a device
    Fuzz(FuzzArgs),
    /// Send a recorded crash once more
    Replay {
        /// Sidecar json of the crash
        #[arg(long)]
        crash: PathBuf,
        /// URL polled with GET to decide whether the target is alive
        #[arg(long)]
        alive_url: Option<String>,
        /// Seconds a single network operation may take
        #[arg(long, value_parser = parse_seconds, default_value = "5")]
        network_timeout: Duration,
    },
}

#[derive(Args, Debug, Clone)]
#[group(id = "target", required = true, multiple = false)]
struct TargetArgs {
    /// SSDP listener as HOST:PORT
    #[arg(long)]
    ssdp: Option<String>,
    /// Device description url, fuzzes the SOAP actions
    #[arg(long)]
    soap: Option<String>,
    /// Device description url, fuzzes every event subscription url
    #[arg(long)]
    esp: Option<String>,
    /// Single event subscription url
    #[arg(long)]
    esp_event: Option<String>,
}

#[derive(Args, Debug, Clone)]
struct FuzzArgs {
    #[command(flatten)]
    target: TargetArgs,
    #[command(flatten)]
    campaign: CampaignArgs,
    /// Which SOAP actions are fuzzed
    #[arg(long, default_value = "all")]
    soap_type: ActionFilter,
    /// Callback url sent with the subscriptions
    #[arg(long, default_value = "http://127.0.0.1:8000/callback")]
    esp_callback: String,
    /// Local address the SSDP requests are sent from
    #[arg(long)]
    interface_ip: Option<Ipv4Addr>,
}

/// Restart strategy picked from the command line
enum Restart {
    Command(CommandResetHandler),
    Wait(WaitResetHandler),
}

impl ResetHandler for Restart {
    async fn reset(&mut self) -> Result<(), UpnpFuzzError> {
        match self {
            Restart::Command(handler) => handler.reset().await,
            Restart::Wait(handler) => handler.reset().await,
        }
    }
}

async fn resolve(address: &str) -> Result<SocketAddr, UpnpFuzzError> {
    let mut addrs = tokio::net::lookup_host(address)
        .await
        .map_err(|err| UpnpFuzzError::Configuration {
            err_msg: format!("ssdp target {address}: {err}"),
        })?;
    addrs
        .find(SocketAddr::is_ipv4)
        .ok_or_else(|| UpnpFuzzError::Configuration {
            err_msg: format!("ssdp target {address} has no IPv4 address"),
        })
}

async fn campaign<A: ProtocolAdapter>(
    adapter: A,
    config: CampaignConfig,
    hide_ui: bool,
    logger: Option<Logger>,
    cancel: CancellationToken,
) -> Result<(), UpnpFuzzError> {
    let settings = config.settings();
    let healthcheck = match &settings.alive_url {
        Some(url) => Some(HttpHealthcheck::new(url, settings.network_timeout)?),
        None => None,
    };
    let restart = match &settings.restart_cmd {
        Some(cmd) => Restart::Command(CommandResetHandler::new(cmd)),
        None => Restart::Wait(WaitResetHandler),
    };
    let mutator = config.mutator_path().map(CommandMutator::new);

    tracing::info!("Fuzzing {}", adapter.title());
    let summary = CampaignBuilder::new(adapter, restart)
        .healthcheck(healthcheck)
        .external(mutator)
        .start(config, !hide_ui, logger, cancel)
        .await?;

    let end = if summary.stopped { "stopped" } else { "finished" };
    println!(
        "Campaign {end} after {} iterations, {} crashes recorded",
        summary.iterations, summary.crashes
    );
    Ok(())
}

async fn fuzz(args: FuzzArgs, logger: Option<Logger>, cancel: CancellationToken) -> Result<(), UpnpFuzzError> {
    let hide_ui = args.campaign.hide_ui;
    let settings = args.campaign.into_settings();
    let config = CampaignConfig::try_from(settings)?;
    let timeout = config.settings().network_timeout;

    let target = args.target;
    if let Some(address) = target.ssdp {
        let adapter = SsdpAdapter::new(resolve(&address).await?, timeout, args.interface_ip);
        campaign(adapter, config, hide_ui, logger, cancel).await
    } else if let Some(url) = target.soap {
        let adapter = SoapAdapter::from_description(&url, timeout, args.soap_type).await?;
        tracing::info!("{} actions selected", adapter.actions().len());
        campaign(adapter, config, hide_ui, logger, cancel).await
    } else if let Some(url) = target.esp {
        let adapter = EspAdapter::from_description(&url, timeout, args.esp_callback).await?;
        campaign(adapter, config, hide_ui, logger, cancel).await
    } else if let Some(url) = target.esp_event {
        let adapter = EspAdapter::new(&url, timeout, args.esp_callback)?;
        campaign(adapter, config, hide_ui, logger, cancel).await
    } else {
        Err(UpnpFuzzError::Configuration {
            err_msg: "no target given".into(),
        })
    }
}

async fn discover(timeout: Duration, interface: Option<Ipv4Addr>) -> Result<(), UpnpFuzzError> {
    let mut discovery = Discovery::start(timeout, interface).await?;
    let mut found = 0;
    while let Some(device) = discovery.next().await {
        found += 1;
        println!(
            "{:<22} {} {}",
            device.address,
            device.location,
            device.server.as_deref().unwrap_or("-")
        );
    }
    println!("{found} devices found");
    Ok(())
}

async fn list(url: &str, filter: ActionFilter, timeout: Duration) -> Result<(), UpnpFuzzError> {
    for action in soap::load_actions(url, timeout, filter).await? {
        print!("{action}");
    }
    Ok(())
}

async fn replay_with<T: Transport>(
    transport: T,
    healthcheck: Option<HttpHealthcheck>,
    sidecar: &std::path::Path,
) -> Result<LivenessVerdict, UpnpFuzzError> {
    CrashReplay::new(transport, healthcheck).replay_file(sidecar).await
}

async fn replay(sidecar: PathBuf, alive_url: Option<String>, timeout: Duration) -> Result<(), UpnpFuzzError> {
    let metadata = CrashRecorder::load_sidecar(&sidecar)?;
    let healthcheck = match &alive_url {
        Some(url) => Some(HttpHealthcheck::new(url, timeout)?),
        None => None,
    };
    let address = &metadata.target.address;
    let verdict = match metadata.protocol {
        ProtocolKind::Ssdp => {
            let transport = UdpTransport::new(resolve(address).await?, None, timeout);
            replay_with(transport, healthcheck, &sidecar).await?
        }
        ProtocolKind::Soap | ProtocolKind::Esp => {
            let transport = TcpTransport::new(address.clone(), timeout);
            replay_with(transport, healthcheck, &sidecar).await?
        }
    };
    tracing::debug!("Replay verdict: {verdict}");
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let logger = match Logger::try_init(cli.verbose) {
        Ok(logger) => Some(logger),
        Err(err) => {
            eprintln!("Could not initialize the logger: {err}");
            None
        }
    };

    let cancel = CancellationToken::new();
    let stop = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Stopping the campaign");
            stop.cancel();
        }
    });

    let result = match cli.command {
        Command::Discover {
            network_timeout,
            interface_ip,
        } => discover(network_timeout, interface_ip).await,
        Command::List {
            soap,
            soap_type,
            network_timeout,
        } => list(&soap, soap_type, network_timeout).await,
        Command::Fuzz(args) => fuzz(args, logger, cancel).await,
        Command::Replay {
            crash,
            alive_url,
            network_timeout,
        } => replay(crash, alive_url, network_timeout).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(UpnpFuzzError::Fatal {
            last_completed,
            source,
        }) => {
            tracing::error!("Campaign halted: {source}");
            eprintln!("Campaign halted after iteration {last_completed}: {source}");
            ExitCode::FAILURE
        }
        Err(err) => {
            eprintln!("{err}");
            ExitCode::FAILURE
        }
    }
}
