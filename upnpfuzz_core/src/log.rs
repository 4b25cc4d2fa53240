use tracing::level_filters::LevelFilter;
use tracing_subscriber::Layer;
use tracing_subscriber::Registry;
use tracing_subscriber::filter::Filtered;
use tracing_subscriber::layer::Layered;
use tracing_subscriber::prelude::__tracing_subscriber_SubscriberExt;
use tracing_subscriber::reload;
use tracing_subscriber::util::SubscriberInitExt;
use tui_logger::TuiTracingSubscriberLayer;

type TuiLayer = Filtered<TuiTracingSubscriberLayer, LevelFilter, Registry>;
type BaseSubscriber = Layered<reload::Layer<TuiLayer, Registry>, Registry>;
type FmtLayer = Filtered<tracing_subscriber::fmt::Layer<BaseSubscriber>, LevelFilter, BaseSubscriber>;

/// Routes the logs either to stdout or, while the TUI is shown, into the TUI log widget
#[derive(Clone)]
pub struct Logger {
    level_filter: LevelFilter,
    tui_reload_handle: reload::Handle<TuiLayer, Registry>,
    fmt_reload_handle: reload::Handle<FmtLayer, BaseSubscriber>,
}

impl Logger {
    /// Initializes the global subscriber. `verbose` enables the debug logs which include
    /// every request sent to the target.
    /// # Errors
    /// Fails if a global subscriber was already installed.
    pub fn try_init(verbose: bool) -> Result<Self, String> {
        let level_filter = if verbose {
            LevelFilter::DEBUG
        } else {
            LevelFilter::INFO
        };

        let fmt_logger = tracing_subscriber::fmt::Layer::new()
            .with_target(false)
            .with_filter(level_filter);
        let (fmt_logger, fmt_reload_handle) = reload::Layer::new(fmt_logger);

        let tui_logger = TuiTracingSubscriberLayer.with_filter(LevelFilter::OFF);
        let (tui_logger, tui_reload_handle) = reload::Layer::new(tui_logger);

        tracing_subscriber::registry()
            .with(tui_logger)
            .with(fmt_logger)
            .try_init()
            .map_err(|err| err.to_string())?;

        tui_logger::init_logger(tui_logger::LevelFilter::max()).map_err(|err| err.to_string())?;

        Ok(Self {
            level_filter,
            tui_reload_handle,
            fmt_reload_handle,
        })
    }

    pub(crate) fn enable_tui(&self) {
        let _ = self
            .fmt_reload_handle
            .modify(|layer| *layer.filter_mut() = LevelFilter::OFF);
        let _ = self
            .tui_reload_handle
            .modify(|layer| *layer.filter_mut() = self.level_filter);
    }

    pub(crate) fn disable_tui(&self) {
        let _ = self
            .fmt_reload_handle
            .modify(|layer| *layer.filter_mut() = self.level_filter);
        let _ = self
            .tui_reload_handle
            .modify(|layer| *layer.filter_mut() = LevelFilter::OFF);
    }
}
