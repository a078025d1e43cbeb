#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod file;
mod format;

use anyhow::{Context, Result};
use tracing::{Subscriber, subscriber::DefaultGuard};
use tracing_log::LogTracer;
use tracing_subscriber::{
    EnvFilter, Layer, Registry, filter::ParseError, fmt, layer::SubscriberExt as _,
    util::SubscriberInitExt as _,
};

pub use format::Format;

/// Registers a global subscriber with stdout logging and `additional_layer`.
pub fn setup_global_subscriber<L>(directives: String, additional_layer: L) -> Result<()>
where
    L: Layer<Registry> + Send + Sync,
{
    let filter1 = try_filter(&directives).context("Failed to parse directives")?;
    let filter2 = try_filter(&directives).context("Failed to parse directives")?;

    let subscriber = Registry::default()
        .with(additional_layer.with_filter(filter1))
        .with(
            fmt::layer()
                .event_format(Format::new())
                .with_filter(filter2),
        );
    init(subscriber)?;

    Ok(())
}

pub fn init(subscriber: impl Subscriber + Send + Sync + 'static) -> Result<()> {
    tracing::subscriber::set_global_default(subscriber).context("Could not set global default")?;
    LogTracer::init().context("Failed to init LogTracer")?;

    Ok(())
}

/// Constructs an opinionated [`EnvFilter`] with some crates already silenced.
pub fn try_filter(directives: &str) -> Result<EnvFilter, ParseError> {
    /// A filter directive that silences noisy crates.
    ///
    /// By prepending this directive to the active log filter, a simple directive like
    /// `debug` actually produces useful logs.
    /// If necessary, you can still activate logs from these crates by restating them in
    /// your directive with a lower filter, i.e. `netlink_proto=debug`.
    const IRRELEVANT_CRATES: &str = "netlink_proto=warn,rustls=warn";

    if directives.is_empty() {
        EnvFilter::try_new(IRRELEVANT_CRATES)
    } else {
        EnvFilter::try_new(format!("{IRRELEVANT_CRATES},{directives}"))
    }
}

/// Initialises a logger to be used in tests.
pub fn test(directives: &str) -> DefaultGuard {
    tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(directives)
        .set_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_directives_are_valid() {
        try_filter("").unwrap();
    }

    #[test]
    fn user_directives_extend_the_default_filter() {
        try_filter("tunnel=trace,info").unwrap();
    }

    #[test]
    fn garbage_directives_are_rejected() {
        assert!(try_filter("this is not a directive").is_err());
    }
}
