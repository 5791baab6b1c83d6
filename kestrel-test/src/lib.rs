//! Shared test infrastructure: one-time tracing/error-report setup and
//! wire-format fixtures.

pub mod vectors;

use std::sync::Once;

use tracing_error::ErrorLayer;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static INIT: Once = Once::new();

/// Initialize global test state: a tracing subscriber honoring `RUST_LOG`
/// and color-eyre panic/error hooks.
///
/// Call at the top of every test; repeated calls are no-ops, so tests never
/// race on global installation.
pub fn init() {
    INIT.call_once(|| {
        let fmt_layer = fmt::layer().with_target(false);
        let filter_layer = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new("warn"))
            .expect("hard-coded fallback filter parses");

        tracing_subscriber::registry()
            .with(filter_layer)
            .with(fmt_layer)
            .with(ErrorLayer::default())
            .init();

        color_eyre::install().expect("color_eyre installs once");
    })
}
