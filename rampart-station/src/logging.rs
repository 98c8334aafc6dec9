//! Tracing subscriber setup: compact format with an uptime timer,
//! filter from `RUST_LOG` with an `info` default.

use tracing_subscriber::{
    fmt::{format, time},
    prelude::*,
    EnvFilter,
};

pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let event_format = format().with_timer(time::uptime()).compact();
    let fmt_layer = tracing_subscriber::fmt::layer().event_format(event_format);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(filter)
        .init();
}
