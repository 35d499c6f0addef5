//! Tracing bootstrap for the smoke binary.

use std::env;

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_DIRECTIVES: &str = "info,chat_sdk=debug,chat_smoke=debug";

/// Filter variables, most specific first. `RUST_LOG` always wins.
const FILTER_KEYS: [&str; 3] = ["RUST_LOG", "CHAT_SMOKE_LOG", "CHAT_LOG"];

/// Install the global subscriber. Safe to call more than once.
pub fn init() {
    let directives = directives_from(|key| env::var(key).ok());
    let filter =
        EnvFilter::try_new(directives).unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_target(true)
                .with_thread_ids(true),
        )
        .try_init();
}

/// First non-blank filter variable that parses, else the built-in directives.
fn directives_from<F>(mut lookup: F) -> String
where
    F: FnMut(&str) -> Option<String>,
{
    FILTER_KEYS
        .iter()
        .filter_map(|key| lookup(key))
        .map(|value| value.trim().to_owned())
        .find(|value| !value.is_empty() && EnvFilter::try_new(value).is_ok())
        .unwrap_or_else(|| DEFAULT_DIRECTIVES.to_owned())
}
