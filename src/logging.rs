use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Filter used when `RUST_LOG` is unset.
fn default_directives(verbose: bool) -> &'static str {
    if verbose { "warn,psxdisc=debug" } else { "warn" }
}

/// Install the stderr log layer.  Warnings are always shown; `verbose`
/// adds the library's debug messages.  `RUST_LOG` overrides both.
pub fn init(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(verbose)));

    let terminal_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .without_time()
        .with_target(false)
        .with_filter(filter);

    // A second init (tests driving several tools in one process) is harmless.
    let _ = tracing_subscriber::registry().with(terminal_layer).try_init();
}
