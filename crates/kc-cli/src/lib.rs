pub mod node_cli;

use tracing_subscriber::{fmt, layer::SubscriberExt, reload, util::SubscriberInitExt};

/// Install the stderr subscriber. Standard output belongs to the remote shell.
pub fn init_tracing(debug: bool) {
    let (filter, handle) = reload::Layer::new(ssh_core::logging::env_filter(debug));
    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .try_init();
    if installed.is_ok() {
        ssh_core::logging::set_reload_handle(handle);
    }
}
