use std::sync::Arc;

use russh::{
    Disconnect,
    client::{self, Handle},
};
use tracing::debug;

mod shell;

pub use shell::{ExitReport, INTERRUPTED_EXIT_STATUS, ShellOptions, classify_exit, run_shell, run_shell_with_io};

pub type SessionHandle<H> = Handle<H>;
pub type SharedSessionHandle<H> = Arc<Handle<H>>;

pub async fn disconnect<H>(session: &SharedSessionHandle<H>)
where
    H: client::Handler + Send,
{
    if let Err(err) = session.disconnect(Disconnect::ByApplication, "", "").await {
        debug!(?err, "disconnect after session end");
    }
}
