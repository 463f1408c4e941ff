pub mod error;
pub mod keys;
pub mod known_hosts;
pub mod logging;
pub mod session;
pub mod terminal;

pub use error::{RemoteExit, SshCoreError, SshResult};
