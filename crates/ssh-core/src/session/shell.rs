use std::{
    io::{self, Read},
    sync::Arc,
    thread,
    time::Duration,
};

use crossterm::terminal::size as term_size;
use russh::{Channel, ChannelMsg, Disconnect, Pty, Sig, client::{self, Msg}};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::SharedSessionHandle;
use crate::{
    error::{RemoteExit, SshCoreError, SshResult},
    terminal::{DEFAULT_SIZE, RawModeGuard, RawTerminal, session_pty_modes, term_type_from_env},
};

/// Status a shell reports when the user leaves it with an interrupt (128 + SIGINT).
///
/// Interactive shells commonly exit with it when the operator hits Ctrl-C on
/// the way out; it counts as a clean exit.
pub const INTERRUPTED_EXIT_STATUS: u32 = 130;

#[derive(Clone, Debug)]
pub struct ShellOptions {
    /// Terminal type requested for the remote PTY.
    pub term: String,
    pub modes: Vec<(Pty, u32)>,
}

impl Default for ShellOptions {
    fn default() -> Self {
        Self {
            term: term_type_from_env(),
            modes: session_pty_modes(),
        }
    }
}

/// How the remote end reported termination.
#[derive(Clone, Debug)]
pub enum ExitReport {
    Status(u32),
    Signal(Sig),
}

/// Map the remote termination to the session result.
pub fn classify_exit(report: Option<ExitReport>) -> SshResult<()> {
    match report {
        Some(ExitReport::Status(0)) | Some(ExitReport::Status(INTERRUPTED_EXIT_STATUS)) => Ok(()),
        Some(ExitReport::Signal(Sig::INT)) => Ok(()),
        Some(ExitReport::Status(code)) => Err(SshCoreError::RemoteExit(RemoteExit::Status(code))),
        Some(ExitReport::Signal(sig)) => Err(SshCoreError::RemoteExit(RemoteExit::Signal(signal_label(&sig)))),
        None => Err(SshCoreError::RemoteExit(RemoteExit::Missing)),
    }
}

/// Run an interactive login shell wired to this process' standard streams.
///
/// The local terminal stays in raw mode for exactly the lifetime of this call.
/// Firing `cancel` disconnects the session, which ends the wait below.
pub async fn run_shell<H>(
    session: &SharedSessionHandle<H>,
    terminal: &dyn RawTerminal,
    options: ShellOptions,
    cancel: &CancellationToken,
) -> SshResult<()>
where
    H: client::Handler + Send + 'static,
{
    let start_input = |tx: UnboundedSender<InputEvent>| {
        spawn_input_thread(tx.clone());
        spawn_resize_thread(tx);
    };
    drive_shell(
        session,
        terminal,
        options,
        cancel,
        start_input,
        tokio::io::stdout(),
        tokio::io::stderr(),
    )
    .await
}

/// Run an interactive login shell using the provided streams.
///
/// Local window resizes are not tracked; the PTY keeps the size `terminal`
/// reported when the shell started.
pub async fn run_shell_with_io<H, R, O, E>(
    session: &SharedSessionHandle<H>,
    terminal: &dyn RawTerminal,
    options: ShellOptions,
    cancel: &CancellationToken,
    input: R,
    stdout: O,
    stderr: E,
) -> SshResult<()>
where
    H: client::Handler + Send + 'static,
    R: AsyncRead + Send + Unpin + 'static,
    O: AsyncWrite + Unpin,
    E: AsyncWrite + Unpin,
{
    let start_input = move |tx: UnboundedSender<InputEvent>| {
        tokio::spawn(pump_input(input, tx));
    };
    drive_shell(session, terminal, options, cancel, start_input, stdout, stderr).await
}

async fn drive_shell<H, O, E>(
    session: &SharedSessionHandle<H>,
    terminal: &dyn RawTerminal,
    options: ShellOptions,
    cancel: &CancellationToken,
    start_input: impl FnOnce(UnboundedSender<InputEvent>),
    mut stdout: O,
    mut stderr: E,
) -> SshResult<()>
where
    H: client::Handler + Send + 'static,
    O: AsyncWrite + Unpin,
    E: AsyncWrite + Unpin,
{
    let mut channel = session.channel_open_session().await?;
    let (cols, rows) = terminal.size().unwrap_or(DEFAULT_SIZE);

    let _raw_guard = RawModeGuard::activate(terminal)?;

    channel
        .request_pty(true, &options.term, cols as u32, rows as u32, 0, 0, &options.modes)
        .await?;
    channel.request_shell(true).await?;

    let finished = CancellationToken::new();
    let _watcher_stop = finished.clone().drop_guard();
    spawn_cancel_watcher(Arc::clone(session), cancel.clone(), finished);

    let (tx, rx) = unbounded_channel::<InputEvent>();
    start_input(tx);

    let relayed = relay(&mut channel, rx, &mut stdout, &mut stderr).await;

    if let Err(err) = channel.close().await {
        debug!(?err, "channel already closed");
    }

    match relayed {
        Ok(None) | Err(_) if cancel.is_cancelled() => Err(SshCoreError::Cancelled),
        Ok(exit) => classify_exit(exit),
        Err(err) => Err(err),
    }
}

/// Pump local input to the channel and channel output to the local streams
/// until the remote side closes.
async fn relay<O, E>(
    channel: &mut Channel<Msg>,
    mut rx: UnboundedReceiver<InputEvent>,
    stdout: &mut O,
    stderr: &mut E,
) -> SshResult<Option<ExitReport>>
where
    O: AsyncWrite + Unpin,
    E: AsyncWrite + Unpin,
{
    let mut input_open = true;
    let mut stdin_closed = false;
    let mut exit = None;

    loop {
        tokio::select! {
            maybe_event = rx.recv(), if input_open => {
                match maybe_event {
                    Some(InputEvent::Data(data)) => {
                        channel.data(&data[..]).await?;
                    }
                    Some(InputEvent::Resize(cols, rows)) => {
                        channel
                            .window_change(cols.max(1) as u32, rows.max(1) as u32, 0, 0)
                            .await?;
                    }
                    Some(InputEvent::Eof) => {
                        if !stdin_closed {
                            channel.eof().await?;
                            stdin_closed = true;
                        }
                    }
                    None => input_open = false,
                }
            }
            msg = channel.wait() => {
                match msg {
                    Some(ChannelMsg::Data { data }) => {
                        stdout.write_all(&data).await?;
                        stdout.flush().await?;
                    }
                    Some(ChannelMsg::ExtendedData { data, .. }) => {
                        stderr.write_all(&data).await?;
                        stderr.flush().await?;
                    }
                    Some(ChannelMsg::ExitStatus { exit_status }) => {
                        debug!(exit_status, "remote shell exited");
                        exit = Some(ExitReport::Status(exit_status));
                    }
                    Some(ChannelMsg::ExitSignal { signal_name, .. }) => {
                        debug!(signal = %signal_label(&signal_name), "remote shell killed by signal");
                        exit = Some(ExitReport::Signal(signal_name));
                    }
                    Some(ChannelMsg::Close) | None => break,
                    _ => {}
                }
            }
        }
    }

    Ok(exit)
}

fn spawn_cancel_watcher<H>(session: SharedSessionHandle<H>, cancel: CancellationToken, finished: CancellationToken)
where
    H: client::Handler + Send + 'static,
{
    tokio::spawn(async move {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("cancellation requested; closing SSH connection");
                if let Err(err) = session.disconnect(Disconnect::ByApplication, "session cancelled", "").await {
                    warn!(?err, "failed to disconnect cancelled session");
                }
            }
            _ = finished.cancelled() => {}
        }
    });
}

enum InputEvent {
    Data(Vec<u8>),
    Resize(u16, u16),
    Eof,
}

fn spawn_input_thread(tx: UnboundedSender<InputEvent>) {
    thread::spawn(move || {
        let stdin = io::stdin();
        let mut stdin = stdin.lock();
        let mut buf = [0u8; 1024];
        loop {
            match stdin.read(&mut buf) {
                Ok(0) => {
                    let _ = tx.send(InputEvent::Eof);
                    break;
                }
                Ok(n) => {
                    if tx.send(InputEvent::Data(buf[..n].to_vec())).is_err() {
                        break;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => {
                    let _ = tx.send(InputEvent::Eof);
                    break;
                }
            }
        }
    });
}

async fn pump_input<R>(mut reader: R, tx: UnboundedSender<InputEvent>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; 1024];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => {
                let _ = tx.send(InputEvent::Eof);
                break;
            }
            Ok(n) => {
                if tx.send(InputEvent::Data(buf[..n].to_vec())).is_err() {
                    break;
                }
            }
        }
    }
}

fn spawn_resize_thread(tx: UnboundedSender<InputEvent>) {
    thread::spawn(move || {
        let mut last_size = term_size().unwrap_or(DEFAULT_SIZE);
        loop {
            thread::sleep(Duration::from_millis(200));
            if let Ok(size) = term_size()
                && size != last_size
            {
                last_size = size;
                if tx.send(InputEvent::Resize(size.0, size.1)).is_err() {
                    break;
                }
            } else if tx.is_closed() {
                break;
            }
        }
    });
}

fn signal_label(sig: &Sig) -> String {
    match sig {
        Sig::Custom(name) => name.clone(),
        other => format!("{other:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_and_interrupted_exits_are_success() {
        assert!(classify_exit(Some(ExitReport::Status(0))).is_ok());
        assert!(classify_exit(Some(ExitReport::Status(INTERRUPTED_EXIT_STATUS))).is_ok());
        assert!(classify_exit(Some(ExitReport::Signal(Sig::INT))).is_ok());
    }

    #[test]
    fn other_terminations_are_session_errors() {
        let err = classify_exit(Some(ExitReport::Status(1))).unwrap_err();
        assert!(matches!(err, SshCoreError::RemoteExit(RemoteExit::Status(1))));

        let err = classify_exit(Some(ExitReport::Signal(Sig::KILL))).unwrap_err();
        assert_eq!(err.to_string(), "remote shell killed by signal KILL");

        let err = classify_exit(None).unwrap_err();
        assert!(matches!(err, SshCoreError::RemoteExit(RemoteExit::Missing)));
    }
}
