//! Local control socket: one command line per connection, reply lines, then close.
//!
//! ```text
//! confirm            start a session for the login currently available
//! list               one line per live session
//! pause <session>
//! resume <session>
//! close <session>
//! ```
//! Session lines read `<id> <status> <name>`, plus ` error=<reason>` for failed starts.

use std::io;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use nearauth_core::{Authenticator, Session, SessionId, SessionStatus};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};

/// Commands are short; a client gets this long and this many bytes to send one.
const COMMAND_READ_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_COMMAND_LEN: u64 = 256;

/// Owner-only: anyone who can connect can start sessions.
const SOCKET_MODE: u32 = 0o600;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Confirm,
    List,
    Pause(SessionId),
    Resume(SessionId),
    Close(SessionId),
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("empty command")]
    Empty,
    #[error("unknown command {0:?}")]
    Unknown(String),
    #[error("{0} needs a session id")]
    MissingSession(&'static str),
    #[error("bad session id {0:?}")]
    BadSession(String),
    #[error("unexpected argument {0:?}")]
    TrailingArgument(String),
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let verb = words.next().ok_or(CommandError::Empty)?;
        let command = match verb {
            "confirm" => Command::Confirm,
            "list" => Command::List,
            "pause" => Command::Pause(session_arg("pause", words.next())?),
            "resume" => Command::Resume(session_arg("resume", words.next())?),
            "close" => Command::Close(session_arg("close", words.next())?),
            other => return Err(CommandError::Unknown(other.to_string())),
        };
        match words.next() {
            Some(extra) => Err(CommandError::TrailingArgument(extra.to_string())),
            None => Ok(command),
        }
    }
}

fn session_arg(verb: &'static str, word: Option<&str>) -> Result<SessionId, CommandError> {
    let word = word.ok_or(CommandError::MissingSession(verb))?;
    word.parse()
        .map_err(|_| CommandError::BadSession(word.to_string()))
}

/// Run one command and render the reply. Failures are replies too (`error: ...`).
pub async fn execute(command: Command, authenticator: &Authenticator) -> String {
    let registry = authenticator.registry();
    let result = match command {
        Command::Confirm => authenticator
            .confirm_available()
            .await
            .map_err(|e| e.to_string()),
        Command::List => {
            return registry
                .all_sessions()
                .iter()
                .map(|s| describe(s) + "\n")
                .collect();
        }
        Command::Pause(id) => registry.pause_session(id).map_err(|e| e.to_string()),
        Command::Resume(id) => registry.resume_session(id).map_err(|e| e.to_string()),
        Command::Close(id) => registry.close_session(id).map_err(|e| e.to_string()),
    };
    match result {
        Ok(session) => format!("ok {}\n", describe(&session)),
        Err(e) => format!("error: {e}\n"),
    }
}

fn describe(session: &Session) -> String {
    let status = match session.status {
        SessionStatus::Active => "active",
        SessionStatus::Paused => "paused",
        SessionStatus::Closed => "closed",
        SessionStatus::Error => "error",
    };
    let mut line = format!("{} {} {}", session.id, status, session.pairing.name);
    if let Some(reason) = &session.error {
        line.push_str(" error=");
        line.push_str(reason);
    }
    line
}

/// Bind the control socket, replacing a stale one left by an earlier run.
pub fn bind(path: &Path) -> anyhow::Result<UnixListener> {
    if let Ok(meta) = std::fs::symlink_metadata(path) {
        use std::os::unix::fs::FileTypeExt;
        if !meta.file_type().is_socket() {
            anyhow::bail!("{} exists and is not a socket", path.display());
        }
        std::fs::remove_file(path).with_context(|| format!("removing stale socket {}", path.display()))?;
    }
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }
    let listener = UnixListener::bind(path).with_context(|| format!("binding control socket {}", path.display()))?;
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(SOCKET_MODE))
            .with_context(|| format!("setting permissions on {}", path.display()))?;
    }
    Ok(listener)
}

pub async fn serve(listener: UnixListener, authenticator: Arc<Authenticator>) -> io::Result<()> {
    loop {
        let (stream, _) = listener.accept().await?;
        let authenticator = authenticator.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, &authenticator).await {
                tracing::debug!(error = %e, "control connection failed");
            }
        });
    }
}

async fn handle_connection(stream: UnixStream, authenticator: &Authenticator) -> io::Result<()> {
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read.take(MAX_COMMAND_LEN)).lines();
    let line = match tokio::time::timeout(COMMAND_READ_TIMEOUT, lines.next_line()).await {
        Ok(line) => line?,
        Err(_) => return Ok(()),
    };
    let Some(line) = line else {
        return Ok(());
    };
    let reply = match line.parse::<Command>() {
        Ok(command) => {
            tracing::debug!(?command, "control command");
            execute(command, authenticator).await
        }
        Err(e) => format!("error: {e}\n"),
    };
    write.write_all(reply.as_bytes()).await?;
    write.shutdown().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    use async_trait::async_trait;
    use nearauth_core::wire::encode_frame;
    use nearauth_core::{
        AuthGrant, BoxedConnection, ChannelError, ChannelFactory, Config, Handshake, HandshakeError, LogNotifier,
        MemoryPairingStore, OfferPayload, Pairing, ProxyChannel, ReauthOutcome, ServiceCommitment,
    };
    use tokio::io::DuplexStream;

    /// Grants every start and renews every thirty seconds.
    struct AcceptingHandshake;

    #[async_trait]
    impl Handshake for AcceptingHandshake {
        async fn perform(&self, _: &ProxyChannel, _: &Pairing) -> Result<AuthGrant, HandshakeError> {
            Ok(AuthGrant { token: None })
        }

        async fn reauthenticate(&self, _: &ProxyChannel, _: &Session) -> Result<ReauthOutcome, HandshakeError> {
            Ok(ReauthOutcome::Continue {
                next_interval: Duration::from_secs(30),
                token: None,
            })
        }
    }

    /// In-memory channels; the service ends are kept open and never spoken to.
    #[derive(Default)]
    struct PipeFactory {
        peers: std::sync::Mutex<Vec<DuplexStream>>,
    }

    #[async_trait]
    impl ChannelFactory for PipeFactory {
        async fn open(&self, _: &Pairing) -> Result<BoxedConnection, ChannelError> {
            let (near, far) = tokio::io::duplex(1024);
            self.peers.lock().unwrap().push(far);
            Ok(Box::new(near))
        }

        fn kind(&self) -> &'static str {
            "pipe"
        }
    }

    fn authenticator() -> Arc<Authenticator> {
        let store: MemoryPairingStore = [Pairing::new(ServiceCommitment::from_bytes(b"desk".to_vec()), "Desk")]
            .into_iter()
            .collect();
        Arc::new(Authenticator::new(
            &Config::default(),
            Arc::new(store),
            Arc::new(AcceptingHandshake),
            Arc::new(PipeFactory::default()),
            Arc::new(LogNotifier),
        ))
    }

    fn socket_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("nearauth-{}-{name}.sock", std::process::id()))
    }

    async fn send(path: &Path, line: &str) -> String {
        let mut stream = UnixStream::connect(path).await.unwrap();
        stream.write_all(format!("{line}\n").as_bytes()).await.unwrap();
        let mut reply = String::new();
        stream.read_to_string(&mut reply).await.unwrap();
        reply
    }

    async fn offer_desk(auth: &Authenticator) {
        let payload = OfferPayload::authentication(ServiceCommitment::from_bytes(b"desk".to_vec()))
            .to_bytes()
            .unwrap();
        auth.on_offer_bytes(&encode_frame(&payload).unwrap()).await;
    }

    #[test]
    fn parses_commands() {
        let id = SessionId::new();
        assert_eq!("confirm".parse::<Command>(), Ok(Command::Confirm));
        assert_eq!("  list \n".parse::<Command>(), Ok(Command::List));
        assert_eq!(format!("pause {id}").parse::<Command>(), Ok(Command::Pause(id)));
        assert_eq!(format!("resume {id}").parse::<Command>(), Ok(Command::Resume(id)));
        assert_eq!(format!("close {id}").parse::<Command>(), Ok(Command::Close(id)));
        assert_eq!("".parse::<Command>(), Err(CommandError::Empty));
        assert_eq!("unlock".parse::<Command>(), Err(CommandError::Unknown("unlock".into())));
        assert_eq!("pause".parse::<Command>(), Err(CommandError::MissingSession("pause")));
        assert_eq!("close 42".parse::<Command>(), Err(CommandError::BadSession("42".into())));
        assert_eq!(
            "list everything".parse::<Command>(),
            Err(CommandError::TrailingArgument("everything".into()))
        );
    }

    #[tokio::test]
    async fn confirm_without_offer_is_an_error_reply() {
        let auth = authenticator();
        assert_eq!(execute(Command::Confirm, &auth).await, "error: no login available\n");
        assert_eq!(execute(Command::List, &auth).await, "");
    }

    #[tokio::test]
    async fn drives_session_lifecycle_over_socket() {
        let auth = authenticator();
        let path = socket_path("lifecycle");
        let listener = bind(&path).unwrap();
        tokio::spawn(serve(listener, auth.clone()));

        offer_desk(&auth).await;
        let reply = send(&path, "confirm").await;
        assert!(reply.starts_with("ok "), "{reply}");
        assert!(reply.trim_end().ends_with("active Desk"), "{reply}");
        let id = reply.split_whitespace().nth(1).unwrap().to_string();

        assert!(send(&path, &format!("pause {id}")).await.contains(" paused Desk"));
        assert_eq!(send(&path, "list").await, format!("{id} paused Desk\n"));
        assert!(send(&path, &format!("resume {id}")).await.contains(" active Desk"));
        assert!(send(&path, &format!("close {id}")).await.contains(" closed Desk"));
        assert_eq!(send(&path, "list").await, "");
        assert!(send(&path, &format!("close {id}")).await.starts_with("error: "));
        assert!(send(&path, "reboot").await.starts_with("error: unknown command"));

        std::fs::remove_file(&path).unwrap();
    }

    #[tokio::test]
    async fn bind_replaces_stale_socket_but_not_other_files() {
        let path = socket_path("stale");
        drop(bind(&path).unwrap());
        let listener = bind(&path).unwrap();
        drop(listener);
        std::fs::remove_file(&path).unwrap();

        let file = socket_path("plain");
        std::fs::write(&file, b"not a socket").unwrap();
        assert!(bind(&file).is_err());
        std::fs::remove_file(&file).unwrap();
    }
}
