//! Socket ownership for one IRC session.
//!
//! [`Connection::open`] dials, registers and waits for the `001` welcome. A
//! spawned driver task then owns the framed stream: it writes queued lines,
//! answers `PING`, and forwards `PRIVMSG`s until shutdown or disconnect.

use std::time::Duration;

use {
    futures::{SinkExt, StreamExt},
    relaybot_channels::{Error, Result},
    secrecy::ExposeSecret,
    tokio::{
        io::{AsyncRead, AsyncWrite},
        net::TcpStream,
        sync::{mpsc, oneshot},
        task::JoinHandle,
        time::timeout,
    },
    tokio_util::{codec::Framed, sync::CancellationToken},
    tracing::{debug, info, trace, warn},
};

use crate::{codec::IrcCodec, config::IrcServerConfig, message::IrcMessage, tls};

const REGISTRATION_TIMEOUT: Duration = Duration::from_secs(60);
const QUIT_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// Any bidirectional byte stream the session can run over.
pub trait IrcStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> IrcStream for T {}

type Transport = Framed<Box<dyn IrcStream>, IrcCodec>;

/// Handle to a registered session. Dropping it does not stop the driver;
/// call [`Connection::close`].
#[derive(Debug)]
pub struct Connection {
    nick: String,
    outgoing: mpsc::UnboundedSender<String>,
    events: Option<mpsc::UnboundedReceiver<IrcMessage>>,
    shutdown: CancellationToken,
    driver: Option<JoinHandle<()>>,
}

impl Connection {
    /// Dial the configured server and complete registration.
    pub async fn open(config: &IrcServerConfig, debug: bool) -> Result<Self> {
        let (host, port) = config.address()?;
        info!(host = %host, port, tls = config.use_tls, "connecting to IRC server");

        let tcp = TcpStream::connect((host.as_str(), port))
            .await
            .map_err(|e| Error::connect(format!("{host}:{port}: {e}")))?;

        let stream: Box<dyn IrcStream> = if config.use_tls {
            let tls_config = tls::client_config(config.skip_tls_verify)?;
            Box::new(tls::connect(tls_config, &host, tcp).await?)
        } else {
            Box::new(tcp)
        };

        Self::register(stream, config, debug).await
    }

    /// Register over an already-open stream.
    pub async fn register(
        stream: Box<dyn IrcStream>,
        config: &IrcServerConfig,
        debug: bool,
    ) -> Result<Self> {
        let mut transport = Framed::new(stream, IrcCodec::new());

        let mut greeting = Vec::with_capacity(3);
        if let Some(password) = &config.password {
            greeting.push(format!("PASS {}", password.expose_secret()));
        }
        greeting.push(format!("NICK {}", config.nick));
        greeting.push(format!(
            "USER {} 0 * :{}",
            config.username(),
            config.realname()
        ));
        for line in greeting {
            transport
                .send(line)
                .await
                .map_err(|e| Error::connect(format!("registration write failed: {e}")))?;
        }

        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();
        let (events_tx, events) = mpsc::unbounded_channel();
        let (welcome_tx, welcome_rx) = oneshot::channel();
        let shutdown = CancellationToken::new();

        let driver = Driver {
            transport,
            nick: config.nick.clone(),
            debug,
            outgoing: outgoing_rx,
            events: events_tx,
            welcome: Some(welcome_tx),
            shutdown: shutdown.clone(),
        };
        let handle = tokio::spawn(driver.run());

        let welcomed = match timeout(REGISTRATION_TIMEOUT, welcome_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::connect("connection closed during registration")),
            Err(_) => Err(Error::connect("timed out waiting for welcome")),
        };
        if let Err(e) = welcomed {
            shutdown.cancel();
            let _ = handle.await;
            return Err(e);
        }

        debug!(nick = %config.nick, "IRC registration complete");
        Ok(Self {
            nick: config.nick.clone(),
            outgoing,
            events: Some(events),
            shutdown,
            driver: Some(handle),
        })
    }

    pub fn nick(&self) -> &str {
        &self.nick
    }

    /// Queue a raw protocol line.
    pub fn send(&self, line: String) -> Result<()> {
        self.outgoing
            .send(line)
            .map_err(|_| Error::read("IRC connection is closed"))
    }

    /// Take the inbound `PRIVMSG` stream. Only one reader may hold it.
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<IrcMessage>> {
        self.events.take()
    }

    /// Send `QUIT`, stop the driver and wait for it to flush.
    pub async fn close(&mut self, reason: &str) {
        let _ = self.outgoing.send(format!("QUIT :{reason}"));
        self.shutdown.cancel();
        if let Some(handle) = self.driver.take()
            && timeout(QUIT_FLUSH_TIMEOUT, handle).await.is_err()
        {
            warn!("IRC driver did not stop in time");
        }
    }
}

struct Driver {
    transport: Transport,
    nick: String,
    debug: bool,
    outgoing: mpsc::UnboundedReceiver<String>,
    events: mpsc::UnboundedSender<IrcMessage>,
    welcome: Option<oneshot::Sender<Result<()>>>,
    shutdown: CancellationToken,
}

impl Driver {
    async fn run(mut self) {
        let outcome = self.pump().await;
        if let Err(e) = &outcome {
            warn!(error = %e, "IRC connection ended");
        }
        if let Some(welcome) = self.welcome.take() {
            let _ = welcome.send(Err(outcome
                .err()
                .unwrap_or_else(|| Error::connect("registration aborted"))));
        }
    }

    async fn pump(&mut self) -> Result<()> {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    self.flush_pending().await;
                    return Ok(());
                }
                line = self.outgoing.recv() => match line {
                    Some(line) => self.write(line).await?,
                    None => return Ok(()),
                },
                frame = self.transport.next() => match frame {
                    Some(Ok(line)) => self.handle_line(&line).await?,
                    Some(Err(e)) => return Err(Error::read(e)),
                    None => return Err(Error::read("server closed the connection")),
                },
            }
        }
    }

    async fn write(&mut self, line: String) -> Result<()> {
        if self.debug {
            trace!(line = %redact(&line), "irc >>");
        }
        self.transport.send(line).await.map_err(Error::read)
    }

    async fn flush_pending(&mut self) {
        while let Ok(line) = self.outgoing.try_recv() {
            if self.write(line).await.is_err() {
                break;
            }
        }
    }

    async fn handle_line(&mut self, line: &str) -> Result<()> {
        if self.debug {
            trace!(line, "irc <<");
        }
        let Some(msg) = IrcMessage::parse(line) else {
            debug!(line, "ignoring unparsable IRC line");
            return Ok(());
        };

        match msg.command.as_str() {
            "PING" => {
                let token = msg.trailing().unwrap_or_default();
                self.write(format!("PONG :{token}")).await?;
            },
            "001" => {
                if let Some(nick) = msg.param(0) {
                    self.nick = nick.to_string();
                }
                if let Some(welcome) = self.welcome.take() {
                    let _ = welcome.send(Ok(()));
                }
            },
            "433" if self.welcome.is_some() => {
                return Err(Error::connect(format!(
                    "nickname {} is already in use",
                    self.nick
                )));
            },
            "ERROR" => {
                let reason = msg.trailing().unwrap_or("server sent ERROR");
                return Err(if self.welcome.is_some() {
                    Error::connect(reason)
                } else {
                    Error::read(reason)
                });
            },
            "PRIVMSG" => {
                if msg.nick().is_some_and(|n| n.eq_ignore_ascii_case(&self.nick)) {
                    return Ok(());
                }
                let _ = self.events.send(msg);
            },
            _ => {},
        }
        Ok(())
    }
}

fn redact(line: &str) -> &str {
    if line.starts_with("PASS ") {
        "PASS [REDACTED]"
    } else {
        line
    }
}
