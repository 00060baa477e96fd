use std::{
    collections::HashSet,
    sync::{Arc, Mutex as StdMutex},
};

use {
    async_trait::async_trait,
    relaybot_channels::{
        Backend, BackendBase, BackendFactory, BackendOptions, BackendState, Error,
        InboundSender, MessageEnvelope, Payload, Result, forward,
    },
    relaybot_routing::Target,
    tokio::sync::Mutex,
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use crate::{
    config::IrcServerConfig,
    connection::Connection,
    message::{IrcMessage, privmsg_lines, privmsg_text},
};

const QUIT_MESSAGE: &str = "relaybot shutting down";

/// Constructor registered under [`crate::BACKEND_TYPE`].
pub fn factory() -> BackendFactory {
    Box::new(|name: &str, config: serde_json::Value, options: &BackendOptions| {
        let config = IrcServerConfig::from_value(config)?;
        Ok(Arc::new(IrcBackend::new(name, config, *options)) as Arc<dyn Backend>)
    })
}

/// One IRC network connection relaying a set of channels.
pub struct IrcBackend {
    base: BackendBase,
    config: IrcServerConfig,
    options: BackendOptions,
    session: Mutex<Option<Connection>>,
    /// Lowercased channel names a `JOIN` was sent for.
    joined: StdMutex<HashSet<String>>,
}

impl IrcBackend {
    pub fn new(name: impl Into<String>, config: IrcServerConfig, options: BackendOptions) -> Self {
        Self {
            base: BackendBase::new(name),
            config,
            options,
            session: Mutex::new(None),
            joined: StdMutex::new(HashSet::new()),
        }
    }

    fn resolve_room(&self, room: &str) -> Result<Target> {
        self.base.target_for_room(room).or_else(|err| {
            self.base
                .targets()
                .into_iter()
                .find(|t| t.room.eq_ignore_ascii_case(room))
                .ok_or(err)
        })
    }

    async fn deliver(
        &self,
        msg: IrcMessage,
        inbound: &InboundSender,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let (Some(nick), Some(room), Some(text)) = (msg.nick(), msg.param(0), msg.trailing())
        else {
            return Ok(());
        };
        let Some(text) = privmsg_text(nick, text) else {
            debug!(backend = self.base.name(), nick, "ignoring CTCP request");
            return Ok(());
        };

        let source = match self.resolve_room(room) {
            Ok(target) => target,
            Err(e) => {
                debug!(backend = self.base.name(), room, error = %e, "dropping message");
                return Ok(());
            },
        };

        let envelope = MessageEnvelope::inbound(source, Payload::new(nick, text));
        forward(inbound, cancel, envelope).await
    }

    async fn close_session(&self) {
        if let Some(mut conn) = self.session.lock().await.take() {
            conn.close(QUIT_MESSAGE).await;
            info!(backend = self.base.name(), "IRC session closed");
        }
    }
}

#[async_trait]
impl Backend for IrcBackend {
    fn name(&self) -> &str {
        self.base.name()
    }

    async fn connect(&self) -> Result<()> {
        self.base.transition(BackendState::Connecting)?;
        match Connection::open(&self.config, self.options.debug).await {
            Ok(conn) => {
                info!(backend = self.base.name(), nick = conn.nick(), "IRC connected");
                *self.session.lock().await = Some(conn);
                self.base.transition(BackendState::Connected)?;
                Ok(())
            },
            Err(e) => {
                let _ = self.base.transition(BackendState::Closed);
                Err(e)
            },
        }
    }

    async fn set_targets(&self, targets: Vec<Target>) -> Result<()> {
        self.base.set_targets(targets);
        let session = self.session.lock().await;
        let conn = session.as_ref().ok_or(Error::NotConnected)?;

        for target in self.base.targets() {
            let fresh = self
                .joined
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .insert(target.room.to_ascii_lowercase());
            if !fresh {
                continue;
            }
            conn.send(format!("JOIN {}", target.room))
                .map_err(|e| Error::join(&target.room, e))?;
            info!(backend = self.base.name(), room = %target.room, "joining channel");
        }

        self.base.transition(BackendState::Joined)?;
        Ok(())
    }

    async fn read(&self, cancel: CancellationToken, inbound: InboundSender) -> Result<()> {
        self.base.transition(BackendState::Reading)?;
        let mut events = self
            .session
            .lock()
            .await
            .as_mut()
            .ok_or(Error::NotConnected)?
            .take_events()
            .ok_or_else(|| Error::read("IRC events already taken"))?;

        let outcome = loop {
            tokio::select! {
                _ = cancel.cancelled() => break Err(Error::Cancelled),
                event = events.recv() => match event {
                    Some(msg) => {
                        if let Err(e) = self.deliver(msg, &inbound, &cancel).await {
                            break Err(e);
                        }
                    },
                    None => break Err(Error::read("IRC connection closed")),
                },
            }
        };

        if let Err(e) = &outcome
            && !e.is_cancelled()
        {
            warn!(backend = self.base.name(), error = %e, "IRC read loop stopped");
        }
        let _ = self.base.transition(BackendState::Draining);
        self.close_session().await;
        let _ = self.base.transition(BackendState::Closed);
        outcome
    }

    async fn write(&self, msg: &MessageEnvelope) -> Result<()> {
        let destination = msg
            .destination
            .as_ref()
            .ok_or_else(|| Error::write("", "message has no destination"))?;
        self.base.ensure_live()?;
        let session = self.session.lock().await;
        let conn = session.as_ref().ok_or(Error::NotConnected)?;
        for line in privmsg_lines(&destination.room, &msg.render()) {
            conn.send(line)
                .map_err(|e| Error::write(&destination.room, e))?;
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.close_session().await;
        self.base.transition(BackendState::Closed)?;
        Ok(())
    }
}
