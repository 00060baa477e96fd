use std::{
    collections::HashMap,
    sync::{Arc, Mutex as StdMutex, RwLock},
    time::Duration,
};

use {
    async_trait::async_trait,
    relaybot_channels::{
        Backend, BackendBase, BackendFactory, BackendOptions, BackendState, Error,
        InboundSender, MessageEnvelope, Payload, Result, forward,
    },
    relaybot_routing::Target,
    tokio_util::sync::CancellationToken,
    tracing::{debug, error, info, trace, warn},
};

use crate::{
    api::MatrixClient,
    config::MatrixServerConfig,
    sync::RoomMessage,
};

/// Consecutive `/sync` failures tolerated before the read loop gives up.
const MAX_SYNC_FAILURES: u32 = 5;
const SYNC_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Constructor registered under [`crate::BACKEND_TYPE`].
pub fn factory() -> BackendFactory {
    Box::new(|name: &str, config: serde_json::Value, options: &BackendOptions| {
        let config = MatrixServerConfig::from_value(config)?;
        let backend = MatrixBackend::new(name, config, *options)?;
        Ok(Arc::new(backend) as Arc<dyn Backend>)
    })
}

/// One Matrix account relaying a set of rooms.
pub struct MatrixBackend {
    base: BackendBase,
    config: MatrixServerConfig,
    options: BackendOptions,
    http: reqwest::Client,
    client: RwLock<Option<Arc<MatrixClient>>>,
    /// Canonical room id → configured target, so events for rooms joined by
    /// alias resolve back to the alias target.
    rooms: StdMutex<HashMap<String, Target>>,
}

impl MatrixBackend {
    pub fn new(
        name: impl Into<String>,
        config: MatrixServerConfig,
        options: BackendOptions,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("relaybot/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::external("failed to build HTTP client", e))?;
        Ok(Self {
            base: BackendBase::new(name),
            config,
            options,
            http,
            client: RwLock::new(None),
            rooms: StdMutex::new(HashMap::new()),
        })
    }

    fn client(&self) -> Result<Arc<MatrixClient>> {
        self.client
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or(Error::NotConnected)
    }

    fn remember_room(&self, room_id: String, target: Target) {
        self.rooms
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(room_id, target);
    }

    fn resolve_room(&self, room_id: &str) -> Result<Target> {
        let known = self
            .rooms
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(room_id)
            .cloned();
        match known {
            Some(target) => Ok(target),
            None => self.base.target_for_room(room_id),
        }
    }

    /// Room id to send to for `target`: the id its alias was joined as, or
    /// the configured room itself.
    fn room_id_for(&self, target: &Target) -> String {
        self.rooms
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|(_, known)| *known == target)
            .map_or_else(|| target.room.clone(), |(room_id, _)| room_id.clone())
    }

    /// Turn one timeline message into an envelope, or drop it.
    async fn deliver(
        &self,
        client: &MatrixClient,
        msg: RoomMessage,
        inbound: &InboundSender,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if msg.sender == client.user_id() {
            trace!(backend = self.base.name(), event_id = %msg.event_id, "ignoring own message");
            return Ok(());
        }

        let source = match self.resolve_room(&msg.room_id) {
            Ok(target) => target,
            Err(e) => {
                error!(backend = self.base.name(), error = %e, "failed to resolve target for event");
                return Ok(());
            },
        };

        let display_name = match client.display_name(&msg.sender).await {
            Ok(name) => name.unwrap_or_else(|| msg.sender.clone()),
            Err(e) => {
                error!(
                    backend = self.base.name(),
                    user = %msg.sender,
                    error = %e,
                    "failed to fetch display name, dropping message"
                );
                return Ok(());
            },
        };

        if let Err(e) = client.mark_read(&msg.room_id, &msg.event_id).await {
            warn!(backend = self.base.name(), room = %msg.room_id, error = %e, "failed to send read receipt");
        }

        let text = if msg.msgtype == "m.emote" {
            format!("* {display_name} {}", msg.body)
        } else {
            msg.body
        };
        if self.options.debug {
            trace!(backend = self.base.name(), sender = %msg.sender, %display_name, event_id = %msg.event_id, "relaying matrix message");
        }

        let envelope = MessageEnvelope::inbound(source, Payload::new(display_name, text));
        forward(inbound, cancel, envelope).await
    }

    /// Long-poll `/sync` until cancelled or the homeserver keeps failing.
    async fn sync_loop(
        &self,
        client: &MatrixClient,
        cancel: &CancellationToken,
        inbound: &InboundSender,
    ) -> Result<()> {
        // Skip history: only events after this batch are relayed.
        let initial = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            sync = client.sync(None, Duration::ZERO) => sync.map_err(Error::read)?,
        };
        let mut since = initial.next_batch;
        let poll = Duration::from_secs(self.config.sync_timeout_secs);
        let mut failures = 0;

        loop {
            let sync = tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                sync = client.sync(Some(&since), poll) => sync,
            };

            match sync {
                Ok(batch) => {
                    failures = 0;
                    for msg in batch.messages() {
                        self.deliver(client, msg, inbound, cancel).await?;
                    }
                    since = batch.next_batch;
                },
                Err(e) => {
                    failures += 1;
                    if failures >= MAX_SYNC_FAILURES {
                        return Err(Error::read(format!("sync failed {failures} times: {e}")));
                    }
                    warn!(backend = self.base.name(), error = %e, failures, "sync failed, retrying");
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(Error::Cancelled),
                        () = tokio::time::sleep(SYNC_RETRY_DELAY) => {},
                    }
                },
            }
        }
    }

    async fn release(&self) {
        let client = self
            .client
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(client) = client {
            match client.logout().await {
                Ok(()) => info!(backend = self.base.name(), "matrix session closed"),
                Err(e) => warn!(backend = self.base.name(), error = %e, "matrix logout failed"),
            }
        }
    }
}

#[async_trait]
impl Backend for MatrixBackend {
    fn name(&self) -> &str {
        self.base.name()
    }

    async fn connect(&self) -> Result<()> {
        self.base.transition(BackendState::Connecting)?;
        info!(
            backend = self.base.name(),
            homeserver = %self.config.homeserver,
            user = %self.config.username,
            "connecting to matrix homeserver"
        );

        let client = match MatrixClient::login(
            self.http.clone(),
            &self.config.homeserver,
            &self.config.username,
            &self.config.password,
        )
        .await
        {
            Ok(client) => client,
            Err(e) => {
                let _ = self.base.transition(BackendState::Closed);
                return Err(Error::connect(e));
            },
        };

        if let Some(name) = &self.config.display_name
            && let Err(e) = client.set_display_name(name).await
        {
            warn!(backend = self.base.name(), error = %e, "failed to set display name");
        }

        info!(backend = self.base.name(), user_id = client.user_id(), "matrix connected");
        *self.client.write().unwrap_or_else(|e| e.into_inner()) = Some(Arc::new(client));
        self.base.transition(BackendState::Connected)?;
        Ok(())
    }

    async fn set_targets(&self, targets: Vec<Target>) -> Result<()> {
        self.base.set_targets(targets);
        let client = self.client()?;
        let joined = client
            .joined_rooms()
            .await
            .map_err(|e| Error::join("*", e))?;

        for target in self.base.targets() {
            if joined.contains(&target.room) {
                debug!(backend = self.base.name(), room = %target.room, "skipping join, already joined");
                self.remember_room(target.room.clone(), target);
                continue;
            }
            info!(backend = self.base.name(), room = %target.room, "joining room");
            let room_id = client
                .join_room(&target.room)
                .await
                .map_err(|e| Error::join(&target.room, e))?;
            self.remember_room(room_id, target);
        }

        self.base.transition(BackendState::Joined)?;
        Ok(())
    }

    async fn read(&self, cancel: CancellationToken, inbound: InboundSender) -> Result<()> {
        self.base.transition(BackendState::Reading)?;
        let client = self.client()?;

        let outcome = self.sync_loop(&client, &cancel, &inbound).await;
        if let Err(e) = &outcome
            && !e.is_cancelled()
        {
            warn!(backend = self.base.name(), error = %e, "matrix read loop stopped");
        }

        let _ = self.base.transition(BackendState::Draining);
        self.release().await;
        let _ = self.base.transition(BackendState::Closed);
        outcome
    }

    async fn write(&self, msg: &MessageEnvelope) -> Result<()> {
        let destination = msg
            .destination
            .as_ref()
            .ok_or_else(|| Error::write("", "message has no destination"))?;
        self.base.ensure_live()?;
        let client = self.client()?;
        let room_id = self.room_id_for(destination);
        let text = msg.render();
        debug!(backend = self.base.name(), room = %destination.room, %room_id, "sending matrix message");
        client
            .send_text(&room_id, &text)
            .await
            .map(drop)
            .map_err(|e| Error::write(&destination.room, e))
    }

    async fn disconnect(&self) -> Result<()> {
        self.release().await;
        self.base.transition(BackendState::Closed)?;
        Ok(())
    }
}
