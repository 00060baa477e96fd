//! In-memory backend for exercising the supervisor.

use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
    time::Duration,
};

use {
    async_trait::async_trait,
    relaybot_channels::{
        Backend, BackendBase, BackendState, Error, InboundSender, MessageEnvelope, Payload,
        Result,
    },
    relaybot_routing::Target,
    tokio_util::sync::CancellationToken,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    Connect,
    SetTargets(Vec<Target>),
    Read,
    ReadReturned,
    Write(MessageEnvelope),
    Disconnect,
}

#[derive(Default)]
struct Script {
    fail_connect: bool,
    fail_join: bool,
    hang_connect: bool,
    failing_rooms: HashSet<String>,
    inbound: Vec<MessageEnvelope>,
    read_error: Option<String>,
    flood_room: Option<String>,
}

pub(crate) struct MockBackend {
    base: BackendBase,
    script: Script,
    calls: Mutex<Vec<Call>>,
}

impl MockBackend {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            base: BackendBase::new(name),
            script: Script::default(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn failing_connect(mut self) -> Self {
        self.script.fail_connect = true;
        self
    }

    pub(crate) fn hanging_connect(mut self) -> Self {
        self.script.hang_connect = true;
        self
    }

    pub(crate) fn failing_join(mut self) -> Self {
        self.script.fail_join = true;
        self
    }

    pub(crate) fn failing_write_to(mut self, room: &str) -> Self {
        self.script.failing_rooms.insert(room.to_string());
        self
    }

    /// Push a message from `sender` in `room` as soon as `read` starts.
    pub(crate) fn says(mut self, room: &str, sender: &str, text: &str) -> Self {
        let source = Target::new(self.base.name(), room);
        self.script
            .inbound
            .push(MessageEnvelope::inbound(source, Payload::new(sender, text)));
        self
    }

    /// Fail the read loop once the routing task has taken every scripted
    /// message off the queue.
    pub(crate) fn failing_read(mut self, reason: &str) -> Self {
        self.script.read_error = Some(reason.to_string());
        self
    }

    /// Push messages into `room` without pause and without watching the
    /// cancel token, until the queue is closed under the read loop.
    pub(crate) fn flooding(mut self, room: &str) -> Self {
        self.script.flood_room = Some(room.to_string());
        self
    }

    pub(crate) fn build(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn writes(&self) -> Vec<MessageEnvelope> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Write(msg) => Some(msg),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn has_call(&self, wanted: &Call) -> bool {
        self.calls().contains(wanted)
    }

    /// Wait until at least `count` write attempts were recorded.
    pub(crate) async fn wait_for_writes(&self, count: usize) -> Vec<MessageEnvelope> {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let writes = self.writes();
                if writes.len() >= count {
                    return writes;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap()
    }

    pub(crate) async fn wait_for_call(&self, wanted: &Call) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !self.has_call(wanted) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    async fn flood(&self, room: &str, inbound: &InboundSender) -> Result<()> {
        let source = Target::new(self.base.name(), room);
        for seq in 0u64.. {
            let msg = MessageEnvelope::inbound(source.clone(), Payload::new("flood", seq.to_string()));
            inbound
                .send(msg)
                .await
                .map_err(|_| Error::read("queue closed"))?;
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        Ok(())
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl Backend for MockBackend {
    fn name(&self) -> &str {
        self.base.name()
    }

    async fn connect(&self) -> Result<()> {
        self.record(Call::Connect);
        self.base.transition(BackendState::Connecting)?;
        if self.script.hang_connect {
            std::future::pending::<()>().await;
        }
        if self.script.fail_connect {
            self.base.transition(BackendState::Closed)?;
            return Err(Error::connect("handshake refused"));
        }
        self.base.transition(BackendState::Connected)?;
        Ok(())
    }

    async fn set_targets(&self, targets: Vec<Target>) -> Result<()> {
        self.record(Call::SetTargets(targets.clone()));
        if self.script.fail_join {
            return Err(Error::join("#locked", "banned"));
        }
        self.base.set_targets(targets);
        self.base.transition(BackendState::Joined)?;
        Ok(())
    }

    async fn read(&self, cancel: CancellationToken, inbound: InboundSender) -> Result<()> {
        self.record(Call::Read);
        self.base.transition(BackendState::Reading)?;
        for msg in &self.script.inbound {
            inbound
                .send(msg.clone())
                .await
                .map_err(|_| Error::read("queue closed"))?;
        }

        let outcome = match (&self.script.flood_room, &self.script.read_error) {
            (Some(room), _) => self.flood(room, &inbound).await,
            (None, Some(reason)) => {
                while inbound.capacity() < inbound.max_capacity() {
                    tokio::time::sleep(Duration::from_millis(1)).await;
                }
                Err(Error::read(reason))
            },
            (None, None) => {
                cancel.cancelled().await;
                Err(Error::Cancelled)
            },
        };
        self.base.transition(BackendState::Closed)?;
        self.record(Call::ReadReturned);
        outcome
    }

    async fn write(&self, msg: &MessageEnvelope) -> Result<()> {
        self.record(Call::Write(msg.clone()));
        match &msg.destination {
            Some(dest) if self.script.failing_rooms.contains(&dest.room) => {
                Err(Error::write(&dest.room, "delivery rejected"))
            },
            Some(_) => Ok(()),
            None => Err(Error::write("", "no destination")),
        }
    }

    async fn disconnect(&self) -> Result<()> {
        self.record(Call::Disconnect);
        self.base.transition(BackendState::Closed)?;
        Ok(())
    }
}
