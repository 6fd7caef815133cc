//! The workshop event loop.
//!
//! One loop per workshop owns the state machine and the shared state; it is
//! their only mutator. Relay frames, hardware callbacks, timer expiries and
//! generation results all arrive as [`RuntimeEvent`]s on a single channel, and
//! the effects each dispatch returns are executed here in order.
//!
//! ```text
//! relay ─┐
//! bench ─┼─▶ mpsc ─▶ WorkshopRuntime ─▶ StateMachine::dispatch ─▶ effects
//! timer ─┤                                                         │
//! gen   ─┘◀──────────── spawned tasks ◀────────────────────────────┘
//! ```

use std::sync::Arc;
use std::time::Instant;

use serde_json::{Map, Value};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use rift_domain::{
    is_reset_request, keys, Dispatch, Effect, GenerationRequest, Outcome, Role, SharedGameState,
    StateMachine, Workshop, WorkshopEvent,
};
use rift_shared::BroadcastMessage;

use super::events::{EventSender, RuntimeEvent, EVENT_CHANNEL_BUFFER};
use super::timers::TimerSet;
use crate::ports::{BroadcastPort, GenerationPort};

/// Artwork currently driving the shared animation.
#[derive(Debug, Clone, PartialEq)]
pub struct Showcase {
    pub role: Role,
    pub image: Option<Vec<u8>>,
}

pub struct WorkshopRuntime<W: Workshop> {
    device_id: String,
    machine: StateMachine<W>,
    state: SharedGameState,
    broadcast: Arc<dyn BroadcastPort>,
    generation: Arc<dyn GenerationPort>,
    timers: TimerSet,
    events_tx: mpsc::Sender<RuntimeEvent>,
    events_rx: mpsc::Receiver<RuntimeEvent>,
    phase_tx: watch::Sender<W::Phase>,
    status_tx: watch::Sender<Option<String>>,
    showcase_tx: watch::Sender<Option<Showcase>>,
    started: bool,
}

impl<W> WorkshopRuntime<W>
where
    W: Workshop,
    W::Phase: Send + Sync + 'static,
{
    pub fn new(
        device_id: impl Into<String>,
        workshop: W,
        broadcast: Arc<dyn BroadcastPort>,
        generation: Arc<dyn GenerationPort>,
    ) -> Self {
        let machine = StateMachine::new(workshop);
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_BUFFER);
        let (phase_tx, _) = watch::channel(machine.phase());
        let (status_tx, _) = watch::channel(None);
        let (showcase_tx, _) = watch::channel(None);
        Self {
            device_id: device_id.into(),
            machine,
            state: SharedGameState::new(),
            broadcast,
            generation,
            timers: TimerSet::new(),
            events_tx,
            events_rx,
            phase_tx,
            status_tx,
            showcase_tx,
            started: false,
        }
    }

    pub fn sender(&self) -> EventSender {
        EventSender::new(self.events_tx.clone())
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn machine(&self) -> &StateMachine<W> {
        &self.machine
    }

    pub fn shared_state(&self) -> &SharedGameState {
        &self.state
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<W::Phase> {
        self.phase_tx.subscribe()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<Option<String>> {
        self.status_tx.subscribe()
    }

    pub fn subscribe_showcase(&self) -> watch::Receiver<Option<Showcase>> {
        self.showcase_tx.subscribe()
    }

    /// Process events until `shutdown` fires. Pending timers are aborted on exit.
    pub async fn run(&mut self, shutdown: CancellationToken) {
        self.start().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                event = self.events_rx.recv() => match event {
                    Some(event) => self.handle(event).await,
                    None => break,
                },
            }
        }

        self.timers.cancel_all();
        tracing::info!(
            device_id = %self.device_id,
            workshop = self.machine.workshop().name(),
            phase = %self.machine.phase(),
            "Workshop runtime stopped"
        );
    }

    /// Enter the initial phase. Idempotent.
    pub async fn start(&mut self) {
        if self.started {
            return;
        }
        self.started = true;
        tracing::info!(
            device_id = %self.device_id,
            workshop = self.machine.workshop().name(),
            phase = %self.machine.phase(),
            "Workshop starting"
        );
        let dispatch = self.machine.start(&self.state, Instant::now());
        self.finish(dispatch, "start").await;
    }

    pub async fn handle(&mut self, event: RuntimeEvent) {
        match event {
            RuntimeEvent::Inbound(message) => self.handle_inbound(message).await,
            RuntimeEvent::Workshop(WorkshopEvent::Reset) => {
                tracing::info!(device_id = %self.device_id, "Operator reset, resetting every device");
                self.state.clear();
                self.send_reset_request().await;
                self.dispatch(WorkshopEvent::Reset).await;
            }
            RuntimeEvent::Workshop(event) => self.dispatch(event).await,
        }
    }

    async fn handle_inbound(&mut self, message: BroadcastMessage) {
        if message.is_from(&self.device_id) {
            tracing::trace!(device_id = %self.device_id, "Ignoring own echo");
            return;
        }
        let sender = message.device_id.clone();
        let update = message.into_fields();

        if is_reset_request(&update) {
            tracing::info!(from = %sender, "Reset requested by peer");
            self.state.clear();
            self.dispatch(WorkshopEvent::Reset).await;
            return;
        }

        self.state.merge(&update);
        tracing::debug!(from = %sender, fields = update.len(), "Merged peer state");
        self.dispatch(WorkshopEvent::StateUpdate(update)).await;
    }

    async fn dispatch(&mut self, event: WorkshopEvent) {
        let kind = event.kind();
        let dispatch = self.machine.dispatch(&event, &self.state, Instant::now());
        self.finish(dispatch, kind).await;
    }

    async fn finish(&mut self, dispatch: Dispatch<W::Phase>, kind: &'static str) {
        let workshop = self.machine.workshop().name();
        match &dispatch.outcome {
            Outcome::Handled => {}
            Outcome::Stale => tracing::debug!(workshop, event = kind, "Dropped stale timer"),
            Outcome::Frozen => {
                tracing::debug!(workshop, event = kind, phase = %dispatch.to, "Machine frozen, event dropped")
            }
            Outcome::Failed(e) => tracing::error!(
                workshop,
                event = kind,
                phase = %dispatch.to,
                error = %e,
                "Workshop handler failed, frozen until reset"
            ),
        }
        if dispatch.changed_phase() {
            tracing::info!(
                workshop,
                from = %dispatch.from,
                to = %dispatch.to,
                event = kind,
                "Phase changed"
            );
        }

        for effect in dispatch.effects {
            self.execute(effect).await;
        }
        self.phase_tx.send_replace(self.machine.phase());
    }

    async fn execute(&mut self, effect: Effect) {
        match effect {
            Effect::Publish(update) => {
                let full = self.state.merge(&update);
                self.publish(full).await;
            }
            Effect::StartTimer { timer, after } => {
                tracing::debug!(timer = timer.name, after_ms = after.as_millis() as u64, "Timer started");
                self.timers.start(timer, after, self.events_tx.clone());
            }
            Effect::CancelTimers => self.timers.cancel_all(),
            Effect::Generate(request) => self.spawn_generation(request),
            Effect::Showcase { role, image } => {
                tracing::info!(
                    role = %role,
                    bytes = image.as_ref().map_or(0, Vec::len),
                    "Showcasing artwork"
                );
                self.showcase_tx.send_replace(Some(Showcase { role, image }));
            }
            Effect::Status(message) => {
                tracing::info!(workshop = self.machine.workshop().name(), "{message}");
                self.status_tx.send_replace(Some(message));
            }
        }
    }

    async fn publish(&self, fields: Map<String, Value>) {
        let message = BroadcastMessage::new(self.device_id.clone(), fields);
        self.broadcast.publish(message).await;
    }

    /// A bare `reset_system` frame. Peers clear their state on it and never echo it back.
    async fn send_reset_request(&self) {
        let mut fields = Map::new();
        fields.insert(keys::RESET_SYSTEM.to_string(), Value::Bool(true));
        self.publish(fields).await;
    }

    /// Run the pipeline off the loop; the result comes back as an event.
    fn spawn_generation(&self, request: GenerationRequest) {
        let generation = Arc::clone(&self.generation);
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let GenerationRequest {
                role,
                image,
                prompt,
                epoch,
            } = request;

            let image = match generation.generate(&image, &prompt).await {
                Ok(generated) => {
                    tracing::debug!(role = %role, elapsed_ms = generated.elapsed.as_millis() as u64, "Generated artwork");
                    match generation.remove_background(&generated.bytes).await {
                        Ok(cutout) => Some(cutout.bytes),
                        Err(e) => {
                            tracing::warn!(role = %role, error = %e, "Background removal failed, using raw artwork");
                            Some(generated.bytes)
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(role = %role, error = %e, "Generation failed, skipping frame");
                    None
                }
            };

            let finished = WorkshopEvent::GenerationFinished { role, epoch, image };
            if events.send(RuntimeEvent::Workshop(finished)).await.is_err() {
                tracing::debug!("Generation finished after the runtime stopped");
            }
        });
    }

    #[cfg(test)]
    async fn next_event(&mut self) -> Option<RuntimeEvent> {
        tokio::time::timeout(std::time::Duration::from_secs(2), self.events_rx.recv())
            .await
            .ok()
            .flatten()
    }
}
