use thiserror::Error;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{info, warn};

use tombola_protocol::{DrawNumberResponse, Game, Room, RoomCode, ServerEvent, StartGameResponse};

use crate::api::{ApiClient, ApiError};
use crate::feedback::FeedbackScheduler;
use crate::identity::{AuthenticatedUser, IdentityStore, ResolvedIdentity};
use crate::reducer::{reduce, Effect, RoomState, StateInput};
use crate::subscription::Subscriptions;
use crate::transport::Transport;

const NOTICE_CHANNEL_CAPACITY: usize = 32;

#[derive(Debug, Error)]
pub enum ViewError {
    #[error("identity store: {0}")]
    Identity(#[from] std::io::Error),
    #[error(transparent)]
    Api(#[from] ApiError),
}

/// One mounted room: resolved identity, live subscriptions, and a single
/// event loop that serializes every state transition. Dropping the view
/// stops the subscriptions before anything else is torn down.
pub struct RoomView {
    code: RoomCode,
    identity: ResolvedIdentity,
    api: ApiClient,
    subscriptions: Subscriptions,
    state_rx: watch::Receiver<RoomState>,
    notices: broadcast::Sender<String>,
    snapshot_tx: mpsc::UnboundedSender<Room>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl RoomView {
    /// Resolves the identity, loads the initial snapshot (a `NotFound` here
    /// is the caller's cue to run the join flow), announces presence, and
    /// starts consuming push events.
    pub async fn open(
        api: ApiClient,
        transport: Transport,
        store: &IdentityStore,
        code: RoomCode,
        authenticated: Option<&AuthenticatedUser>,
        feedback: FeedbackScheduler,
    ) -> Result<RoomView, ViewError> {
        let identity = store.resolve(&code, authenticated)?;
        let room = api.fetch_room(&code).await?;

        let initial = reduce(
            &RoomState::default(),
            &StateInput::Snapshot(room),
            &identity,
        )
        .state;
        let (state_tx, state_rx) = watch::channel(initial.clone());
        let (notices, _) = broadcast::channel(NOTICE_CHANNEL_CAPACITY);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = mpsc::unbounded_channel();

        let mut subscriptions = Subscriptions::new(transport, event_tx);
        subscriptions.start(&code, &identity.id);

        let task = tokio::spawn(run(Loop {
            state: initial,
            code: code.clone(),
            identity: identity.clone(),
            api: api.clone(),
            feedback,
            state_tx,
            notices: notices.clone(),
            event_rx,
            snapshot_rx,
            snapshot_tx: snapshot_tx.clone(),
        }));

        info!(room = %code, identity = %identity.id, "room view opened");
        Ok(RoomView {
            code,
            identity,
            api,
            subscriptions,
            state_rx,
            notices,
            snapshot_tx,
            task: Some(task),
        })
    }

    pub fn code(&self) -> &RoomCode {
        &self.code
    }

    pub fn identity(&self) -> &ResolvedIdentity {
        &self.identity
    }

    pub fn state(&self) -> RoomState {
        self.state_rx.borrow().clone()
    }

    /// Watch feed of state transitions, for rendering.
    pub fn watch(&self) -> watch::Receiver<RoomState> {
        self.state_rx.clone()
    }

    /// User-facing notices (win announcements, rejected claims, failures).
    pub fn notices(&self) -> broadcast::Receiver<String> {
        self.notices.subscribe()
    }

    /// Host command. The server answers with the assigned cards and also
    /// broadcasts `game-started`; the fresh snapshot keeps both in step.
    pub async fn start_game(&self) -> Result<Game, ApiError> {
        let response: StartGameResponse = self.api.start_game(&self.code, &self.identity.id).await?;
        self.request_reload();
        Ok(response.game)
    }

    /// Host command: reveal the next number. State flows back through the
    /// room-wide `number-drawn` event.
    pub async fn draw_number(&self) -> Result<DrawNumberResponse, ApiError> {
        self.api.draw_number(&self.code, &self.identity.id).await
    }

    /// Submits a bingo claim for the held card. The verdict comes back via
    /// `bingo-validated` / `bingo-invalid`; repeated claims are forwarded
    /// as-is.
    pub async fn claim_bingo(&self) -> Result<(), ApiError> {
        let card_id = self
            .state_rx
            .borrow()
            .my_card
            .as_ref()
            .map(|card| card.id.clone())
            .ok_or_else(|| ApiError::Validation("no card to claim with".to_string()))?;
        self.api
            .claim_bingo(&self.code, &card_id, &self.identity.id)
            .await
    }

    /// Queues a snapshot refresh without blocking event delivery.
    pub fn request_reload(&self) {
        spawn_reload(
            self.api.clone(),
            self.code.clone(),
            self.snapshot_tx.clone(),
        );
    }

    /// Releases every subscription synchronously, then the event loop. Safe
    /// to call more than once; `Drop` falls back to it.
    pub fn close(&mut self) {
        self.subscriptions.stop();
        if let Some(task) = self.task.take() {
            task.abort();
            info!(room = %self.code, "room view closed");
        }
    }
}

impl Drop for RoomView {
    fn drop(&mut self) {
        self.close();
    }
}

struct Loop {
    state: RoomState,
    code: RoomCode,
    identity: ResolvedIdentity,
    api: ApiClient,
    feedback: FeedbackScheduler,
    state_tx: watch::Sender<RoomState>,
    notices: broadcast::Sender<String>,
    event_rx: mpsc::UnboundedReceiver<ServerEvent>,
    snapshot_rx: mpsc::UnboundedReceiver<Room>,
    snapshot_tx: mpsc::UnboundedSender<Room>,
}

/// Serializes all inputs into the reducer; effects run only after the new
/// state is committed.
async fn run(mut ctx: Loop) {
    loop {
        let input = tokio::select! {
            event = ctx.event_rx.recv() => match event {
                Some(event) => StateInput::Event(event),
                None => break,
            },
            snapshot = ctx.snapshot_rx.recv() => match snapshot {
                Some(room) => StateInput::Snapshot(room),
                None => break,
            },
        };
        apply(&mut ctx, input);
    }
}

fn apply(ctx: &mut Loop, input: StateInput) {
    let step = reduce(&ctx.state, &input, &ctx.identity);
    if step.state != ctx.state {
        ctx.state = step.state.clone();
        let _ = ctx.state_tx.send(step.state);
    }
    for effect in step.effects {
        match effect {
            Effect::Reload => spawn_reload(
                ctx.api.clone(),
                ctx.code.clone(),
                ctx.snapshot_tx.clone(),
            ),
            Effect::Cue(cue) => ctx.feedback.play(cue),
            Effect::Notice(message) => {
                info!(room = %ctx.code, %message);
                let _ = ctx.notices.send(message);
            }
        }
    }
}

/// Fetches a snapshot in the background and feeds it back as an input.
/// Failures are logged; the next event or reload restores freshness.
fn spawn_reload(api: ApiClient, code: RoomCode, snapshot_tx: mpsc::UnboundedSender<Room>) {
    tokio::spawn(async move {
        match api.fetch_room(&code).await {
            Ok(room) => {
                let _ = snapshot_tx.send(room);
            }
            Err(err) => warn!(room = %code, %err, "snapshot reload failed"),
        }
    });
}
