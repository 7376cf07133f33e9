use tombola_protocol::{
    evaluate, Card, Game, GameUpdate, ParticipantId, Room, ServerEvent, WinPattern,
};

use crate::feedback::Cue;
use crate::identity::ResolvedIdentity;

/// Everything a room view renders, merged from snapshots and push events.
/// `room.game` is always `None` here; the live game is held alongside so
/// there is exactly one copy of it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoomState {
    pub room: Option<Room>,
    pub game: Option<Game>,
    pub my_card: Option<Card>,
    pub is_host: bool,
    /// Decoration only: which pattern to highlight when this identity won.
    pub winning: Option<WinPattern>,
}

/// One input to the reducer: the authoritative snapshot or one push event.
#[derive(Debug, Clone)]
pub enum StateInput {
    Snapshot(Room),
    Event(ServerEvent),
}

/// Side effects a transition asks for. The reducer itself never performs
/// them; the room view does, after the state is committed.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Fetch a fresh snapshot.
    Reload,
    Cue(Cue),
    Notice(String),
}

#[derive(Debug, Clone)]
pub struct Step {
    pub state: RoomState,
    pub effects: Vec<Effect>,
}

impl Step {
    fn quiet(state: RoomState) -> Step {
        Step {
            state,
            effects: Vec::new(),
        }
    }
}

/// Pure transition function. Applying the same input twice yields the state
/// of applying it once, so re-delivered and reordered events self-correct.
pub fn reduce(state: &RoomState, input: &StateInput, identity: &ResolvedIdentity) -> Step {
    match input {
        StateInput::Snapshot(room) => apply_snapshot(state, room, identity),
        StateInput::Event(event) => match event {
            ServerEvent::GameStarted(update) => apply_game_started(state, update, identity),
            ServerEvent::CardAssigned(card) | ServerEvent::CardUpdated(card) => {
                apply_card(state, card, identity)
            }
            ServerEvent::NumberDrawn {
                number,
                drawn_numbers,
                winner,
                is_finished,
            } => apply_number_drawn(
                state,
                *number,
                drawn_numbers.as_deref(),
                winner.as_ref(),
                *is_finished,
                identity,
            ),
            ServerEvent::BingoWon {
                winner,
                winner_name,
            } => apply_bingo_won(state, winner.as_ref(), winner_name.as_deref(), identity),
            ServerEvent::BingoValidated { subject } => {
                let mut step = Step::quiet(state.clone());
                if subject == &identity.id {
                    step.effects.push(Effect::Cue(Cue::Win));
                }
                step
            }
            ServerEvent::BingoInvalid { subject } => {
                let mut step = Step::quiet(state.clone());
                if subject == &identity.id {
                    step.effects.push(Effect::Cue(Cue::Error));
                    step.effects
                        .push(Effect::Notice("Invalid bingo claim".to_string()));
                }
                step
            }
        },
    }
}

/// Replaces room and game wholesale, except where the snapshot is provably
/// older than what events already established: a finished game never
/// unfinishes and the drawn sequence never shrinks (it is append-only).
fn apply_snapshot(state: &RoomState, snapshot: &Room, identity: &ResolvedIdentity) -> Step {
    let mut room = snapshot.clone();
    let incoming = room.game.take();

    let game = match (state.game.as_ref(), incoming) {
        (Some(previous), Some(mut game)) => {
            if previous.is_finished && !game.is_finished {
                game.is_finished = true;
                if game.winner.is_none() {
                    game.winner = previous.winner.clone();
                }
            }
            if previous.drawn_numbers.len() > game.drawn_numbers.len() {
                game.drawn_numbers = previous.drawn_numbers.clone();
            }
            Some(game)
        }
        // A snapshot issued before the game started must not erase it.
        (Some(previous), None) => Some(previous.clone()),
        (None, incoming) => incoming,
    };

    let mut next = RoomState {
        is_host: room.host_id == identity.id,
        room: Some(room),
        game,
        my_card: None,
        winning: None,
    };

    next.my_card = next
        .game
        .as_ref()
        .and_then(|game| game.card_for(&identity.id).cloned())
        .map(|mut card| {
            card.normalize();
            if let Some(game) = &next.game {
                card.mark_all(&game.drawn_numbers);
            }
            card
        })
        .or_else(|| state.my_card.clone());

    refresh_decoration(&mut next, identity);
    Step::quiet(next)
}

/// Shallow-merges the partial game and asks for a snapshot reload, which
/// closes the race with the identity-scoped card assignment.
fn apply_game_started(state: &RoomState, update: &GameUpdate, identity: &ResolvedIdentity) -> Step {
    let mut next = state.clone();
    let game = next.game.get_or_insert_with(Game::default);
    game.merge(update.clone());
    if let Some(card) = &mut next.my_card {
        card.mark_all(&game.drawn_numbers);
    }
    refresh_decoration(&mut next, identity);
    Step {
        state: next,
        effects: vec![Effect::Reload],
    }
}

/// Wholesale card replacement; the server owns cell contents. Cells whose
/// numbers were already drawn are re-marked afterwards, covering draws that
/// overtook the assignment on the wire.
fn apply_card(state: &RoomState, card: &Card, identity: &ResolvedIdentity) -> Step {
    if card.owner_id != identity.id {
        return Step::quiet(state.clone());
    }
    let mut card = card.clone();
    card.normalize();
    if let Some(game) = &state.game {
        card.mark_all(&game.drawn_numbers);
    }
    let mut next = state.clone();
    next.my_card = Some(card);
    refresh_decoration(&mut next, identity);
    Step::quiet(next)
}

fn apply_number_drawn(
    state: &RoomState,
    number: u8,
    drawn_numbers: Option<&[u8]>,
    winner: Option<&ParticipantId>,
    is_finished: bool,
    identity: &ResolvedIdentity,
) -> Step {
    let mut next = state.clone();
    let game = next.game.get_or_insert_with(Game::default);

    // The payload carries the full sequence; adopting it tolerates missed
    // intermediate events. A shorter sequence is a stale replay, skip it.
    if let Some(sequence) = drawn_numbers {
        if sequence.len() >= game.drawn_numbers.len() {
            game.drawn_numbers = sequence.to_vec();
        }
    }
    if let Some(winner) = winner {
        game.winner = Some(winner.clone());
    }
    if is_finished || game.winner.is_some() {
        game.is_finished = true;
    }

    if let Some(card) = &mut next.my_card {
        card.mark_number(number);
    }

    refresh_decoration(&mut next, identity);
    Step {
        state: next,
        effects: vec![Effect::Cue(Cue::Draw)],
    }
}

fn apply_bingo_won(
    state: &RoomState,
    winner: Option<&ParticipantId>,
    winner_name: Option<&str>,
    identity: &ResolvedIdentity,
) -> Step {
    let mut next = state.clone();
    let game = next.game.get_or_insert_with(Game::default);
    if let Some(winner) = winner {
        game.winner = Some(winner.clone());
    }
    game.is_finished = true;

    let name = winner_name
        .map(str::to_string)
        .or_else(|| {
            let winner = game.winner.as_ref()?;
            game.owner_name_of(winner).map(str::to_string)
        })
        .unwrap_or_else(|| "Someone".to_string());

    refresh_decoration(&mut next, identity);
    Step {
        state: next,
        effects: vec![
            Effect::Cue(Cue::Win),
            Effect::Notice(format!("Bingo! {name} wins")),
        ],
    }
}

/// Recomputes the highlighted pattern from scratch. Only the confirmed
/// winner gets a decoration; the evaluation itself never writes winner or
/// finished state.
fn refresh_decoration(state: &mut RoomState, identity: &ResolvedIdentity) {
    state.winning = match (&state.room, &state.game, &state.my_card) {
        (Some(room), Some(game), Some(card))
            if game.is_finished && game.winner.as_ref() == Some(&identity.id) =>
        {
            evaluate(card, &room.rules)
        }
        _ => None,
    };
}
