//! End-to-end reducer scenarios: event replay, reordering, and stale
//! snapshots, driven exactly as the room view drives them.

use tombola_protocol::{
    evaluate, Card, CardCell, Game, GameUpdate, ParticipantId, Room, RoomCode, ServerEvent,
    WinPattern, WinRule, FREE_COL, FREE_ROW, GRID_SIZE,
};

use crate::feedback::Cue;
use crate::identity::ResolvedIdentity;
use crate::reducer::{reduce, Effect, RoomState, StateInput};

fn me() -> ResolvedIdentity {
    ResolvedIdentity {
        id: ParticipantId::from("visitor-1"),
        display_name: "Ana".to_string(),
        is_authenticated: false,
    }
}

/// A card whose first row is 5, 12, 34, 48, 61; the rest is filled with
/// distinct numbers in the 70s and 80s.
fn my_card() -> Card {
    let mut grid = [[0u8; GRID_SIZE]; GRID_SIZE];
    grid[0] = [5, 12, 34, 48, 61];
    let mut next = 70u8;
    for row in grid.iter_mut().skip(1) {
        for cell in row.iter_mut() {
            *cell = next;
            next += 1;
        }
    }
    Card::from_grid("card-1", ParticipantId::from("visitor-1"), "Ana", grid).unwrap()
}

fn room(rules: Vec<WinRule>, game: Option<Game>) -> Room {
    Room {
        code: RoomCode::new("ABC123"),
        name: "Friday night".to_string(),
        host_id: ParticipantId::from("host-1"),
        max_cards: 10,
        rules,
        visitors: Vec::new(),
        game,
    }
}

fn state_with_card(rules: Vec<WinRule>) -> RoomState {
    let game = Game {
        cards: vec![my_card()],
        ..Game::default()
    };
    let snapshot = room(rules, Some(game));
    reduce(
        &RoomState::default(),
        &StateInput::Snapshot(snapshot),
        &me(),
    )
    .state
}

fn number_drawn(sequence: &[u8]) -> ServerEvent {
    ServerEvent::NumberDrawn {
        number: *sequence.last().expect("at least one draw"),
        drawn_numbers: Some(sequence.to_vec()),
        winner: None,
        is_finished: false,
    }
}

#[test]
fn every_event_is_idempotent_under_redelivery() {
    let identity = me();
    let base = state_with_card(vec![WinRule::Line]);
    let events = [
        ServerEvent::GameStarted(GameUpdate::default()),
        number_drawn(&[5, 12]),
        ServerEvent::CardAssigned(my_card()),
        ServerEvent::CardUpdated(my_card()),
        ServerEvent::BingoWon {
            winner: Some(identity.id.clone()),
            winner_name: Some("Ana".to_string()),
        },
        ServerEvent::BingoValidated {
            subject: identity.id.clone(),
        },
        ServerEvent::BingoInvalid {
            subject: identity.id.clone(),
        },
    ];
    for event in events {
        let input = StateInput::Event(event);
        let once = reduce(&base, &input, &identity).state;
        let twice = reduce(&once, &input, &identity).state;
        assert_eq!(once, twice, "replay diverged for {input:?}");
    }
}

#[test]
fn draw_to_line_credits_the_row_as_soon_as_it_completes() {
    let identity = me();
    let mut state = state_with_card(vec![WinRule::Line, WinRule::Full]);

    let draws: &[u8] = &[5, 12, 34, 48, 61];
    for (i, _) in draws.iter().enumerate() {
        let event = StateInput::Event(number_drawn(&draws[..=i]));
        let step = reduce(&state, &event, &identity);
        assert!(step.effects.contains(&Effect::Cue(Cue::Draw)));
        state = step.state;

        let card = state.my_card.as_ref().unwrap();
        let rules = &state.room.as_ref().unwrap().rules;
        if i < draws.len() - 1 {
            assert_eq!(evaluate(card, rules), None);
        } else {
            assert_eq!(evaluate(card, rules), Some(WinPattern::Row(0)));
        }
    }
}

#[test]
fn draws_before_the_card_exists_are_recovered_on_assignment() {
    let identity = me();
    let snapshot = room(vec![WinRule::Line], None);
    let state = reduce(
        &RoomState::default(),
        &StateInput::Snapshot(snapshot),
        &identity,
    )
    .state;

    // Draw arrives before any card is held: no card, no crash.
    let state = reduce(&state, &StateInput::Event(number_drawn(&[61])), &identity).state;
    assert!(state.my_card.is_none());
    assert_eq!(state.game.as_ref().unwrap().drawn_numbers, vec![61]);

    // The late assignment is marked from the already-drawn sequence.
    let state = reduce(
        &state,
        &StateInput::Event(ServerEvent::CardAssigned(my_card())),
        &identity,
    )
    .state;
    let card = state.my_card.as_ref().unwrap();
    assert!(card.cells[0][4].marked, "cell 61 should be marked");
    assert!(!card.cells[0][0].marked);
}

#[test]
fn stale_snapshot_cannot_unfinish_the_game() {
    let identity = me();
    let state = state_with_card(vec![WinRule::Line]);
    let state = reduce(
        &state,
        &StateInput::Event(ServerEvent::BingoWon {
            winner: Some(identity.id.clone()),
            winner_name: None,
        }),
        &identity,
    )
    .state;
    assert!(state.game.as_ref().unwrap().is_finished);

    // A slow snapshot issued before the game ended arrives afterwards.
    let stale = room(
        vec![WinRule::Line],
        Some(Game {
            cards: vec![my_card()],
            is_finished: false,
            ..Game::default()
        }),
    );
    let state = reduce(&state, &StateInput::Snapshot(stale), &identity).state;
    let game = state.game.as_ref().unwrap();
    assert!(game.is_finished);
    assert_eq!(game.winner.as_ref(), Some(&identity.id));
}

#[test]
fn stale_snapshot_cannot_shrink_the_drawn_sequence() {
    let identity = me();
    let state = state_with_card(vec![WinRule::Line]);
    let state = reduce(
        &state,
        &StateInput::Event(number_drawn(&[5, 12, 34])),
        &identity,
    )
    .state;

    let stale = room(
        vec![WinRule::Line],
        Some(Game {
            drawn_numbers: vec![5],
            cards: vec![my_card()],
            ..Game::default()
        }),
    );
    let state = reduce(&state, &StateInput::Snapshot(stale), &identity).state;
    assert_eq!(state.game.as_ref().unwrap().drawn_numbers, vec![5, 12, 34]);
}

#[test]
fn replayed_shorter_draw_event_does_not_regress() {
    let identity = me();
    let state = state_with_card(vec![WinRule::Line]);
    let state = reduce(
        &state,
        &StateInput::Event(number_drawn(&[5, 12, 34])),
        &identity,
    )
    .state;
    let state = reduce(&state, &StateInput::Event(number_drawn(&[5])), &identity).state;
    assert_eq!(state.game.as_ref().unwrap().drawn_numbers, vec![5, 12, 34]);
}

#[test]
fn game_started_merges_and_requests_a_snapshot() {
    let identity = me();
    let snapshot = room(vec![WinRule::Line], None);
    let state = reduce(
        &RoomState::default(),
        &StateInput::Snapshot(snapshot),
        &identity,
    )
    .state;

    let step = reduce(
        &state,
        &StateInput::Event(ServerEvent::GameStarted(GameUpdate {
            cards: Some(vec![my_card()]),
            ..GameUpdate::default()
        })),
        &identity,
    );
    assert!(step.effects.contains(&Effect::Reload));
    let game = step.state.game.as_ref().unwrap();
    assert!(game.drawn_numbers.is_empty());
    assert_eq!(game.cards.len(), 1);
}

#[test]
fn cards_of_other_participants_are_ignored() {
    let identity = me();
    let state = state_with_card(vec![WinRule::Line]);

    let mut grid = [[0u8; GRID_SIZE]; GRID_SIZE];
    let mut next = 1u8;
    for row in grid.iter_mut() {
        for cell in row.iter_mut() {
            *cell = next;
            next += 1;
        }
    }
    let foreign = Card::from_grid("card-2", ParticipantId::from("visitor-2"), "Bia", grid).unwrap();

    let step = reduce(
        &state,
        &StateInput::Event(ServerEvent::CardUpdated(foreign)),
        &identity,
    );
    assert_eq!(step.state, state);
    assert!(step.effects.is_empty());
}

#[test]
fn claim_verdicts_only_concern_their_subject() {
    let identity = me();
    let state = state_with_card(vec![WinRule::Line]);

    let other = reduce(
        &state,
        &StateInput::Event(ServerEvent::BingoInvalid {
            subject: ParticipantId::from("visitor-2"),
        }),
        &identity,
    );
    assert!(other.effects.is_empty());

    let mine = reduce(
        &state,
        &StateInput::Event(ServerEvent::BingoInvalid {
            subject: identity.id.clone(),
        }),
        &identity,
    );
    assert!(mine.effects.contains(&Effect::Cue(Cue::Error)));
    assert_eq!(mine.state, state, "a rejected claim mutates nothing");
}

#[test]
fn winner_decoration_appears_only_for_the_confirmed_winner() {
    let identity = me();
    let mut state = state_with_card(vec![WinRule::Line]);

    // Complete row 0, game still running: no decoration yet.
    state = reduce(
        &state,
        &StateInput::Event(number_drawn(&[5, 12, 34, 48, 61])),
        &identity,
    )
    .state;
    assert!(state.winning.is_none());

    // Someone else wins: still no decoration.
    let lost = reduce(
        &state,
        &StateInput::Event(ServerEvent::BingoWon {
            winner: Some(ParticipantId::from("visitor-2")),
            winner_name: Some("Bia".to_string()),
        }),
        &identity,
    )
    .state;
    assert!(lost.winning.is_none());

    // This identity wins: the completed row is highlighted.
    let won = reduce(
        &state,
        &StateInput::Event(ServerEvent::BingoWon {
            winner: Some(identity.id.clone()),
            winner_name: None,
        }),
        &identity,
    )
    .state;
    assert_eq!(won.winning, Some(WinPattern::Row(0)));
    assert!(won.winning.unwrap().covers(0, FREE_COL));
    assert!(!won.winning.unwrap().covers(FREE_ROW, FREE_COL));
}

#[test]
fn snapshot_recognizes_the_host() {
    let host = ResolvedIdentity {
        id: ParticipantId::from("host-1"),
        display_name: "Rita".to_string(),
        is_authenticated: true,
    };
    let snapshot = room(vec![WinRule::Line], None);
    let state = reduce(&RoomState::default(), &StateInput::Snapshot(snapshot), &host).state;
    assert!(state.is_host);

    let state = reduce(
        &RoomState::default(),
        &StateInput::Snapshot(room(vec![WinRule::Line], None)),
        &me(),
    )
    .state;
    assert!(!state.is_host);
}

#[test]
fn snapshot_cards_are_normalized_and_marked() {
    let identity = me();
    // Simulate a server card whose centre arrived unmarked and where a
    // drawn number was not yet marked server-side.
    let mut card = my_card();
    card.cells[FREE_ROW][FREE_COL] = CardCell {
        number: 0,
        marked: false,
    };
    let game = Game {
        drawn_numbers: vec![5],
        cards: vec![card],
        ..Game::default()
    };
    let state = reduce(
        &RoomState::default(),
        &StateInput::Snapshot(room(vec![WinRule::Line], Some(game))),
        &identity,
    )
    .state;
    let card = state.my_card.as_ref().unwrap();
    assert!(card.is_marked(FREE_ROW, FREE_COL));
    assert!(card.cells[0][0].marked, "drawn 5 must be marked");
}
