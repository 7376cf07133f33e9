use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

pub const GRID_SIZE: usize = 5;
/// Sentinel number of the free centre cell.
pub const FREE_NUMBER: u8 = 0;
pub const FREE_ROW: usize = 2;
pub const FREE_COL: usize = 2;
pub const MAX_CELL_NUMBER: u8 = 99;

/// ---- Identities ----

/// Opaque participant identifier: either an auth-provided host id or a
/// generated visitor id. Compared verbatim, never parsed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParticipantId(String);

impl ParticipantId {
    pub fn new(id: impl Into<String>) -> Self {
        ParticipantId(id.into())
    }

    /// Fresh visitor identity, one per room code.
    pub fn random_visitor() -> Self {
        ParticipantId(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ParticipantId {
    fn from(id: &str) -> Self {
        ParticipantId(id.to_string())
    }
}

/// Human-shareable room code, normalized to uppercase on construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String")]
pub struct RoomCode(String);

impl RoomCode {
    pub fn new(raw: &str) -> Self {
        RoomCode(raw.trim().to_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for RoomCode {
    fn from(raw: String) -> Self {
        RoomCode::new(&raw)
    }
}

impl fmt::Display for RoomCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// ---- Win rules ----

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WinRule {
    Line,
    Column,
    Diagonal,
    Full,
}

impl fmt::Display for WinRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WinRule::Line => write!(f, "line"),
            WinRule::Column => write!(f, "column"),
            WinRule::Diagonal => write!(f, "diagonal"),
            WinRule::Full => write!(f, "full"),
        }
    }
}

/// ---- Cards ----

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardCell {
    pub number: u8,
    #[serde(default)]
    pub marked: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Card {
    pub id: String,
    pub owner_id: ParticipantId,
    pub owner_name: String,
    pub cells: [[CardCell; GRID_SIZE]; GRID_SIZE],
}

impl Card {
    /// Builds a card from a bare 5x5 number grid (all cells unmarked).
    /// The centre is forced to the free sentinel regardless of input.
    pub fn from_grid(
        id: impl Into<String>,
        owner_id: ParticipantId,
        owner_name: impl Into<String>,
        numbers: [[u8; GRID_SIZE]; GRID_SIZE],
    ) -> Result<Card, String> {
        let mut card = Card {
            id: id.into(),
            owner_id,
            owner_name: owner_name.into(),
            cells: numbers.map(|row| {
                row.map(|number| CardCell {
                    number,
                    marked: false,
                })
            }),
        };
        card.normalize();
        card.validate()?;
        Ok(card)
    }

    /// Canonicalizes the free centre: sentinel number, permanently marked.
    pub fn normalize(&mut self) {
        self.cells[FREE_ROW][FREE_COL] = CardCell {
            number: FREE_NUMBER,
            marked: true,
        };
    }

    /// Checks the invariants every card must satisfy before it is held
    /// locally: numbers 1..=99 outside the free centre, no duplicates.
    pub fn validate(&self) -> Result<(), String> {
        let mut seen = [false; MAX_CELL_NUMBER as usize + 1];
        for (row, cells) in self.cells.iter().enumerate() {
            for (col, cell) in cells.iter().enumerate() {
                if row == FREE_ROW && col == FREE_COL {
                    if cell.number != FREE_NUMBER {
                        return Err("centre cell must be the free sentinel".to_string());
                    }
                    continue;
                }
                if cell.number < 1 || cell.number > MAX_CELL_NUMBER {
                    return Err(format!(
                        "cell ({row},{col}) holds {} (expected 1..={MAX_CELL_NUMBER})",
                        cell.number
                    ));
                }
                if seen[cell.number as usize] {
                    return Err(format!("number {} appears twice", cell.number));
                }
                seen[cell.number as usize] = true;
            }
        }
        Ok(())
    }

    /// Marks every cell holding `number`. Idempotent; the free sentinel is
    /// never a drawable number.
    pub fn mark_number(&mut self, number: u8) {
        if number == FREE_NUMBER {
            return;
        }
        for row in self.cells.iter_mut() {
            for cell in row.iter_mut() {
                if cell.number == number {
                    cell.marked = true;
                }
            }
        }
    }

    pub fn mark_all(&mut self, numbers: &[u8]) {
        for &number in numbers {
            self.mark_number(number);
        }
    }

    /// Whether a cell counts as marked. The free centre always does.
    pub fn is_marked(&self, row: usize, col: usize) -> bool {
        (row == FREE_ROW && col == FREE_COL) || self.cells[row][col].marked
    }
}

/// ---- Game & room ----

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Game {
    #[serde(default)]
    pub drawn_numbers: Vec<u8>,
    #[serde(default)]
    pub cards: Vec<Card>,
    #[serde(default)]
    pub winner: Option<ParticipantId>,
    #[serde(default)]
    pub is_finished: bool,
}

impl Game {
    /// The card this participant should see: theirs while the game runs,
    /// and after the game only when they are the winner.
    pub fn card_for(&self, id: &ParticipantId) -> Option<&Card> {
        if self.is_finished && self.winner.as_ref() != Some(id) {
            return None;
        }
        self.cards.iter().find(|card| &card.owner_id == id)
    }

    pub fn owner_name_of(&self, id: &ParticipantId) -> Option<&str> {
        self.cards
            .iter()
            .find(|card| &card.owner_id == id)
            .map(|card| card.owner_name.as_str())
    }

    /// Shallow merge of a partial game payload: present fields replace,
    /// absent fields keep their current value. A winner always implies a
    /// finished game.
    pub fn merge(&mut self, update: GameUpdate) {
        if let Some(drawn_numbers) = update.drawn_numbers {
            self.drawn_numbers = drawn_numbers;
        }
        if let Some(cards) = update.cards {
            self.cards = cards;
        }
        if let Some(winner) = update.winner {
            self.winner = Some(winner);
        }
        if let Some(is_finished) = update.is_finished {
            self.is_finished = is_finished;
        }
        if self.winner.is_some() {
            self.is_finished = true;
        }
    }
}

/// Partial game, as carried by `game-started`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GameUpdate {
    pub drawn_numbers: Option<Vec<u8>>,
    pub cards: Option<Vec<Card>>,
    pub winner: Option<ParticipantId>,
    pub is_finished: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Visitor {
    pub id: ParticipantId,
    #[serde(default)]
    pub nickname: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub code: RoomCode,
    pub name: String,
    pub host_id: ParticipantId,
    pub max_cards: u32,
    #[serde(default)]
    pub rules: Vec<WinRule>,
    #[serde(default)]
    pub visitors: Vec<Visitor>,
    #[serde(default)]
    pub game: Option<Game>,
}

/// ---- Win evaluation ----

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Diagonal {
    Main,
    Anti,
}

/// The pattern a card is credited with, for highlighting only. The server
/// alone decides winners; this never feeds back into game state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WinPattern {
    Full,
    Row(usize),
    Column(usize),
    Diagonal(Diagonal),
}

impl WinPattern {
    /// Whether the cell at (row, col) belongs to the credited pattern.
    pub fn covers(&self, row: usize, col: usize) -> bool {
        match self {
            WinPattern::Full => true,
            WinPattern::Row(i) => row == *i,
            WinPattern::Column(j) => col == *j,
            WinPattern::Diagonal(Diagonal::Main) => row == col,
            WinPattern::Diagonal(Diagonal::Anti) => col == GRID_SIZE - 1 - row,
        }
    }
}

impl fmt::Display for WinPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WinPattern::Full => write!(f, "full card"),
            WinPattern::Row(i) => write!(f, "row {}", i + 1),
            WinPattern::Column(j) => write!(f, "column {}", j + 1),
            WinPattern::Diagonal(Diagonal::Main) => write!(f, "main diagonal"),
            WinPattern::Diagonal(Diagonal::Anti) => write!(f, "anti diagonal"),
        }
    }
}

/// Evaluates a card against the active rules. Fixed priority, first match
/// wins: full card, then rows 0..4, then columns 0..4, then the main
/// diagonal before the anti diagonal.
pub fn evaluate(card: &Card, rules: &[WinRule]) -> Option<WinPattern> {
    if rules.contains(&WinRule::Full) {
        let all = (0..GRID_SIZE).all(|row| (0..GRID_SIZE).all(|col| card.is_marked(row, col)));
        if all {
            return Some(WinPattern::Full);
        }
    }
    if rules.contains(&WinRule::Line) {
        for row in 0..GRID_SIZE {
            if (0..GRID_SIZE).all(|col| card.is_marked(row, col)) {
                return Some(WinPattern::Row(row));
            }
        }
    }
    if rules.contains(&WinRule::Column) {
        for col in 0..GRID_SIZE {
            if (0..GRID_SIZE).all(|row| card.is_marked(row, col)) {
                return Some(WinPattern::Column(col));
            }
        }
    }
    if rules.contains(&WinRule::Diagonal) {
        if (0..GRID_SIZE).all(|i| card.is_marked(i, i)) {
            return Some(WinPattern::Diagonal(Diagonal::Main));
        }
        if (0..GRID_SIZE).all(|i| card.is_marked(i, GRID_SIZE - 1 - i)) {
            return Some(WinPattern::Diagonal(Diagonal::Anti));
        }
    }
    None
}

/// ---- Channel events ----

pub const EVENT_JOIN_ROOM: &str = "join-room";
pub const EVENT_GAME_STARTED: &str = "game-started";
pub const EVENT_NUMBER_DRAWN: &str = "number-drawn";
pub const EVENT_BINGO_WON: &str = "bingo-won";
pub const EVENT_BINGO_VALIDATED: &str = "bingo-validated";
pub const EVENT_BINGO_INVALID: &str = "bingo-invalid";

/// Name of the card-assignment event scoped to one participant.
pub fn card_assigned_event(id: &ParticipantId) -> String {
    format!("card-assigned-{id}")
}

pub fn card_updated_event(id: &ParticipantId) -> String {
    format!("card-updated-{id}")
}

/// One frame on the event channel: a named event plus its JSON payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

impl Envelope {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Envelope {
            event: event.into(),
            data,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoomPayload {
    pub room_code: RoomCode,
    pub visitor_id: ParticipantId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameStartedPayload {
    #[serde(default)]
    pub game: GameUpdate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NumberDrawnPayload {
    pub number: u8,
    #[serde(default)]
    pub drawn_numbers: Option<Vec<u8>>,
    #[serde(default)]
    pub winner: Option<ParticipantId>,
    #[serde(default)]
    pub is_finished: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BingoWonPayload {
    #[serde(default)]
    pub winner: Option<ParticipantId>,
    #[serde(default)]
    pub winner_name: Option<String>,
}

/// Payload of `bingo-validated` / `bingo-invalid`: the claimant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BingoOutcomePayload {
    pub visitor_id: ParticipantId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardPayload {
    pub card: Card,
}

/// A push event, parsed and tagged. Identity-scoped names only parse for
/// the identity they were addressed to.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    GameStarted(GameUpdate),
    NumberDrawn {
        number: u8,
        drawn_numbers: Option<Vec<u8>>,
        winner: Option<ParticipantId>,
        is_finished: bool,
    },
    CardAssigned(Card),
    CardUpdated(Card),
    BingoWon {
        winner: Option<ParticipantId>,
        winner_name: Option<String>,
    },
    BingoValidated {
        subject: ParticipantId,
    },
    BingoInvalid {
        subject: ParticipantId,
    },
}

impl ServerEvent {
    /// Parses a named event addressed to `identity`. `Ok(None)` means the
    /// name is not one this client listens to.
    pub fn parse(
        event: &str,
        data: Value,
        identity: &ParticipantId,
    ) -> Result<Option<ServerEvent>, serde_json::Error> {
        let parsed = match event {
            EVENT_GAME_STARTED => {
                let payload: GameStartedPayload = serde_json::from_value(data)?;
                Some(ServerEvent::GameStarted(payload.game))
            }
            EVENT_NUMBER_DRAWN => {
                let payload: NumberDrawnPayload = serde_json::from_value(data)?;
                Some(ServerEvent::NumberDrawn {
                    number: payload.number,
                    drawn_numbers: payload.drawn_numbers,
                    winner: payload.winner,
                    is_finished: payload.is_finished,
                })
            }
            EVENT_BINGO_WON => {
                let payload: BingoWonPayload = serde_json::from_value(data)?;
                Some(ServerEvent::BingoWon {
                    winner: payload.winner,
                    winner_name: payload.winner_name,
                })
            }
            EVENT_BINGO_VALIDATED => {
                let payload: BingoOutcomePayload = serde_json::from_value(data)?;
                Some(ServerEvent::BingoValidated {
                    subject: payload.visitor_id,
                })
            }
            EVENT_BINGO_INVALID => {
                let payload: BingoOutcomePayload = serde_json::from_value(data)?;
                Some(ServerEvent::BingoInvalid {
                    subject: payload.visitor_id,
                })
            }
            other if other == card_assigned_event(identity) => {
                let payload: CardPayload = serde_json::from_value(data)?;
                Some(ServerEvent::CardAssigned(payload.card))
            }
            other if other == card_updated_event(identity) => {
                let payload: CardPayload = serde_json::from_value(data)?;
                Some(ServerEvent::CardUpdated(payload.card))
            }
            _ => None,
        };
        Ok(parsed)
    }
}

/// ---- HTTP bodies ----

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoomRequest {
    pub name: String,
    pub host_id: ParticipantId,
    pub host_name: String,
    pub max_cards: u32,
    pub rules: Vec<WinRule>,
}

impl CreateRoomRequest {
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("room name must not be empty".to_string());
        }
        if self.max_cards == 0 {
            return Err("card count must be positive".to_string());
        }
        if self.rules.is_empty() {
            return Err("at least one win rule is required".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoomRequest {
    pub room_code: RoomCode,
    pub visitor_id: ParticipantId,
    pub nickname: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartGameRequest {
    pub host_id: ParticipantId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartGameResponse {
    pub game: Game,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrawNumberRequest {
    pub host_id: ParticipantId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrawNumberResponse {
    pub number: u8,
    pub game: Game,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimBingoRequest {
    pub card_id: String,
    pub visitor_id: ParticipantId,
}

/// Error body the server attaches to non-2xx responses.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerErrorBody {
    #[serde(default)]
    pub message: Option<String>,
}

/// Response of the image-to-grid OCR collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanGridResponse {
    pub cartela: Vec<Vec<u8>>,
}

impl ScanGridResponse {
    /// Shapes the returned rows into a fixed 5x5 grid.
    pub fn into_grid(self) -> Result<[[u8; GRID_SIZE]; GRID_SIZE], String> {
        if self.cartela.len() != GRID_SIZE {
            return Err(format!(
                "expected {GRID_SIZE} rows, got {}",
                self.cartela.len()
            ));
        }
        let mut grid = [[0u8; GRID_SIZE]; GRID_SIZE];
        for (row, numbers) in self.cartela.into_iter().enumerate() {
            if numbers.len() != GRID_SIZE {
                return Err(format!(
                    "row {row} has {} columns (expected {GRID_SIZE})",
                    numbers.len()
                ));
            }
            for (col, number) in numbers.into_iter().enumerate() {
                grid[row][col] = number;
            }
        }
        Ok(grid)
    }
}
