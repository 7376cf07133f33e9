use reqwest::{Response, StatusCode};
use thiserror::Error;
use tracing::debug;
use url::Url;

use tombola_protocol::{
    ClaimBingoRequest, CreateRoomRequest, DrawNumberRequest, DrawNumberResponse, JoinRoomRequest,
    ParticipantId, Room, RoomCode, ServerErrorBody, StartGameRequest, StartGameResponse,
};

/// Failures of request/response traffic with the game server. All of them
/// are local: the caller shows a notice (or redirects on `NotFound`) and
/// prior state stays untouched.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("room not found")]
    NotFound,
    #[error("{0}")]
    Validation(String),
    #[error("server rejected request ({status}): {message}")]
    Server { status: StatusCode, message: String },
    #[error("request failed: {0}")]
    Network(#[from] reqwest::Error),
}

/// Request/response client for the authoritative game server.
#[derive(Clone)]
pub struct ApiClient {
    base: Url,
    http: reqwest::Client,
}

impl ApiClient {
    pub fn new(base: Url) -> Self {
        ApiClient {
            base,
            http: reqwest::Client::new(),
        }
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// The event-channel endpoint that pairs with this server.
    pub fn websocket_url(&self) -> Result<Url, ApiError> {
        let mut url = self.endpoint("ws")?;
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme).map_err(|_| {
            ApiError::Validation(format!("cannot derive a ws endpoint from {}", self.base))
        })?;
        Ok(url)
    }

    fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        self.base
            .join(path)
            .map_err(|err| ApiError::Validation(format!("bad endpoint {path}: {err}")))
    }

    /// Fetches the authoritative room snapshot. `NotFound` means the code is
    /// unknown; callers redirect into the join flow instead of retrying.
    pub async fn fetch_room(&self, code: &RoomCode) -> Result<Room, ApiError> {
        let url = self.endpoint(&format!("rooms/{code}"))?;
        let response = self.http.get(url).send().await?;
        let response = check(response).await?;
        Ok(response.json().await?)
    }

    pub async fn create_room(&self, request: &CreateRoomRequest) -> Result<Room, ApiError> {
        request.validate().map_err(ApiError::Validation)?;
        let url = self.endpoint("rooms")?;
        let response = self.http.post(url).json(request).send().await?;
        let response = check(response).await?;
        Ok(response.json().await?)
    }

    pub async fn join_room(&self, request: &JoinRoomRequest) -> Result<(), ApiError> {
        if request.nickname.trim().is_empty() {
            return Err(ApiError::Validation(
                "nickname must not be empty".to_string(),
            ));
        }
        let url = self.endpoint("rooms/join")?;
        let response = self.http.post(url).json(request).send().await?;
        check(response).await?;
        Ok(())
    }

    pub async fn start_game(
        &self,
        code: &RoomCode,
        host_id: &ParticipantId,
    ) -> Result<StartGameResponse, ApiError> {
        let url = self.endpoint(&format!("rooms/{code}/start"))?;
        let body = StartGameRequest {
            host_id: host_id.clone(),
        };
        let response = self.http.post(url).json(&body).send().await?;
        let response = check(response).await?;
        Ok(response.json().await?)
    }

    pub async fn draw_number(
        &self,
        code: &RoomCode,
        host_id: &ParticipantId,
    ) -> Result<DrawNumberResponse, ApiError> {
        let url = self.endpoint(&format!("game/{code}/draw"))?;
        let body = DrawNumberRequest {
            host_id: host_id.clone(),
        };
        let response = self.http.post(url).json(&body).send().await?;
        let response = check(response).await?;
        let drawn: DrawNumberResponse = response.json().await?;
        debug!(room = %code, number = drawn.number, "number drawn");
        Ok(drawn)
    }

    /// Submits a bingo claim. The verdict arrives over the event channel
    /// (`bingo-validated` / `bingo-invalid`), not in this response.
    pub async fn claim_bingo(
        &self,
        code: &RoomCode,
        card_id: &str,
        visitor_id: &ParticipantId,
    ) -> Result<(), ApiError> {
        let url = self.endpoint(&format!("game/{code}/validate-bingo"))?;
        let body = ClaimBingoRequest {
            card_id: card_id.to_string(),
            visitor_id: visitor_id.clone(),
        };
        let response = self.http.post(url).json(&body).send().await?;
        check(response).await?;
        Ok(())
    }
}

async fn check(response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::NOT_FOUND {
        return Err(ApiError::NotFound);
    }
    let message = response
        .json::<ServerErrorBody>()
        .await
        .ok()
        .and_then(|body| body.message)
        .unwrap_or_else(|| status.to_string());
    Err(ApiError::Server { status, message })
}
