use reqwest::multipart::{Form, Part};
use url::Url;
use uuid::Uuid;

use tombola_protocol::{
    Card, ParticipantId, ScanGridResponse, FREE_COL, FREE_NUMBER, FREE_ROW, GRID_SIZE,
    MAX_CELL_NUMBER,
};

use crate::api::ApiError;

/// Client for the external image-to-grid OCR collaborator. One-shot
/// conversion, not part of the real-time engine: a photographed card comes
/// back as a 5x5 number grid, gets corrected by hand where the OCR
/// misread, and only then becomes a `Card` under the usual invariants.
pub struct CardScanner {
    endpoint: Url,
    http: reqwest::Client,
}

impl CardScanner {
    pub fn new(endpoint: Url) -> Self {
        CardScanner {
            endpoint,
            http: reqwest::Client::new(),
        }
    }

    pub async fn scan(&self, image: Vec<u8>, file_name: &str) -> Result<ScannedGrid, ApiError> {
        let part = Part::bytes(image).file_name(file_name.to_string());
        let form = Form::new().part("file", part);
        let response = self
            .http
            .post(self.endpoint.clone())
            .multipart(form)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ApiError::Server {
                status: response.status(),
                message: "card scan failed".to_string(),
            });
        }
        let body: ScanGridResponse = response.json().await?;
        let mut grid = body.into_grid().map_err(ApiError::Validation)?;
        grid[FREE_ROW][FREE_COL] = FREE_NUMBER;
        Ok(ScannedGrid { numbers: grid })
    }
}

/// An OCR result awaiting manual correction. The centre stays the free
/// sentinel and cannot be edited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedGrid {
    numbers: [[u8; GRID_SIZE]; GRID_SIZE],
}

impl ScannedGrid {
    pub fn numbers(&self) -> &[[u8; GRID_SIZE]; GRID_SIZE] {
        &self.numbers
    }

    pub fn replace_number(&mut self, row: usize, col: usize, number: u8) -> Result<(), String> {
        if row >= GRID_SIZE || col >= GRID_SIZE {
            return Err(format!("no cell at ({row},{col})"));
        }
        if row == FREE_ROW && col == FREE_COL {
            return Err("the free centre cell cannot be edited".to_string());
        }
        if number < 1 || number > MAX_CELL_NUMBER {
            return Err(format!("number must be 1..={MAX_CELL_NUMBER}"));
        }
        self.numbers[row][col] = number;
        Ok(())
    }

    /// Finalizes the grid into a card for this participant. Fails when the
    /// grid still violates card invariants (misreads left uncorrected).
    pub fn into_card(
        self,
        owner_id: ParticipantId,
        owner_name: impl Into<String>,
    ) -> Result<Card, String> {
        Card::from_grid(
            Uuid::new_v4().to_string(),
            owner_id,
            owner_name,
            self.numbers,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scanned() -> ScannedGrid {
        let mut numbers = [[0u8; GRID_SIZE]; GRID_SIZE];
        let mut next = 1u8;
        for row in numbers.iter_mut() {
            for cell in row.iter_mut() {
                *cell = next;
                next += 1;
            }
        }
        numbers[FREE_ROW][FREE_COL] = FREE_NUMBER;
        ScannedGrid { numbers }
    }

    #[test]
    fn centre_cell_is_not_editable() {
        let mut grid = scanned();
        assert!(grid.replace_number(FREE_ROW, FREE_COL, 10).is_err());
    }

    #[test]
    fn replacements_are_range_checked() {
        let mut grid = scanned();
        assert!(grid.replace_number(0, 0, 0).is_err());
        assert!(grid.replace_number(0, 0, 100).is_err());
        assert!(grid.replace_number(0, 0, 99).is_ok());
        assert_eq!(grid.numbers()[0][0], 99);
    }

    #[test]
    fn into_card_applies_card_invariants() {
        let card = scanned()
            .into_card(ParticipantId::from("v1"), "Ana")
            .unwrap();
        assert_eq!(card.cells[FREE_ROW][FREE_COL].number, FREE_NUMBER);
        assert!(card.is_marked(FREE_ROW, FREE_COL));

        // An uncorrected duplicate is rejected.
        let mut grid = scanned();
        grid.replace_number(0, 0, 24).unwrap();
        assert!(grid.into_card(ParticipantId::from("v1"), "Ana").is_err());
    }
}
