//! Render requests.
//! A `RenderRequest` is both the query sent to the board renderer and the metadata record
//! persisted next to each composite, so its serde field order is the on-disk key order.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::corpus::Position;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    White,
    Black,
}

/// Board palette understood by the renderer. `Random` asks it to pick one per call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ColorTheme {
    Wikipedia,
    LichessBrown,
    LichessBlue,
    #[default]
    Random,
}

impl std::str::FromStr for ColorTheme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "wikipedia" => Ok(ColorTheme::Wikipedia),
            "lichess-brown" => Ok(ColorTheme::LichessBrown),
            "lichess-blue" => Ok(ColorTheme::LichessBlue),
            "random" => Ok(ColorTheme::Random),
            other => Err(format!("unknown color theme {other:?}")),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderRequest {
    #[serde(rename = "fen")]
    pub board_encoding: String,
    pub orientation: Orientation,
    pub size: u32,
    #[serde(rename = "lastMove", default, skip_serializing_if = "Option::is_none")]
    pub last_move: Option<String>,
    #[serde(rename = "check", default, skip_serializing_if = "Option::is_none")]
    pub check_square: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arrows: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub squares: Option<String>,
    #[serde(default)]
    pub coordinates: bool,
    #[serde(rename = "colors")]
    pub color_theme: ColorTheme,
}

/// Fixed parts of every request; the per-item parts come from the sampled position and RNG.
#[derive(Clone, Debug)]
pub struct RequestBuilder {
    pub size: u32,
    pub color_theme: ColorTheme,
    pub arrows: Option<String>,
    pub squares: Option<String>,
    pub coordinates: bool,
}

impl Default for RequestBuilder {
    fn default() -> Self {
        Self {
            size: 360,
            color_theme: ColorTheme::Random,
            arrows: None,
            squares: None,
            coordinates: false,
        }
    }
}

impl RequestBuilder {
    pub fn from_config(config: &crate::config::Config) -> Self {
        Self {
            size: config.board_size,
            color_theme: config.color_theme,
            arrows: config.arrows.clone(),
            squares: config.squares.clone(),
            coordinates: config.coordinates,
        }
    }

    pub fn build<R: Rng + ?Sized>(&self, position: &Position, rng: &mut R) -> RenderRequest {
        let orientation = if rng.random_bool(0.5) {
            Orientation::White
        } else {
            Orientation::Black
        };

        RenderRequest {
            board_encoding: position.board_encoding.clone(),
            orientation,
            size: self.size,
            last_move: position.last_move.clone(),
            check_square: position.check_square.clone(),
            arrows: self.arrows.clone(),
            squares: self.squares.clone(),
            coordinates: self.coordinates,
            color_theme: self.color_theme,
        }
    }
}
