//! Symbol metadata: listing board, special-treatment flag, price-limit ratio.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Listing board of an A-share symbol. Determines the default price-limit band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Board {
    /// Shanghai / Shenzhen main board.
    Main,
    /// ChiNext (Shenzhen growth enterprise market).
    Gem,
    /// STAR market (Shanghai science and technology board).
    Star,
    /// Beijing Stock Exchange.
    Bj,
}

impl Board {
    /// Infer the board from the 6-digit exchange code prefix.
    pub fn from_code(code: &str) -> Self {
        let code = strip_exchange_suffix(code);
        if code.starts_with("60") || code.starts_with("00") {
            Board::Main
        } else if code.starts_with("30") {
            Board::Gem
        } else if code.starts_with("68") {
            Board::Star
        } else if code.starts_with("92") || code.starts_with('8') || code.starts_with('4') {
            Board::Bj
        } else {
            Board::Main
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Board::Main => "MAIN",
            Board::Gem => "GEM",
            Board::Star => "STAR",
            Board::Bj => "BJ",
        }
    }
}

impl fmt::Display for Board {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown board type '{0}' (expected MAIN, GEM, STAR or BJ)")]
pub struct UnknownBoard(pub String);

impl FromStr for Board {
    type Err = UnknownBoard;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "MAIN" => Ok(Board::Main),
            "GEM" => Ok(Board::Gem),
            "STAR" => Ok(Board::Star),
            "BJ" => Ok(Board::Bj),
            other => Err(UnknownBoard(other.to_string())),
        }
    }
}

/// Price-limit ratio table keyed by board, with the ST override.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LimitRatios {
    pub main: f64,
    pub gem: f64,
    pub star: f64,
    pub bj: f64,
    /// Band for special-treatment symbols on the main board.
    pub st: f64,
}

impl Default for LimitRatios {
    fn default() -> Self {
        Self {
            main: 0.10,
            gem: 0.20,
            star: 0.20,
            bj: 0.30,
            st: 0.05,
        }
    }
}

impl LimitRatios {
    /// Ratio for a board. ST narrows the band on the main board only; GEM,
    /// STAR and BJ keep their board band regardless of the ST flag.
    pub fn ratio_for(&self, board: Board, is_st: bool) -> f64 {
        match board {
            Board::Main if is_st => self.st,
            Board::Main => self.main,
            Board::Gem => self.gem,
            Board::Star => self.star,
            Board::Bj => self.bj,
        }
    }
}

/// Static description of a listed symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolMeta {
    pub code: String,
    pub name: String,
    pub board_type: Board,
    pub limit_ratio: f64,
    pub is_st: bool,
}

impl SymbolMeta {
    /// Build metadata from a code and display name, deriving board, ST flag
    /// and ratio.
    pub fn derive(code: &str, name: &str, ratios: &LimitRatios) -> Self {
        let code = strip_exchange_suffix(code).to_string();
        let board_type = Board::from_code(&code);
        let is_st = is_st_name(name);
        Self {
            limit_ratio: ratios.ratio_for(board_type, is_st),
            code,
            name: name.trim().to_string(),
            board_type,
            is_st,
        }
    }
}

/// Special-treatment listings carry `ST` in their display name
/// (`ST`, `*ST`, `SST`, `S*ST`).
pub fn is_st_name(name: &str) -> bool {
    name.to_ascii_uppercase().contains("ST")
}

/// `600000.SH` -> `600000`. Codes without a suffix pass through.
pub fn strip_exchange_suffix(code: &str) -> &str {
    code.split('.').next().unwrap_or(code).trim()
}

/// `600000` -> `600000.SH`, `000001` -> `000001.SZ`, `830799` -> `830799.BJ`.
pub fn to_exchange_code(code: &str) -> String {
    let code = strip_exchange_suffix(code);
    let suffix = if code.starts_with('6') {
        "SH"
    } else if code.starts_with('8') || code.starts_with('4') || code.starts_with("92") {
        "BJ"
    } else {
        "SZ"
    };
    format!("{code}.{suffix}")
}

/// Tick rounding for exchange prices.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceTick {
    pub decimals: u32,
}

impl Default for PriceTick {
    fn default() -> Self {
        Self { decimals: 2 }
    }
}

impl PriceTick {
    pub fn new(decimals: u32) -> Self {
        Self { decimals }
    }

    /// Round half up to the tick grid, the way the exchanges compute limit
    /// prices. The small nudge absorbs binary representation error, so a
    /// product that lands a hair under the half tick (`10.05 * 1.1`) still
    /// rounds up to 11.06.
    pub fn round_half_up(&self, price: f64) -> f64 {
        let scale = 10f64.powi(self.decimals as i32);
        let ticks = price * scale;
        (ticks + 0.5 + 1e-6).floor() / scale
    }
}
