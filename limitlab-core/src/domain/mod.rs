//! Domain types for LimitLab

pub mod bar;
pub mod result;
pub mod symbol;

pub use bar::{BarError, DailyBar};
pub use result::{BoardPattern, LimitResult, LimitStatus, UnknownPattern};
pub use symbol::{
    is_st_name, strip_exchange_suffix, to_exchange_code, Board, LimitRatios, PriceTick,
    SymbolMeta, UnknownBoard,
};

/// Six-digit exchange code, e.g. `600000`.
pub type Code = String;
