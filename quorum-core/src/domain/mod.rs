//! Domain types for quorum

pub mod action;
pub mod fill;
pub mod ids;
pub mod portfolio;
pub mod position;
pub mod snapshot;
pub mod trade;

pub use action::{Action, OrderSide, ParseActionError};
pub use fill::{Fill, FillReason};
pub use ids::{DecisionId, FillId, MemoryId};
pub use portfolio::{EquityPoint, PortfolioSnapshot, PortfolioState};
pub use position::{Position, PositionSide};
pub use snapshot::{MarketSnapshot, SeriesField};
pub use trade::{ClosedTrade, ExitReason};

/// Symbol type alias
pub type Symbol = String;
