pub mod aggregator;
pub mod facade;
pub mod insider;
pub mod positions;
pub mod signals;
pub mod wallet;
pub mod whales;

pub use aggregator::{Aggregator, MarketAggregate, ScanBudget};
pub use facade::{
    InsiderFilter, InsiderSortField, PositionFilter, PositionSortField, QueryFacade, SignalFilter,
    SignalSortField, SortDirection, SortSpec, WhaleTradeFilter,
};
pub use insider::{FlagPolicy, InsiderMarketRow, InsiderScore};
pub use signals::SignalRow;
pub use wallet::UserSummary;
pub use whales::{PositionRow, WhaleTradeRow};
