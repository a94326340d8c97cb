pub mod trade_ledger;

pub use trade_ledger::{now_secs, Appended, TradeLedger, TradeScan};
