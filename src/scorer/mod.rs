pub mod flag_monitor;

pub use flag_monitor::FlagMonitor;
