pub mod activity;
pub mod connection;
pub mod messages;

pub use activity::ActivityFeed;
pub use connection::BookFeed;
