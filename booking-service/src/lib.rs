pub mod api;
pub mod booking;
pub mod caller;
pub mod clock;
pub mod db;
pub mod error;
pub mod models;
pub mod outbox;
pub mod payments;
pub mod schema;
pub mod store;
pub mod sweeper;
