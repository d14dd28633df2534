pub mod connection;
pub mod migrations;
pub mod repositories;
pub mod services;

pub use connection::{connect, connect_with_settings, DbPool};
pub use services::{DealershipHours, LocalCalendar, LocalCrm, LocalEmail};
