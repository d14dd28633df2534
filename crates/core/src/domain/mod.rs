pub mod appointment;
pub mod conversation;
pub mod routing;
pub mod tool;
pub mod vehicle;
