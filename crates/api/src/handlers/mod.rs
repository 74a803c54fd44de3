pub mod admin;
pub mod workers;
