pub mod cache;
pub mod ticket;
