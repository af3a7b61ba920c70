pub mod events;
pub mod sink;
