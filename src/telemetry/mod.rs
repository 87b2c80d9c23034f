pub mod cursor;
pub mod events;
