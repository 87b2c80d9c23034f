pub mod cursor;
pub mod events;
pub mod geometry;
pub mod prediction;
pub mod settings;
