pub mod debug;
pub mod deck;
pub mod events;
pub mod models;
pub mod runs;
