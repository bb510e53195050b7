pub mod api;
pub mod assets;
pub mod error;
pub mod events;
pub mod server;
