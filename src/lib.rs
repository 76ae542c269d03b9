pub mod audio;
pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod player;

pub use error::*;
pub use models::*;
