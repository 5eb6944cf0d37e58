pub mod infra;
pub mod jukebox;

pub use jukebox::{Jukebox, JukeboxConfig, spawn_jukebox};
