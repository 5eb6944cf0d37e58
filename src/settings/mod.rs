pub mod store;

pub use store::{DownloadSettings, JukeboxSettings, SinkKind, load_settings, save_settings};
