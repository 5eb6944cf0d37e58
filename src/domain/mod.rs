pub mod ids;
pub mod model;
pub mod resolver;

pub use ids::{SourceKind, TenantId, TrackId, VoiceTarget};
pub use model::Track;
pub use resolver::resolve;
