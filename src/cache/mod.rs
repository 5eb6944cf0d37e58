mod lock;
mod refs;
mod store;
mod validate;

pub use lock::{CacheDirLock, LOCK_FILE_NAME};
pub use refs::{DeletePolicy, PinGuard, PinKind, ReferenceSet, Removal};
pub use store::{
    CACHE_EXTENSION, CacheConfig, CacheEntry, CacheHandle, CacheStore, RecoveryReport, track_id_of,
};
pub use validate::{Container, Invalid, Validated, Validator, sniff};
