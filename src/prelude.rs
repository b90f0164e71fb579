pub use crate::batch::{BatchLoader, BatchOutcome};
pub use crate::builder::CacheBuilder;
pub use crate::cache::{Cache, Ttl, WarmupReport};
pub use crate::clock::{Clock, ManualClock, MonotonicClock};
pub use crate::error::{CacheError, ConfigError};
pub use crate::key::{CacheKey, Identity, KeyArgs, KeyEncoder, KeyPart};
pub use crate::memo::{LruMemo, TtlMemo};
pub use crate::metrics::MetricsSnapshot;
