//! State that outlives a single pipeline run.
//!
//! - `crash_guard` - persistent clean-exit flag checked before every run
//! - `events` - broadcast events describing request lifecycles
//! - `notifier` - listener callbacks delivered in lifecycle order

pub mod crash_guard;
pub mod events;
pub mod notifier;

pub use crash_guard::{ActiveConversion, CrashGuardStore, FileCrashGuard, MemoryCrashGuard};
pub use events::{event_channel, ConversionEvent, EventSender, EVENT_CAPACITY};
pub use notifier::{ConversionListener, LoggingListener, ProgressNotifier};
