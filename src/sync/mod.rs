//! Controllers that keep views in step with the store.
//!
//! - [`subscription`] - single-collection realtime subscription with refresh
//! - [`timer`] - start/stop work timer with optimistic view and ticker
//! - [`table`] - paged, filtered, live table over a collection

pub mod subscription;
pub mod table;
pub mod timer;

pub use subscription::{RefreshFn, SubscriptionManager};
pub use table::{RequestSequencer, TableController, TableState, comment_feed, task_table};
pub use timer::{TimerController, TimerTicker, TimerTransition, TimerView, live_elapsed};
