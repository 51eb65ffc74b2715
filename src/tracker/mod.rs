//! Pull request lifecycle tracking: classification, state, routing, and
//! the two drivers (timer poll and reaction reconciliation).

pub mod classifier;
pub mod fanout;
pub mod lifecycle;
pub mod messages;
pub mod model;
pub mod poller;
pub mod reconcile;
pub mod render;
pub mod router;

pub use classifier::Classifier;
pub use lifecycle::{LifecycleStore, MergeApplication, PendingEntry};
pub use messages::MessageTracker;
pub use poller::{PollDriver, PollSummary, spawn_poll_driver};
pub use reconcile::{ReconcileOutcome, ReconciliationEngine};
pub use render::Renderer;
pub use router::{Subscription, SubscriptionRouter, SubsystemFilter};
