pub mod delivery;
pub mod feedback;
pub mod group;
pub mod pull;
pub mod runner;

pub use delivery::{DeliveryCoordinator, PassReport};
pub use feedback::{FeedbackProcessor, FeedbackReport};
pub use group::{GroupDeliveryBatcher, GroupDeliveryReport};
pub use pull::PullNotificationService;
pub use runner::{DeliveryRunner, RunSummary};
