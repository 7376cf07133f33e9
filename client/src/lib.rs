pub mod api;
pub mod feedback;
pub mod identity;
pub mod reducer;
pub mod room_view;
pub mod scan;
pub mod subscription;
pub mod transport;

#[cfg(test)]
mod tests;

pub use api::{ApiClient, ApiError};
pub use feedback::{Cue, FeedbackScheduler};
pub use identity::{AuthenticatedUser, IdentityStore, ResolvedIdentity};
pub use reducer::{reduce, Effect, RoomState, StateInput, Step};
pub use room_view::{RoomView, ViewError};
pub use scan::{CardScanner, ScannedGrid};
pub use subscription::Subscriptions;
pub use transport::{Transport, TransportEvent};
