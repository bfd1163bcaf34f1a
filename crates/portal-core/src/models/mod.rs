pub mod event;
pub mod user;

pub use event::{AccessLevel, Audience, Event, EventKind, Record};
pub use user::{Capability, Role, UserContext};
