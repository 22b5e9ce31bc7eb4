pub mod error;
pub mod executor;
pub mod notify;
pub mod registry;
pub mod runtime;
pub mod schedule;
pub mod source;
pub mod state;

pub use error::{RegistryError, SyncError};
pub use executor::{SyncEvent, SyncExecutor, SyncedPayload};
pub use notify::{MessageEnhancer, WebhookEnhancer};
pub use registry::{RegistryOptions, SyncRegistry};
pub use runtime::{ConnectionRuntime, RuntimeContext};
pub use schedule::is_due;
pub use source::{HttpSource, Source, SourceResponse};
pub use state::{RunStateEvent, SyncState, Transition};
