pub mod backend;
pub mod config;
pub mod entry;
pub mod error;
pub mod ident;
pub mod lock;
pub mod scopes;
pub mod transform;
pub mod upgrade;

pub use backend::{Backend, BackendClients, BackendKind};
pub use entry::{Attrs, Entry, EntryOptions, ModifyOutcome};
pub use error::{UpgradeError, UpgradeResult};
pub use upgrade::{StepOutcome, Upgrade, UpgradeReport};
