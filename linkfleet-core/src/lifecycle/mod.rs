//! Session lifecycle: connect, pair, reconnect, disconnect
//!
//! - `machine`: pure phase transitions and the actions they produce
//! - `driver`: per-account task executing those actions against the
//!   protocol layer, the store and the registry
//! - `manager`: public entry point tracking running lifecycles

mod driver;
pub mod errors;
pub mod machine;
pub mod manager;
pub mod pairing;
pub mod retry;

pub use errors::{LifecycleError, LifecycleResult};
pub use machine::{Action, Input, Machine, Outcome, Phase};
pub use manager::{AttemptTicket, LifecycleManager};
pub use pairing::format_pairing_code;
pub use retry::RetryPolicy;
