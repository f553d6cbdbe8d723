//! Processing of delivery status notifications for bounced DMARC
//! aggregate reports, and the postfix discard table derived from them.
pub mod config;
pub mod discard;
pub mod extract;
pub mod logging;
pub mod process;
pub mod record;
pub mod store;
pub mod validate;

pub use config::{ConfigError, MinAge};
pub use discard::{DiscardEntry, DiscardTableBuilder};
pub use extract::{extract, Outcome, ProcessContext};
pub use process::{process, Disposition};
pub use record::{DsnAction, DsnRecord, SaveReason};
pub use store::DataDir;
