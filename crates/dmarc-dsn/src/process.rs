//! Drives a single bounce message from classification through to the
//! data directory: records are appended to domain logs, anything else
//! is saved for inspection.
use crate::extract::{extract, Outcome, ProcessContext};
use crate::record::SaveReason;
use crate::store::{AppendResult, DataDir};
use std::path::PathBuf;

/// The final fate of one bounce message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Records were appended to the logs of these domains
    Written { domains: Vec<String> },
    /// The raw message was saved for inspection
    Saved { reason: SaveReason, path: PathBuf },
    /// A delayed-delivery notice; nothing was recorded
    Delayed,
}

/// Classify `raw` and persist whatever that produces.
/// Classification failures are not errors; only I/O problems are.
pub fn process(ctx: &ProcessContext, data_dir: &DataDir, raw: &[u8]) -> anyhow::Result<Disposition> {
    let reason = match extract(ctx, raw) {
        Outcome::Delayed => return Ok(Disposition::Delayed),
        Outcome::Unclassified(reason) => reason,
        Outcome::Records(records) => {
            tracing::debug!("dsn details: {records:?}");
            match data_dir.append_records(&records)? {
                AppendResult::Written(domains) => return Ok(Disposition::Written { domains }),
                AppendResult::MissingReportDomain => SaveReason::NoReportDomain,
            }
        }
    };

    let path = data_dir.save_message(&ctx.queue_id, reason, raw)?;
    tracing::info!("{}: saved as {reason}", ctx.queue_id);
    Ok(Disposition::Saved { reason, path })
}
