//! Stdout event sink.
//!
//! Outputs deposits as JSON lines to stdout, suitable for piping to other tools.

use std::io::Write;

use async_trait::async_trait;

use super::{DepositNotification, EventSink};
use crate::deposit::DepositEvent;

/// Sink that prints deposits to stdout as JSON lines.
pub struct StdoutSink {
    /// Whether to use pretty printing
    pretty: bool,
}

impl StdoutSink {
    pub fn new() -> Self {
        Self { pretty: false }
    }

    pub fn pretty() -> Self {
        Self { pretty: true }
    }
}

impl Default for StdoutSink {
    fn default() -> Self {
        Self::new()
    }
}

/// Write one deposit as JSON to `out`. A closed pipe surfaces as an error.
fn write_deposit<W: Write>(
    out: &mut W,
    deposit: &DepositEvent,
    pretty: bool,
) -> anyhow::Result<()> {
    let notification = DepositNotification::new(deposit);
    let output = if pretty {
        serde_json::to_string_pretty(&notification)?
    } else {
        serde_json::to_string(&notification)?
    };

    writeln!(out, "{}", output)?;
    out.flush()?;
    Ok(())
}

#[async_trait]
impl EventSink for StdoutSink {
    async fn emit(&self, deposit: &DepositEvent) -> anyhow::Result<()> {
        let mut out = std::io::stdout().lock();
        write_deposit(&mut out, deposit, self.pretty)
    }
}
