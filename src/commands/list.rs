use anyhow::Result;
use std::io::Write;

use crate::remote::Remote;

/// Handle the list command
///
/// Refs are listed with `?` since their git object ids are only known once
/// git has imported them.
pub fn handle<W: Write>(
    remote: &Remote,
    default_branch: &str,
    output: &mut W,
    for_push: bool,
) -> Result<()> {
    tracing::debug!(
        "listing {} refs (for push: {})",
        remote.marks().refs().len(),
        for_push
    );

    for ref_name in remote.marks().refs().keys() {
        writeln!(output, "? {}", ref_name)?;
    }
    writeln!(output, "@{} HEAD", default_branch)?;

    // Empty line signals completion
    writeln!(output)?;

    Ok(())
}
