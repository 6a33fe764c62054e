use anyhow::Result;
use std::io::Write;

/// Handle the option command; no options are supported
pub fn handle<W: Write>(name: &str, value: &str, output: &mut W) -> Result<()> {
    tracing::debug!("ignoring option {} = {}", name, value);
    writeln!(output, "unsupported")?;
    Ok(())
}
