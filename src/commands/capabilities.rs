use anyhow::Result;
use std::io::Write;

use crate::remote::Remote;

/// Handle the capabilities command
///
/// Remote refs land in the remote's private namespace; git's own marks file
/// lives next to the mark table so both sides agree on mark numbers.
pub fn handle<W: Write>(remote: &Remote, output: &mut W) -> Result<()> {
    let marks_path = remote.git_marks_path();

    writeln!(output, "import")?;
    writeln!(output, "export")?;
    writeln!(output, "refspec refs/heads/*:{}/heads/*", remote.prefix())?;
    writeln!(output, "refspec refs/tags/*:{}/tags/*", remote.prefix())?;
    writeln!(output, "*export-marks {}", marks_path.display())?;
    if marks_path.is_file() {
        writeln!(output, "*import-marks {}", marks_path.display())?;
    }
    writeln!(output)?; // Empty line signals completion

    Ok(())
}
