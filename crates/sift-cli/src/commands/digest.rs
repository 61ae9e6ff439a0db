//! `sift digest`: print the plan digest, optionally checking it.

use super::Session;
use crate::output::StyledOutput;

pub fn execute(session: &Session, expect: Option<&str>, out: &mut StyledOutput) -> anyhow::Result<()> {
    let digest = session.plan.digest(&session.program, &session.table);
    out.plain(&digest);
    out.newline();
    out.flush();

    if let Some(expected) = expect {
        if !expected.eq_ignore_ascii_case(&digest) {
            anyhow::bail!("Plan digest mismatch: expected {}, got {}", expected, digest);
        }
    }
    Ok(())
}
