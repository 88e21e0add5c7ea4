//! Verification command.

use clap::Args;

use autograph_cli::print_warning;
use autograph_signature::{VerificationResult, VerifyMode};

use super::{get_context, open_service, output, read_sample, session};
use crate::Cli;

/// Verify a signature image against an identity.
///
/// With the backend healthy the backend decides; otherwise the image is
/// enrolled and compared against the identity's gallery.
///
/// The backend's decision names the identity it recognised, which may not be
/// the claimed one; a warning is printed when they differ.
#[derive(Args)]
pub struct VerifyCommand {
    /// Claimed identity (student) id
    identity: String,

    /// Probe image file
    file: String,

    /// Attendance session id, scoping the backend's candidate set
    #[arg(long)]
    session: Option<String>,

    /// Decision path: auto, backend or gallery (default: from context)
    #[arg(long)]
    mode: Option<VerifyMode>,
}

impl VerifyCommand {
    pub async fn run(&self, cli: &Cli) -> anyhow::Result<()> {
        let ctx = get_context(cli)?;
        let service = open_service(&ctx)?;
        let probe = read_sample(&self.file)?;
        let session = session();

        let result = match self.mode {
            Some(mode) => {
                service
                    .verify_with(&session, &self.identity, probe, self.session.as_deref(), mode)
                    .await?
            }
            None => {
                service
                    .verify(&session, &self.identity, probe, self.session.as_deref())
                    .await?
            }
        };
        if let Some(other) = claim_mismatch(&result, &self.identity) {
            print_warning(&format!(
                "Backend recognised \"{}\", not the claimed \"{}\"",
                other, self.identity
            ));
        }
        output(cli).write(&result)
    }
}

/// The recognised identity when a match names someone other than `claimed`.
fn claim_mismatch<'a>(result: &'a VerificationResult, claimed: &str) -> Option<&'a str> {
    match result.identity_id.as_deref() {
        Some(id) if result.matched && id != claimed => Some(id),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use autograph_signature::{Decision, VerifyPath};

    use super::*;

    fn backend(matched: bool, identity: Option<&str>) -> VerificationResult {
        VerificationResult {
            matched,
            identity_id: identity.map(str::to_string),
            sample_id: None,
            score: 0.9,
            decision: if matched { Decision::Match } else { Decision::NoMatch },
            message: String::new(),
            path: VerifyPath::Backend,
        }
    }

    #[test]
    fn mismatch_only_for_a_match_on_someone_else() {
        assert_eq!(claim_mismatch(&backend(true, Some("7")), "42"), Some("7"));
        assert_eq!(claim_mismatch(&backend(true, Some("42")), "42"), None);
        assert_eq!(claim_mismatch(&backend(false, Some("7")), "42"), None);
        assert_eq!(claim_mismatch(&backend(true, None), "42"), None);
    }
}
