//! Console presentation contract for the device flow.
//!
//! The orchestrator hands the human-facing details to a collaborator through
//! [`VerificationPrompt`]; rendering is out of scope here.

use tracing::info;

/// Data handed to the human-facing collaborator when a device flow starts.
#[derive(Debug, Clone)]
pub struct VerificationDetails {
    /// Short code the user types at the verification page.
    pub user_code: String,
    /// Page the user must visit.
    pub verification_uri: String,
    /// Variant of the page with the code pre-filled, when the server
    /// provides one.
    pub verification_uri_complete: Option<String>,
    /// Seconds until the code expires.
    pub expires_in: u64,
}

/// Presents device-flow verification instructions to a human.
pub trait VerificationPrompt: Send + Sync {
    /// Display the verification details. Called exactly once per flow,
    /// before polling begins.
    fn present(&self, details: &VerificationDetails);
}

/// Default prompt that emits the instructions as a structured log event.
#[derive(Debug, Clone, Default)]
pub struct LogPrompt;

impl VerificationPrompt for LogPrompt {
    fn present(&self, details: &VerificationDetails) {
        match &details.verification_uri_complete {
            Some(uri) => info!(
                uri = %uri,
                expires_in = details.expires_in,
                "visit the verification page to authorize this device"
            ),
            None => info!(
                uri = %details.verification_uri,
                user_code = %details.user_code,
                expires_in = details.expires_in,
                "visit the verification page and enter the code to authorize this device"
            ),
        }
    }
}
