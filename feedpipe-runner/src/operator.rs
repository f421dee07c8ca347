//! The human in the loop.
//!
//! Paranoid runs ask before every step; the manual-data walkthrough waits for
//! an acknowledgement after each brief. Unattended runs answer yes to
//! everything.

/// Confirmation port used by the orchestrator.
pub trait Operator {
    /// Ask a yes/no question. `false` means "no".
    fn confirm(&self, question: &str) -> bool;

    /// Show `message` and wait until the operator is done with it.
    fn acknowledge(&self, message: &str);
}

/// Proceeds with every step without asking.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unattended;

impl Operator for Unattended {
    fn confirm(&self, _question: &str) -> bool {
        true
    }

    fn acknowledge(&self, _message: &str) {}
}
