//! Exit status classification.

use pngsqueeze_core::ToolFailureCause;

const EXIT_SUCCESS: i32 = 0;
const EXIT_NOT_SMALLER: i32 = 98;
const EXIT_QUALITY_TOO_LOW: i32 = 99;
const EXIT_INPUT_REJECTED: [i32; 3] = [2, 25, 26];

/// What an exit status means for the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ExitClass {
    /// Output written.
    Success,
    /// `--skip-if-larger` declined to write output.
    NotSmaller,
    /// The tool failed; `cause` selects the client-facing classification.
    Failed(ToolFailureCause),
}

/// Classify an exit code; `None` means the process died from a signal.
pub(crate) fn classify(code: Option<i32>) -> ExitClass {
    match code {
        Some(EXIT_SUCCESS) => ExitClass::Success,
        Some(EXIT_NOT_SMALLER) => ExitClass::NotSmaller,
        Some(EXIT_QUALITY_TOO_LOW) => ExitClass::Failed(ToolFailureCause::QualityNotMet),
        Some(code) if EXIT_INPUT_REJECTED.contains(&code) => {
            ExitClass::Failed(ToolFailureCause::InputRejected)
        }
        Some(_) | None => ExitClass::Failed(ToolFailureCause::Failed),
    }
}
