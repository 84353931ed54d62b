//! Cost-tier collection filter.
//!
//! Decides, per case, whether its cost marker allows it to run under the
//! session's flags. The decision depends only on the case's own marker and
//! the two flags, never on other cases.

use crate::schema::Marker;

/// Skip decision for one case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Run,
    /// Skipped, with a message naming the flag that would enable the case.
    Skip(String),
}

/// Classify one case against the session's cost-tier flags.
pub fn decide(marker: Marker, run_slow: bool, run_very_slow: bool) -> Decision {
    match marker {
        Marker::Normal => Decision::Run,
        // --runveryslow implies the cheaper tier as well.
        Marker::Slow => {
            if run_slow || run_very_slow {
                Decision::Run
            } else {
                Decision::Skip("need --runslow option to run".to_string())
            }
        }
        Marker::VerySlow => {
            if run_very_slow {
                Decision::Run
            } else {
                Decision::Skip("need --runveryslow option to run".to_string())
            }
        }
    }
}
