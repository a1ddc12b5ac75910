//! Error type for encoding and program management.

use core::fmt;

use crate::program::LabelId;

/// Errors surfaced by the encoder and the program model.
///
/// The encode path itself has exactly one failure mode:
/// [`Error::ImpossibleInstruction`]. Unresolved labels are *not* errors:
/// they encode with placeholder displacements and flag the context for an
/// extra layout pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Error {
    /// The byte-level encoder rejected the request: the mnemonic does not
    /// exist for the target mode, or the operand combination cannot be
    /// encoded.
    ImpossibleInstruction,

    /// A label id that was never created by this program.
    UnknownLabel {
        /// The offending label id.
        label: LabelId,
    },

    /// A label was bound to a position more than once.
    LabelRedefined {
        /// The label that was bound twice.
        label: LabelId,
    },

    /// An external label cannot be bound to a program position; its address
    /// belongs to the linking stage.
    ExternalLabelBound {
        /// The external label.
        label: LabelId,
    },

    /// Layout did not reach a fixed point within the allowed number of
    /// passes (possible oscillation).
    LayoutDiverged {
        /// Maximum number of layout passes allowed.
        max_passes: usize,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ImpossibleInstruction => write!(f, "impossible instruction"),
            Error::UnknownLabel { label } => write!(f, "unknown label {}", label),
            Error::LabelRedefined { label } => write!(f, "label {} bound more than once", label),
            Error::ExternalLabelBound { label } => {
                write!(f, "external label {} cannot be bound", label)
            }
            Error::LayoutDiverged { max_passes } => {
                write!(
                    f,
                    "layout exceeded maximum of {} passes (possible oscillation)",
                    max_passes
                )
            }
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}
