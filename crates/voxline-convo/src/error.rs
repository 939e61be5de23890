use thiserror::Error;

/// Errors that are fatal to a conversation.
///
/// Late acknowledgement marks and repeated stop requests are not errors;
/// they are logged where they occur and ignored.
#[derive(Debug, Error)]
pub enum ConvoError {
    /// Audio handed to the voice activity gate was not window-aligned.
    #[error("audio must be a multiple of the {expected}-byte vad window, got {got} bytes")]
    Alignment { expected: usize, got: usize },

    /// The underlying speech detector failed.
    #[error("vad model failure: {0}")]
    VadModel(String),

    /// An ended speech segment matched no turn state.
    #[error("ended speech segment matched no turn state")]
    UnmatchedTurnState,
}
