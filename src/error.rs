//! Error taxonomy for the looper core.
//!
//! Errors raised on the audio thread carry only `&'static str` payloads so that
//! constructing them never allocates.

use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum LooperError {
    /// A second channel tried to define the global loop length.
    #[error("loop length is already set to {current} samples")]
    LoopLengthAlreadySet { current: usize },

    /// A loop length of zero samples was requested.
    #[error("loop length must be greater than zero")]
    InvalidLoopLength,

    /// A stored loop does not fit the preallocated loop buffers.
    #[error("loop of {length} samples exceeds the {capacity}-sample loop buffer")]
    LoopExceedsCapacity { length: usize, capacity: usize },

    /// Best-effort enqueue failed; the command was dropped.
    #[error("command queue is full, command dropped")]
    CommandQueueFull,

    /// The handoff queue towards the audio thread is full.
    #[error("handoff queue is full")]
    HandoffQueueFull,

    /// A plugin node reported an error for one block.
    #[error("plugin processing failed: {reason}")]
    PluginProcessingFailure { reason: &'static str },

    /// A command with an invalid target/opcode/payload combination.
    #[error("malformed command")]
    MalformedCommand,

    #[error("channel index {0} out of range")]
    ChannelOutOfRange(usize),

    #[error("fx slot {0} out of range")]
    SlotOutOfRange(usize),

    #[error("unknown plugin '{0}'")]
    UnknownPlugin(String),

    #[error("invalid plugin state: {0}")]
    InvalidPluginState(String),

    /// Tempo changes are only accepted while the transport is stopped.
    #[error("stop the transport before changing the tempo")]
    TransportRolling,

    /// The audio thread did not answer a snapshot request in time.
    #[error("timed out waiting for the audio thread")]
    SnapshotTimeout,
}
