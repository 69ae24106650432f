//! Core playground components
//!
//! This module contains the turn orchestration, the streaming text
//! accumulator, the thinking-step generator and the reveal state machine.

mod accumulator;
mod engine;
mod reveal;
mod thinking;

pub use accumulator::StreamingAccumulator;
pub use engine::{
    ChatEngine, ChatError, PanelEvent, PanelId, PanelSnapshot, PlaygroundSnapshot, SubmitReceipt,
    ERROR_NOTICE, MAX_PROMPT_CHARS,
};
pub use reveal::{RevealAnimation, RevealState};
pub use thinking::{ThinkingStepGenerator, FALLBACK_STEP};
