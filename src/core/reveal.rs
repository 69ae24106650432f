//! Word-by-word reveal of thinking steps
//!
//! Simulates a live "thinking" readout from pre-computed steps: each step's
//! words appear one at a time at jittered short intervals, with a longer pause
//! between steps. The state machine is pure (`advance`); `play` is the timer
//! driver. An activation runs its reveal exactly once: replaying is inert and
//! the completion result is reported only for the run that actually revealed.

use std::time::Duration;

use rand::Rng;

/// Lead-in before the first word appears.
const INITIAL_DELAY_MS: u64 = 300;
/// Word ticks land anywhere in this range.
const WORD_DELAY_MIN_MS: u64 = 100;
const WORD_DELAY_MAX_MS: u64 = 150;
/// Pause between consecutive steps.
const STEP_PAUSE_MS: u64 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevealState {
    Idle,
    Revealing,
    Complete,
}

/// Outcome of one transition of the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Advance {
    /// A word was appended to the current step's display slot.
    Word,
    /// The current step is exhausted; pause before the next one.
    StepDone,
    Finished,
}

pub struct RevealAnimation {
    /// Whitespace-split words per step, fixed at activation.
    words: Vec<Vec<String>>,
    /// One display slot per step; only these strings ever reach the UI.
    display: Vec<String>,
    step: usize,
    word: usize,
    state: RevealState,
    /// User-controlled visibility toggle; does not affect reveal progress.
    collapsed: bool,
    played: bool,
}

impl RevealAnimation {
    pub fn new(steps: &[String]) -> Self {
        let words = steps
            .iter()
            .map(|s| s.split_whitespace().map(str::to_string).collect())
            .collect::<Vec<Vec<String>>>();
        let display = vec![String::new(); words.len()];

        Self {
            words,
            display,
            step: 0,
            word: 0,
            state: RevealState::Idle,
            collapsed: false,
            played: false,
        }
    }

    pub fn state(&self) -> RevealState {
        self.state
    }

    pub fn display(&self) -> &[String] {
        &self.display
    }

    pub fn is_collapsed(&self) -> bool {
        self.collapsed
    }

    pub fn set_collapsed(&mut self, collapsed: bool) {
        self.collapsed = collapsed;
    }

    /// One transition: reveal the next word, close out the current step, or
    /// report completion once the cursor has passed the last step.
    fn advance(&mut self) -> Advance {
        if self.state == RevealState::Complete {
            return Advance::Finished;
        }
        self.state = RevealState::Revealing;

        if self.step >= self.words.len() {
            self.state = RevealState::Complete;
            return Advance::Finished;
        }

        if self.word < self.words[self.step].len() {
            let next = self.words[self.step][self.word].clone();
            let slot = &mut self.display[self.step];
            if slot.is_empty() {
                slot.push_str("• ");
            } else {
                slot.push(' ');
            }
            slot.push_str(&next);
            self.word += 1;
            return Advance::Word;
        }

        self.step += 1;
        self.word = 0;
        if self.step >= self.words.len() {
            self.state = RevealState::Complete;
            Advance::Finished
        } else {
            Advance::StepDone
        }
    }

    /// Drive the reveal to completion, invoking `on_progress` with the display
    /// slots after every revealed word (each call doubles as a request to
    /// scroll the hosting view to its latest content).
    ///
    /// Returns `true` for the run that performed the reveal; subsequent calls
    /// on the same activation return `false` immediately, without mutating the
    /// display or re-running. Aborting the driving task between ticks cancels
    /// the remaining schedule with no further display mutation.
    pub async fn play<F>(&mut self, mut on_progress: F) -> bool
    where
        F: FnMut(&[String]) + Send,
    {
        if self.played {
            return false;
        }
        self.played = true;

        tokio::time::sleep(Duration::from_millis(INITIAL_DELAY_MS)).await;

        loop {
            match self.advance() {
                Advance::Word => {
                    on_progress(&self.display);
                    let delay =
                        rand::thread_rng().gen_range(WORD_DELAY_MIN_MS..=WORD_DELAY_MAX_MS);
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                }
                Advance::StepDone => {
                    tokio::time::sleep(Duration::from_millis(STEP_PAUSE_MS)).await;
                }
                Advance::Finished => return true,
            }
        }
    }
}
