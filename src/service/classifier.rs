use crate::agent::RawDelta;

/// Cleaned-up pipeline event, before ids are attached by the lifecycle tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classified {
    Thinking(String),
    Content(String),
    Finished,
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    Calling,
    Thinking,
    Answering,
    Done,
    Failed,
}

/// Relabels raw deltas for the active mode. Never reorders and never emits
/// after a terminal.
#[derive(Debug)]
pub struct EventClassifier {
    thinking_enabled: bool,
    phase: Phase,
}

impl EventClassifier {
    pub fn new(thinking_enabled: bool) -> Self {
        Self { thinking_enabled, phase: Phase::Init }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.phase, Phase::Done | Phase::Failed)
    }

    /// The upstream call has been issued.
    pub fn start(&mut self) {
        if self.phase == Phase::Init {
            self.phase = Phase::Calling;
        }
    }

    pub fn classify(&mut self, delta: RawDelta) -> Vec<Classified> {
        if self.is_closed() {
            return Vec::new();
        }
        self.start();

        match delta {
            RawDelta::Failed(e) => {
                self.phase = Phase::Failed;
                vec![Classified::Failed(e.to_string())]
            }
            RawDelta::Fragment { thinking, content } => {
                let mut out = Vec::with_capacity(2);
                if let Some(text) = thinking.filter(|t| !t.is_empty()) {
                    // Reasoning after the answer started would render out of order.
                    if self.thinking_enabled && self.phase != Phase::Answering {
                        self.phase = Phase::Thinking;
                        out.push(Classified::Thinking(text));
                    }
                }
                if let Some(text) = content.filter(|c| !c.is_empty()) {
                    self.phase = Phase::Answering;
                    out.push(Classified::Content(text));
                }
                out
            }
        }
    }

    /// End of the delta sequence. Yields `Finished` unless a terminal was already produced.
    pub fn finish(&mut self) -> Option<Classified> {
        if self.is_closed() {
            return None;
        }
        self.phase = Phase::Done;
        Some(Classified::Finished)
    }
}
