/*!
 * Fire-and-forget progress reporting.
 */

use std::fmt;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use crate::translation::tokens::TokenAccumulator;

/// Stage of a pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelinePhase {
    Classifying,
    Preflight,
    Extracting,
    Translating,
    PostProcessing,
    Compiling,
    Rescuing,
    Finished,
}

impl PipelinePhase {
    /// Share of the whole run covered by this phase, as `(start, end)`
    pub fn span(&self) -> (f32, f32) {
        match self {
            Self::Classifying => (0.0, 0.02),
            Self::Preflight => (0.02, 0.04),
            Self::Extracting => (0.04, 0.05),
            Self::Translating => (0.05, 0.75),
            Self::PostProcessing => (0.75, 0.78),
            Self::Compiling => (0.78, 0.95),
            Self::Rescuing => (0.95, 0.99),
            Self::Finished => (1.0, 1.0),
        }
    }

    /// Overall fraction for a fraction of this phase
    pub fn overall(&self, fraction: f32) -> f32 {
        let (start, end) = self.span();
        start + (end - start) * fraction.clamp(0.0, 1.0)
    }
}

impl fmt::Display for PipelinePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Classifying => "classifying",
            Self::Preflight => "pre-flight",
            Self::Extracting => "extracting",
            Self::Translating => "translating",
            Self::PostProcessing => "post-processing",
            Self::Compiling => "compiling",
            Self::Rescuing => "rescuing",
            Self::Finished => "finished",
        };
        write!(f, "{}", name)
    }
}

/// One progress update
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressEvent {
    pub phase: PipelinePhase,
    /// Completion of the current phase, 0..=1
    pub fraction: f32,
    /// Completion of the whole run, 0..=1
    pub overall: f32,
    pub message: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Sending half of a progress channel; sends never block or fail
#[derive(Debug, Clone, Default)]
pub struct ProgressSink {
    sender: Option<UnboundedSender<ProgressEvent>>,
}

impl ProgressSink {
    /// Sink and the receiver reading its events
    pub fn channel() -> (Self, UnboundedReceiver<ProgressEvent>) {
        let (sender, receiver) = unbounded_channel();
        (Self { sender: Some(sender) }, receiver)
    }

    /// Sink dropping every event
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn send(&self, event: ProgressEvent) {
        if let Some(sender) = &self.sender {
            // A dropped receiver only means nobody is listening
            let _ = sender.send(event);
        }
    }

    /// Emit an event with the current token totals
    pub fn report(&self, phase: PipelinePhase, fraction: f32, message: impl Into<String>, tokens: &TokenAccumulator) {
        self.send(ProgressEvent {
            phase,
            fraction: fraction.clamp(0.0, 1.0),
            overall: phase.overall(fraction),
            message: message.into(),
            input_tokens: tokens.input_tokens(),
            output_tokens: tokens.output_tokens(),
        });
    }
}
