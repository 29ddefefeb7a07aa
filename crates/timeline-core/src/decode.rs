//! The decoding loop.
//!
//! Each step re-encodes the full history, asks the backend for a
//! distribution, reshapes it with the temperature and picks one event that
//! is not among the last few emitted. The loop ends when the step budget is
//! spent or the pick is empty, the OOV marker, or a terminal event. A
//! streaming consumer may also end it early through the callback.

use std::fmt;
use std::ops::ControlFlow;
use std::sync::Arc;

use serde::Serialize;
use timeline_backend::{InferenceBackend, Vocabulary};
use timeline_common::config::TimelineConfig;
use timeline_common::{Result, TimelineError};

use crate::encode::encode_history;
use crate::sampler::{apply_temperature, select_event};
use crate::window::RecentWindow;

pub const DEFAULT_MAX_EVENTS: usize = 15;
pub const DEFAULT_TEMPERATURE: f64 = 1.0;
pub const DEFAULT_MAX_SEQUENCE_LEN: usize = 100;
pub const DEFAULT_TERMINAL_MARKER: &str = "discharge";

/// Fixed per-model settings, chosen once at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct DecoderOptions {
    /// Sequence length the model was trained with; inputs are `max_sequence_len - 1` ids.
    pub max_sequence_len: usize,
    /// Any event containing this substring ends the timeline.
    pub terminal_marker: String,
}

impl Default for DecoderOptions {
    fn default() -> Self {
        Self {
            max_sequence_len: DEFAULT_MAX_SEQUENCE_LEN,
            terminal_marker: DEFAULT_TERMINAL_MARKER.to_string(),
        }
    }
}

impl From<&TimelineConfig> for DecoderOptions {
    fn from(cfg: &TimelineConfig) -> Self {
        Self { max_sequence_len: cfg.max_sequence_len, terminal_marker: cfg.terminal_marker.clone() }
    }
}

/// Per-request knobs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecodeParams {
    pub temperature: f64,
    pub max_events: usize,
}

impl Default for DecodeParams {
    fn default() -> Self {
        Self { temperature: DEFAULT_TEMPERATURE, max_events: DEFAULT_MAX_EVENTS }
    }
}

impl DecodeParams {
    pub fn validate(&self) -> Result<()> {
        if !self.temperature.is_finite() || self.temperature <= 0.0 {
            return Err(TimelineError::invalid(format!(
                "temperature must be a positive number, got {}",
                self.temperature
            )));
        }
        if self.max_events == 0 {
            return Err(TimelineError::invalid("number of events to predict must be positive"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Step budget exhausted.
    Budget,
    /// Selection produced no word.
    NoCandidate,
    OutOfVocabulary,
    TerminalMarker,
    /// The event consumer asked to stop, e.g. a disconnected stream.
    Cancelled,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::Budget => "budget",
            StopReason::NoCandidate => "no_candidate",
            StopReason::OutOfVocabulary => "out_of_vocabulary",
            StopReason::TerminalMarker => "terminal_marker",
            StopReason::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    /// Seed text followed by every generated event, space-separated.
    pub timeline: String,
    pub events: Vec<String>,
    pub stop_reason: StopReason,
}

/// Owns the shared, read-only model and vocabulary. Cheap to clone.
#[derive(Clone)]
pub struct Decoder {
    backend: Arc<dyn InferenceBackend>,
    vocab: Arc<Vocabulary>,
    options: DecoderOptions,
}

impl fmt::Debug for Decoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Decoder")
            .field("backend", &self.backend.name())
            .field("vocab_len", &self.vocab.len())
            .field("options", &self.options)
            .finish()
    }
}

impl Decoder {
    pub fn new(backend: Arc<dyn InferenceBackend>, vocab: Arc<Vocabulary>, options: DecoderOptions) -> Result<Self> {
        if vocab.is_empty() {
            return Err(TimelineError::invalid("vocabulary is empty"));
        }
        if backend.vocab_size() == 0 {
            return Err(TimelineError::invalid(format!("backend {} has an empty output layer", backend.name())));
        }
        if options.max_sequence_len < 2 {
            return Err(TimelineError::invalid(format!(
                "max_sequence_len must be at least 2, got {}",
                options.max_sequence_len
            )));
        }
        if options.terminal_marker.is_empty() {
            return Err(TimelineError::invalid("terminal marker must not be empty"));
        }
        let expected = vocab.max_id() as usize + 1;
        if backend.vocab_size() != expected {
            tracing::warn!(
                target: "decode",
                "backend {} scores {} ids but the vocabulary spans {}",
                backend.name(),
                backend.vocab_size(),
                expected
            );
        }
        Ok(Self { backend, vocab, options })
    }

    pub fn backend_name(&self) -> &str { self.backend.name() }

    pub fn vocabulary(&self) -> &Vocabulary { &self.vocab }

    pub fn options(&self) -> &DecoderOptions { &self.options }

    pub fn decode(&self, seed_text: &str, params: DecodeParams) -> Result<Prediction> {
        self.decode_with_callback(seed_text, params, |_| ControlFlow::Continue(()))
    }

    /// Runs the loop, handing each accepted event to `emit` as soon as it is chosen.
    ///
    /// Returning `ControlFlow::Break` from `emit` ends the loop with
    /// [`StopReason::Cancelled`]; the event just emitted stays in the timeline.
    pub fn decode_with_callback<F: FnMut(&str) -> ControlFlow<()>>(
        &self,
        seed_text: &str,
        params: DecodeParams,
        mut emit: F,
    ) -> Result<Prediction> {
        params.validate()?;
        if seed_text.trim().is_empty() {
            return Err(TimelineError::invalid("seed text must not be empty"));
        }

        let mut history = seed_text.to_string();
        let mut window = RecentWindow::from_seed(seed_text);
        let mut events = Vec::new();
        let mut stop_reason = StopReason::Budget;

        for step in 0..params.max_events {
            let dist = self.next_distribution(&history, params.temperature)?;
            let word = match self.accept(select_event(&dist, &self.vocab, &window)) {
                Ok(word) => word,
                Err(reason) => {
                    tracing::debug!(target: "decode", step, %reason, "stopping");
                    stop_reason = reason;
                    break;
                }
            };
            tracing::debug!(target: "decode", step, event = word, "appending event");
            history.push(' ');
            history.push_str(word);
            window.push(word.to_string());
            events.push(word.to_string());
            if emit(word).is_break() {
                tracing::debug!(target: "decode", step, "consumer went away");
                stop_reason = StopReason::Cancelled;
                break;
            }
        }

        tracing::info!(
            target: "decode",
            backend = self.backend.name(),
            generated = events.len(),
            %stop_reason,
            "decode finished"
        );
        Ok(Prediction { timeline: history, events, stop_reason })
    }

    fn next_distribution(&self, history: &str, temperature: f64) -> Result<Vec<f64>> {
        let sequence = encode_history(&self.vocab, history, self.options.max_sequence_len);
        let raw = self.backend.predict(&sequence).map_err(|e| match e {
            TimelineError::Inference(_) => e,
            other => TimelineError::inference(other.to_string()),
        })?;
        if raw.len() != self.backend.vocab_size() {
            return Err(TimelineError::inference(format!(
                "backend returned {} probabilities, expected {}",
                raw.len(),
                self.backend.vocab_size()
            )));
        }
        if let Some(bad) = raw.iter().find(|p| !p.is_finite() || **p < 0.0) {
            return Err(TimelineError::inference(format!("backend returned invalid probability {bad}")));
        }
        Ok(apply_temperature(&raw, temperature))
    }

    /// Stop checks run before anything is appended.
    fn accept<'w>(&self, choice: Option<&'w str>) -> std::result::Result<&'w str, StopReason> {
        let word = match choice {
            Some(word) if !word.is_empty() => word,
            _ => return Err(StopReason::NoCandidate),
        };
        if self.vocab.oov_token() == Some(word) {
            return Err(StopReason::OutOfVocabulary);
        }
        if word.contains(self.options.terminal_marker.as_str()) {
            return Err(StopReason::TerminalMarker);
        }
        Ok(word)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use timeline_backend::mock::MockBackend;

    fn decoder(words: &[&str], ranking: &[&str]) -> Decoder {
        let vocab = Vocabulary::from_words(Some("<oov>"), words);
        let ids = ranking.iter().map(|w| vocab.id(w).unwrap()).collect();
        let backend = MockBackend::ranked(vocab.max_id() as usize + 1, ids);
        Decoder::new(Arc::new(backend), Arc::new(vocab), DecoderOptions::default()).unwrap()
    }

    #[test]
    fn accept_classifies_stops() {
        let d = decoder(&["a"], &["a"]);
        assert_eq!(d.accept(None), Err(StopReason::NoCandidate));
        assert_eq!(d.accept(Some("")), Err(StopReason::NoCandidate));
        assert_eq!(d.accept(Some("<oov>")), Err(StopReason::OutOfVocabulary));
        assert_eq!(d.accept(Some("discharge_home")), Err(StopReason::TerminalMarker));
        assert_eq!(d.accept(Some("predischarge")), Err(StopReason::TerminalMarker));
        assert_eq!(d.accept(Some("labwork")), Ok("labwork"));
    }

    #[test]
    fn params_reject_bad_temperature() {
        for t in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let params = DecodeParams { temperature: t, ..DecodeParams::default() };
            assert!(params.validate().unwrap_err().is_client_error());
        }
    }

    #[test]
    fn params_reject_zero_budget() {
        let params = DecodeParams { max_events: 0, ..DecodeParams::default() };
        assert!(params.validate().is_err());
    }

    #[test]
    fn stop_reason_names() {
        assert_eq!(StopReason::OutOfVocabulary.to_string(), "out_of_vocabulary");
        assert_eq!(StopReason::TerminalMarker.as_str(), "terminal_marker");
        assert_eq!(serde_json::to_string(&StopReason::Cancelled).unwrap(), "\"cancelled\"");
    }
}
