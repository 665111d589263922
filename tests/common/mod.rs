//! Shared test utilities

#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use skyris_voice::SpeechConfig;
use skyris_voice::voice::{
    AudioInput, CaptureConstraints, CaptureError, RecognitionSession, Recognizer,
    RecognizerError, RecognizerOptions, SAMPLE_RATE, SessionError, SessionEvent, SessionOptions,
    SessionState, SpeechSession, Utterance,
};

/// Samples per captured frame in tests
pub const FRAME: usize = 4096;

/// Wall time covered by one frame at 16 kHz
pub const FRAME_MS: u64 = 256;

pub fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

/// Generate sine wave audio samples
#[allow(clippy::cast_precision_loss)]
pub fn sine(frequency: f32, samples: usize, amplitude: f32) -> Vec<f32> {
    (0..samples)
        .map(|i| {
            let t = i as f32 / SAMPLE_RATE as f32;
            amplitude * (2.0 * std::f32::consts::PI * frequency * t).sin()
        })
        .collect()
}

/// A frame of broadband speech-like sound, well above the default threshold
pub fn loud_frame() -> Vec<f32> {
    let mut frame = vec![0.0; FRAME];
    for frequency in [220.0, 470.0, 910.0, 1730.0, 3100.0] {
        for (out, s) in frame.iter_mut().zip(sine(frequency, FRAME, 0.15)) {
            *out += s;
        }
    }
    frame
}

pub fn quiet_frame() -> Vec<f32> {
    vec![0.0; FRAME]
}

/// Observable microphone state
#[derive(Debug, Default)]
pub struct MicState {
    pub open: bool,
    pub opens: u32,
    pub closes: u32,
    pub fail_with: Option<CaptureError>,
}

/// Microphone stand-in; frames are fed to the session directly
#[derive(Debug, Clone, Default)]
pub struct MockInput(pub Rc<RefCell<MicState>>);

impl AudioInput for MockInput {
    fn open(&mut self, _: &CaptureConstraints) -> Result<(), CaptureError> {
        let mut state = self.0.borrow_mut();
        if state.open {
            return Ok(());
        }
        if let Some(error) = state.fail_with.clone() {
            return Err(error);
        }
        state.open = true;
        state.opens += 1;
        Ok(())
    }

    fn close(&mut self) {
        let mut state = self.0.borrow_mut();
        if state.open {
            state.open = false;
            state.closes += 1;
        }
    }

    fn is_open(&self) -> bool {
        self.0.borrow().open
    }
}

/// Calls observed by the scripted engine
#[derive(Debug, Default)]
pub struct EngineState {
    pub initialized: u32,
    pub started: u32,
    pub stopped: u32,
    /// Upcoming `start` calls that fail
    pub fail_starts: u32,
}

/// Recognition engine stand-in; events are fed to the session directly
#[derive(Debug, Clone, Default)]
pub struct ScriptedRecognizer(pub Rc<RefCell<EngineState>>);

impl Recognizer for ScriptedRecognizer {
    fn initialize(&mut self, _: &RecognizerOptions) -> Result<(), RecognizerError> {
        self.0.borrow_mut().initialized += 1;
        Ok(())
    }

    fn start(&mut self) -> Result<(), RecognizerError> {
        let mut state = self.0.borrow_mut();
        state.started += 1;
        if state.fail_starts > 0 {
            state.fail_starts -= 1;
            return Err(RecognizerError("engine busy".to_string()));
        }
        Ok(())
    }

    fn stop(&mut self) {
        self.0.borrow_mut().stopped += 1;
    }
}

/// Everything the session emitted, in order
#[derive(Debug, Clone, Default)]
pub struct EventLog(pub Rc<RefCell<Vec<SessionEvent>>>);

impl EventLog {
    pub fn count(&self, matches: impl Fn(&SessionEvent) -> bool) -> usize {
        self.0.borrow().iter().filter(|e| matches(e)).count()
    }

    pub fn utterances(&self) -> Vec<Utterance> {
        self.0
            .borrow()
            .iter()
            .filter_map(|e| match e {
                SessionEvent::SendToAi(u) => Some(u.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn errors(&self) -> Vec<SessionError> {
        self.0
            .borrow()
            .iter()
            .filter_map(|e| match e {
                SessionEvent::Error(err) => Some(err.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn states(&self) -> Vec<SessionState> {
        self.0
            .borrow()
            .iter()
            .filter_map(|e| match e {
                SessionEvent::StatusChange(s) => Some(*s),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.0.borrow_mut().clear();
    }
}

/// A session wired to mocks
pub struct Harness {
    pub session: SpeechSession,
    pub mic: MockInput,
    pub engine: ScriptedRecognizer,
    pub events: EventLog,
}

/// Session with a scripted recognition engine
pub fn harness_with(config: SpeechConfig) -> Harness {
    let mic = MockInput::default();
    let engine = ScriptedRecognizer::default();
    let events = EventLog::default();

    let recognition = RecognitionSession::new(Box::new(engine.clone()), SessionOptions::default());
    let sink = events.clone();
    let session = SpeechSession::new(config, Box::new(mic.clone()), recognition, move |event| {
        sink.0.borrow_mut().push(event);
    });

    Harness {
        session,
        mic,
        engine,
        events,
    }
}

pub fn harness() -> Harness {
    harness_with(SpeechConfig::default())
}

impl Harness {
    /// Feed frames one per frame period starting at `from`, polling timers
    /// after each; returns the time after the last frame
    pub fn feed(&mut self, frame: &[f32], count: usize, from: std::time::Instant) -> std::time::Instant {
        let mut now = from;
        for _ in 0..count {
            self.session.process_frame(frame, now);
            self.session.poll_timers(now);
            now += ms(FRAME_MS);
        }
        now
    }

    /// Speak for a few frames then stay quiet long enough for the silence
    /// window to pass
    pub fn utter(&mut self, from: std::time::Instant) -> std::time::Instant {
        let now = self.feed(&loud_frame(), 4, from);
        let now = self.feed(&quiet_frame(), 24, now);
        self.session.poll_timers(now);
        now
    }
}
