//! Turn-taking controller integration tests
//!
//! Drives the session with mock devices and explicit timestamps

use std::time::Instant;

use skyris_voice::SpeechConfig;
use skyris_voice::voice::{
    CaptureError, ConversationTurn, RecognitionErrorCode, RecognitionEvent, RecognitionResult, SessionError,
    SessionEvent, SessionRuntime, SessionState,
};
use skyris_voice::voice::wav::WAV_HEADER_LEN;

mod common;

use common::{FRAME_MS, harness, harness_with, loud_frame, ms, quiet_frame};

fn result(text: &str, is_final: bool) -> RecognitionEvent {
    RecognitionEvent::Result(RecognitionResult {
        transcript: text.to_string(),
        is_final,
    })
}

#[test]
fn test_start_opens_mic_and_recognizer_once() {
    let mut h = harness();
    let t0 = Instant::now();

    h.session.start(t0).unwrap();
    h.session.start(t0 + ms(10)).unwrap();

    assert_eq!(h.session.status(), SessionState::Listening);
    assert_eq!(h.mic.0.borrow().opens, 1);
    assert_eq!(h.engine.0.borrow().started, 1);
    assert_eq!(h.events.states(), vec![SessionState::Listening]);
}

#[test]
fn test_full_turn() {
    let mut h = harness();
    let t0 = Instant::now();
    h.session.start(t0).unwrap();

    let now = h.feed(&loud_frame(), 2, t0);
    h.session.handle_recognition(result("hello", false), now);
    h.session.handle_recognition(result("hello owl", true), now);
    assert_eq!(h.session.current_transcript(), "hello owl");

    h.utter(now);

    assert_eq!(h.session.status(), SessionState::AiProcessing);
    assert!(!h.mic.0.borrow().open);

    let utterances = h.events.utterances();
    assert_eq!(utterances.len(), 1);
    let utterance = &utterances[0];
    assert_eq!(utterance.transcript, "hello owl");
    assert_eq!(
        utterance.conversation_context,
        vec![ConversationTurn::user("hello owl")]
    );
    assert_eq!(&utterance.audio_wav[0..4], b"RIFF");
    assert!(utterance.audio_wav.len() > WAV_HEADER_LEN);

    assert_eq!(h.events.count(|e| matches!(e, SessionEvent::SpeechStart)), 1);
    assert_eq!(h.events.count(|e| matches!(e, SessionEvent::SpeechEnd)), 1);
    assert_eq!(h.events.count(|e| matches!(e, SessionEvent::Silence)), 1);

    let states = h.events.states();
    assert_eq!(
        states,
        vec![
            SessionState::Listening,
            SessionState::UserSpeaking,
            SessionState::Recognizing,
            SessionState::AiProcessing,
        ]
    );
}

#[test]
fn test_silence_event_precedes_hand_off() {
    let mut h = harness();
    let t0 = Instant::now();
    h.session.start(t0).unwrap();
    h.utter(t0);

    let events = h.events.0.borrow();
    let silence = events
        .iter()
        .position(|e| matches!(e, SessionEvent::Silence))
        .unwrap();
    let send = events
        .iter()
        .position(|e| matches!(e, SessionEvent::SendToAi(_)))
        .unwrap();
    assert!(silence < send);
}

#[test]
fn test_short_dip_keeps_utterance_open() {
    let mut h = harness();
    let t0 = Instant::now();
    h.session.start(t0).unwrap();

    let now = h.feed(&loud_frame(), 3, t0);
    let now = h.feed(&quiet_frame(), 1, now);
    h.feed(&loud_frame(), 3, now);

    assert!(h.session.has_utterance());
    assert_eq!(h.events.count(|e| matches!(e, SessionEvent::SpeechEnd)), 0);
    assert!(h.events.utterances().is_empty());
}

#[test]
fn test_no_speech_sleeps_once() {
    let mut h = harness();
    let t0 = Instant::now();
    h.session.start(t0).unwrap();

    h.session.poll_timers(t0 + ms(9_999));
    assert_eq!(h.session.status(), SessionState::Listening);

    h.session.poll_timers(t0 + ms(10_000));
    assert_eq!(h.session.status(), SessionState::Sleeping);

    h.session.poll_timers(t0 + ms(20_000));
    h.session.poll_timers(t0 + ms(40_000));
    h.session.sleep();

    assert_eq!(h.events.count(|e| matches!(e, SessionEvent::Sleep)), 1);
    assert!(h.session.is_sleeping());
    // Wake detection keeps the microphone
    assert!(h.mic.0.borrow().open);
}

#[test]
fn test_speech_cancels_no_speech_timer() {
    let mut h = harness();
    let t0 = Instant::now();
    h.session.start(t0).unwrap();

    let now = h.feed(&loud_frame(), 50, t0);
    assert!(now > t0 + ms(10_000));
    assert_eq!(h.session.status(), SessionState::UserSpeaking);
}

#[test]
fn test_sound_wakes_after_debounce() {
    let mut h = harness();
    let t0 = Instant::now();
    h.session.start(t0).unwrap();
    h.session.sleep();
    let started = h.engine.0.borrow().started;

    let t1 = t0 + ms(1_000);
    h.session.process_frame(&loud_frame(), t1);
    assert!(h.session.is_sleeping());
    // Nothing is buffered while asleep
    assert!(!h.session.has_utterance());

    h.session.poll_timers(t1 + ms(299));
    assert!(h.session.is_sleeping());

    h.session.poll_timers(t1 + ms(300));
    assert_eq!(h.session.status(), SessionState::Listening);
    assert_eq!(h.events.count(|e| matches!(e, SessionEvent::WakeUp)), 1);
    assert_eq!(h.engine.0.borrow().started, started + 1);
}

#[test]
fn test_wake_up_when_awake_is_noop() {
    let mut h = harness();
    let t0 = Instant::now();
    h.session.start(t0).unwrap();
    h.events.clear();

    h.session.wake_up(t0 + ms(5));
    h.session.wake_up(t0 + ms(6));

    assert_eq!(h.engine.0.borrow().started, 1);
    assert_eq!(h.events.count(|e| matches!(e, SessionEvent::WakeUp)), 0);
    assert!(h.events.states().is_empty());
}

#[test]
fn test_manual_wake_and_start_from_sleep() {
    let mut h = harness();
    let t0 = Instant::now();
    h.session.start(t0).unwrap();
    h.session.sleep();

    h.session.start(t0 + ms(100)).unwrap();
    assert_eq!(h.session.status(), SessionState::Listening);
    assert_eq!(h.events.count(|e| matches!(e, SessionEvent::WakeUp)), 1);

    h.session.wake_up(t0 + ms(200));
    assert_eq!(h.events.count(|e| matches!(e, SessionEvent::WakeUp)), 1);
}

#[test]
fn test_stop_discards_utterance() {
    let mut h = harness();
    let t0 = Instant::now();
    h.session.start(t0).unwrap();

    let now = h.feed(&loud_frame(), 4, t0);
    let now = h.feed(&quiet_frame(), 2, now);
    assert!(h.session.has_utterance());

    h.session.stop();
    assert_eq!(h.session.status(), SessionState::Idle);
    assert!(!h.session.has_utterance());
    assert!(!h.mic.0.borrow().open);
    assert_eq!(h.session.next_deadline(), None);

    h.session.poll_timers(now + ms(60_000));
    h.feed(&quiet_frame(), 10, now);
    assert!(h.events.utterances().is_empty());
}

#[test]
fn test_ai_turn_and_auto_restart() {
    let mut h = harness();
    let t0 = Instant::now();
    h.session.start(t0).unwrap();

    let now = h.feed(&loud_frame(), 1, t0);
    h.session.handle_recognition(result("what is your name", true), now);
    let now = h.utter(now);
    // The engine confirms the stop issued at hand-off
    h.session.handle_recognition(RecognitionEvent::Ended, now);

    h.session.set_ai_speaking(true, Some("I am Skyris"), now);
    assert_eq!(h.session.status(), SessionState::AiSpeaking);
    assert!(h.session.is_waiting_for_response());

    h.session.set_ai_speaking(false, None, now + ms(2_000));
    assert_eq!(h.session.status(), SessionState::Idle);

    h.session.poll_timers(now + ms(2_499));
    assert_eq!(h.session.status(), SessionState::Idle);
    h.session.poll_timers(now + ms(2_500));
    assert_eq!(h.session.status(), SessionState::Listening);

    let context = h.session.conversation_context();
    assert_eq!(context.len(), 2);
    assert_eq!(context[0].content, "what is your name");
    assert_eq!(context[1].content, "I am Skyris");

    // The next utterance carries the exchange so far plus its own turn
    let later = now + ms(3_000);
    h.feed(&loud_frame(), 1, later);
    h.session.handle_recognition(result("nice to meet you", true), later);
    h.utter(later + ms(FRAME_MS));

    let utterances = h.events.utterances();
    assert_eq!(utterances.len(), 2);
    let mut expected = context;
    expected.push(ConversationTurn::user("nice to meet you"));
    assert_eq!(utterances[1].conversation_context, expected);
    assert_eq!(h.session.conversation_context(), expected);
}

#[test]
fn test_without_auto_restart_idle_falls_asleep() {
    let config = SpeechConfig {
        auto_restart: false,
        ..SpeechConfig::default()
    };
    let mut h = harness_with(config);
    let t0 = Instant::now();
    h.session.start(t0).unwrap();
    let now = h.utter(t0);

    h.session.interrupt_ai_response(now);
    assert_eq!(h.session.status(), SessionState::Idle);

    h.session.poll_timers(now + ms(9_999));
    assert_eq!(h.session.status(), SessionState::Idle);
    h.session.poll_timers(now + ms(10_000));
    assert_eq!(h.session.status(), SessionState::Sleeping);
}

#[test]
fn test_continuous_mode_toggle() {
    let mut h = harness();
    h.session.set_continuous_mode(false);
    let t0 = Instant::now();
    h.session.start(t0).unwrap();
    let now = h.utter(t0);

    h.session.set_ai_speaking(false, None, now);
    h.session.poll_timers(now + ms(1_000));
    assert_eq!(h.session.status(), SessionState::Idle);
}

#[test]
fn test_ai_speaking_abandons_user_turn() {
    let mut h = harness();
    let t0 = Instant::now();
    h.session.start(t0).unwrap();
    let now = h.feed(&loud_frame(), 3, t0);
    assert_eq!(h.session.status(), SessionState::UserSpeaking);

    h.session.set_ai_speaking(true, None, now);
    assert_eq!(h.session.status(), SessionState::AiSpeaking);
    assert!(!h.session.has_utterance());

    h.feed(&quiet_frame(), 20, now);
    h.session.poll_timers(now + ms(30_000));
    assert!(h.events.utterances().is_empty());
    assert_eq!(h.session.status(), SessionState::AiSpeaking);
}

#[test]
fn test_barge_in_start_during_ai_turn() {
    let mut h = harness();
    let t0 = Instant::now();
    h.session.start(t0).unwrap();
    let now = h.utter(t0);
    h.session.set_ai_speaking(true, Some("long answer"), now);

    h.session.start(now + ms(100)).unwrap();
    assert_eq!(h.session.status(), SessionState::Listening);
    assert!(h.mic.0.borrow().open);
}

#[test]
fn test_conversation_bound() {
    let mut h = harness();
    let t0 = Instant::now();

    for i in 0..25 {
        h.session.set_ai_speaking(true, Some(&format!("reply {i}")), t0);
    }

    let context = h.session.conversation_context();
    assert_eq!(context.len(), 20);
    assert_eq!(context[0].content, "reply 5");
    assert_eq!(context[19].content, "reply 24");

    h.session.clear_conversation_context();
    assert!(h.session.conversation_context().is_empty());
}

#[test]
fn test_no_speech_error_is_suppressed() {
    let mut h = harness();
    let t0 = Instant::now();
    h.session.start(t0).unwrap();

    h.session
        .handle_recognition(RecognitionEvent::Error(RecognitionErrorCode::NoSpeech), t0);
    h.session
        .handle_recognition(RecognitionEvent::Error(RecognitionErrorCode::Aborted), t0);

    assert!(h.events.errors().is_empty());
    assert_eq!(h.session.status(), SessionState::Listening);
}

#[test]
fn test_audio_capture_error_goes_idle() {
    let mut h = harness();
    let t0 = Instant::now();
    h.session.start(t0).unwrap();
    h.feed(&loud_frame(), 2, t0);

    h.session.handle_recognition(
        RecognitionEvent::Error(RecognitionErrorCode::AudioCapture),
        t0 + ms(600),
    );

    assert_eq!(
        h.events.errors(),
        vec![SessionError::Recognition(RecognitionErrorCode::AudioCapture)]
    );
    assert_eq!(h.session.status(), SessionState::Idle);
    assert!(!h.session.has_utterance());
    assert!(!h.mic.0.borrow().open);
}

#[test]
fn test_permission_denied_on_start() {
    let mut h = harness();
    h.mic.0.borrow_mut().fail_with = Some(CaptureError::PermissionDenied);

    let err = h.session.start(Instant::now()).unwrap_err();

    assert_eq!(err, SessionError::Capture(CaptureError::PermissionDenied));
    assert_eq!(h.events.errors(), vec![err]);
    assert_eq!(h.session.status(), SessionState::Idle);
    assert_eq!(h.engine.0.borrow().started, 0);
}

#[test]
fn test_recognizer_failure_falls_back_to_local() {
    let mut h = harness();
    h.engine.0.borrow_mut().fail_starts = 2;

    h.session.start(Instant::now()).unwrap();

    assert_eq!(h.session.status(), SessionState::Listening);
    assert!(h.session.recognition().is_local_only());
    assert!(h.events.errors().is_empty());
}

#[test]
fn test_recognizer_failure_without_fallback() {
    let config = SpeechConfig {
        fallback_to_local_capture: false,
        ..SpeechConfig::default()
    };
    let mut h = harness_with(config);
    h.engine.0.borrow_mut().fail_starts = 2;

    let err = h.session.start(Instant::now()).unwrap_err();

    assert!(matches!(err, SessionError::RecognitionUnavailable(_)));
    assert_eq!(h.session.status(), SessionState::Idle);
    assert!(!h.mic.0.borrow().open);
}

#[test]
fn test_local_only_session_still_hands_off_audio() {
    let mut h = harness();
    h.engine.0.borrow_mut().fail_starts = 2;
    let t0 = Instant::now();
    h.session.start(t0).unwrap();

    h.utter(t0);

    let utterances = h.events.utterances();
    assert_eq!(utterances.len(), 1);
    assert!(utterances[0].transcript.is_empty());
    assert!(h.session.conversation_context().is_empty());
}

#[test]
fn test_ghost_events_after_stop() {
    let mut h = harness();
    let t0 = Instant::now();
    h.session.start(t0).unwrap();
    h.session.stop();
    h.events.clear();

    h.session.handle_recognition(result("ghost", true), t0 + ms(10));
    h.session.handle_recognition(RecognitionEvent::Ended, t0 + ms(20));
    h.session.poll_timers(t0 + ms(5_000));

    assert!(h.events.0.borrow().is_empty());
    assert_eq!(h.session.current_transcript(), "");
    assert_eq!(h.engine.0.borrow().started, 1);
}

#[test]
fn test_stale_end_after_quick_restart() {
    let mut h = harness();
    let t0 = Instant::now();
    h.session.start(t0).unwrap();
    h.session.stop();
    h.session.start(t0 + ms(50)).unwrap();
    assert_eq!(h.engine.0.borrow().started, 2);

    // The first run's end confirmation arrives after the second start
    h.session.handle_recognition(RecognitionEvent::Ended, t0 + ms(80));
    assert_eq!(h.session.next_deadline(), Some(t0 + ms(10_050)));

    h.session.poll_timers(t0 + ms(700));
    assert_eq!(h.engine.0.borrow().started, 2);
    assert!(h.events.errors().is_empty());
    assert_eq!(h.session.status(), SessionState::Listening);

    h.session.handle_recognition(result("fresh", false), t0 + ms(900));
    assert_eq!(h.session.current_transcript(), "fresh");
}

#[test]
fn test_stale_result_after_quick_restart_keeps_transcript() {
    let mut h = harness();
    let t0 = Instant::now();
    h.session.start(t0).unwrap();
    h.session.handle_recognition(result("old words", false), t0 + ms(10));
    h.session.stop();
    h.session.start(t0 + ms(50)).unwrap();

    h.session.handle_recognition(result("old words again", true), t0 + ms(60));
    assert_eq!(h.session.current_transcript(), "");

    h.session.handle_recognition(RecognitionEvent::Ended, t0 + ms(70));
    h.session.handle_recognition(result("new words", false), t0 + ms(90));
    assert_eq!(h.session.current_transcript(), "new words");
}

#[test]
fn test_stale_end_after_sleep_and_wake() {
    let mut h = harness();
    let t0 = Instant::now();
    h.session.start(t0).unwrap();
    h.session.sleep();
    h.session.wake_up(t0 + ms(100));
    assert_eq!(h.engine.0.borrow().started, 2);

    // End confirmation for the stop issued when falling asleep
    h.session.handle_recognition(RecognitionEvent::Ended, t0 + ms(150));
    h.session.poll_timers(t0 + ms(800));

    assert_eq!(h.engine.0.borrow().started, 2);
    assert!(h.events.errors().is_empty());
    assert_eq!(h.session.status(), SessionState::Listening);
    assert_eq!(h.session.next_deadline(), Some(t0 + ms(10_100)));
}

#[test]
fn test_barge_in_ignores_end_of_previous_turn() {
    let mut h = harness();
    let t0 = Instant::now();
    h.session.start(t0).unwrap();
    let now = h.utter(t0);
    h.session.set_ai_speaking(true, None, now);

    h.session.start(now + ms(100)).unwrap();
    h.session.handle_recognition(RecognitionEvent::Ended, now + ms(120));
    h.session.poll_timers(now + ms(700));

    assert_eq!(h.engine.0.borrow().started, 2);
    assert!(h.events.errors().is_empty());
    assert_eq!(h.session.status(), SessionState::Listening);
}

#[test]
fn test_recognition_permission_errors_go_idle() {
    for code in [
        RecognitionErrorCode::NotAllowed,
        RecognitionErrorCode::ServiceNotAllowed,
    ] {
        let mut h = harness();
        let t0 = Instant::now();
        h.session.start(t0).unwrap();
        h.feed(&loud_frame(), 2, t0);

        h.session
            .handle_recognition(RecognitionEvent::Error(code.clone()), t0 + ms(600));
        h.session.poll_timers(t0 + ms(2_000));

        assert_eq!(h.events.errors(), vec![SessionError::Recognition(code)]);
        assert_eq!(h.session.status(), SessionState::Idle);
        assert!(!h.session.has_utterance());
        assert!(!h.mic.0.borrow().open);
        assert_eq!(h.engine.0.borrow().started, 1);
        assert_eq!(h.engine.0.borrow().stopped, 1);
    }
}

#[test]
fn test_network_error_retries_then_continues_locally() {
    let mut h = harness();
    let t0 = Instant::now();
    h.session.start(t0).unwrap();

    h.session
        .handle_recognition(RecognitionEvent::Error(RecognitionErrorCode::Network), t0);
    h.session.handle_recognition(RecognitionEvent::Ended, t0 + ms(10));
    h.session.poll_timers(t0 + ms(500));
    assert_eq!(h.engine.0.borrow().started, 2);

    h.session
        .handle_recognition(RecognitionEvent::Error(RecognitionErrorCode::Network), t0 + ms(900));

    assert!(h.events.errors().is_empty());
    assert_eq!(h.session.status(), SessionState::Listening);
    assert!(h.session.recognition().is_local_only());
}

#[test]
fn test_unexpected_end_restarts() {
    let mut h = harness();
    let t0 = Instant::now();
    h.session.start(t0).unwrap();

    h.session.handle_recognition(RecognitionEvent::Ended, t0 + ms(100));
    assert_eq!(h.session.next_deadline(), Some(t0 + ms(600)));

    h.session.poll_timers(t0 + ms(600));
    assert_eq!(h.engine.0.borrow().started, 2);
    assert_eq!(h.session.status(), SessionState::Listening);
}

#[test]
fn test_failed_restart_goes_idle() {
    let mut h = harness();
    let t0 = Instant::now();
    h.session.start(t0).unwrap();

    h.session.handle_recognition(RecognitionEvent::Ended, t0);
    h.engine.0.borrow_mut().fail_starts = 1;
    h.session.poll_timers(t0 + ms(500));

    assert_eq!(h.session.status(), SessionState::Idle);
    assert!(matches!(
        h.events.errors().as_slice(),
        [SessionError::RecognitionUnavailable(_)]
    ));
}

#[test]
fn test_transient_errors_surface_when_exhausted() {
    let config = SpeechConfig {
        fallback_to_local_capture: false,
        ..SpeechConfig::default()
    };
    let mut h = harness_with(config);
    let mut now = Instant::now();
    h.session.start(now).unwrap();

    let glitch = || RecognitionEvent::Error(RecognitionErrorCode::Other("bad-grammar".to_string()));
    for _ in 0..3 {
        h.session.handle_recognition(glitch(), now);
        h.session.handle_recognition(RecognitionEvent::Ended, now);
        now += ms(500);
        h.session.poll_timers(now);
        assert!(h.events.errors().is_empty());
    }

    h.session.handle_recognition(glitch(), now);
    assert_eq!(h.events.errors().len(), 1);
    assert_eq!(h.session.status(), SessionState::Idle);
}

#[test]
fn test_corrupt_audio_reports_packaging_error() {
    let mut h = harness();
    let t0 = Instant::now();
    h.session.start(t0).unwrap();

    let mut corrupt = loud_frame();
    corrupt[100] = f32::NAN;
    let now = h.feed(&loud_frame(), 2, t0);
    let now = h.feed(&corrupt, 1, now);
    let now = h.feed(&quiet_frame(), 24, now);
    h.session.poll_timers(now);

    assert!(h.events.utterances().is_empty());
    assert!(matches!(
        h.events.errors().as_slice(),
        [SessionError::Packaging(_)]
    ));
    assert_eq!(h.session.status(), SessionState::Idle);
}

#[tokio::test]
async fn test_runtime_drives_session() {
    let config = SpeechConfig {
        silence_time_ms: 50,
        ..SpeechConfig::default()
    };
    let h = harness_with(config);
    let events = h.events.clone();

    let (frames_tx, frames_rx) = tokio::sync::mpsc::unbounded_channel();
    let (_recognition_tx, recognition_rx) = tokio::sync::mpsc::unbounded_channel();
    let (runtime, handle) = SessionRuntime::new(h.session, frames_rx, recognition_rx);

    let control = async {
        handle.start().await.unwrap();
        assert_eq!(handle.status().await.unwrap(), SessionState::Listening);

        for _ in 0..3 {
            frames_tx.send(loud_frame()).unwrap();
        }
        for _ in 0..20 {
            frames_tx.send(quiet_frame()).unwrap();
        }
        tokio::time::sleep(std::time::Duration::from_millis(300)).await;

        assert_eq!(handle.status().await.unwrap(), SessionState::AiProcessing);
        handle.set_ai_speaking(true, Some("hoo".to_string())).unwrap();
        assert_eq!(handle.conversation_context().await.unwrap().len(), 1);

        handle.shutdown().unwrap();
    };

    tokio::join!(runtime.run(), control);

    assert_eq!(events.utterances().len(), 1);
    assert!(handle.status().await.is_err());
}
