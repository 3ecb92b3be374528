use overlay_core::{
    Autopilot, AutopilotFire, FireCallback, IntervalSequence, OverlayHost, PresentationSink,
    RevealPacing, StaticContext,
};
use parking_lot::Mutex;
use providers::{ScriptEnd, ScriptedTransport};
use shared::agent_api::{Role, StreamChunk, TurnId};
use shared::settings::OverlaySettings;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use zeroize::Zeroizing;

#[derive(Default)]
struct Screen {
    revealed: Vec<String>,
    finalized: Vec<(TurnId, String, bool)>,
}

impl PresentationSink for Screen {
    fn on_delta_revealed(&mut self, _turn: TurnId, cumulative: &str) {
        self.revealed.push(cumulative.to_string());
    }

    fn on_stream_finalized(&mut self, turn: TurnId, final_text: &str, succeeded: bool) {
        self.finalized.push((turn, final_text.to_string(), succeeded));
    }
}

fn host(transport: ScriptedTransport, pacing: RevealPacing) -> OverlayHost {
    let settings = OverlaySettings {
        autopilot_enabled: false,
        ..OverlaySettings::default()
    };
    OverlayHost::new(
        settings,
        Arc::new(transport),
        Zeroizing::new("test-key".into()),
        Box::new(StaticContext("App: Terminal".into())),
    )
    .unwrap()
    .with_pacing(pacing)
}

fn run_until_settled(host: &mut OverlayHost, screen: &mut Screen, tick: Duration) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if host.tick(screen).unwrap().is_some() {
            return;
        }
        thread::sleep(tick);
    }
    panic!("stream did not settle");
}

#[test]
fn scenario_a_reply_is_concatenation_of_deltas() {
    let mut host = host(
        ScriptedTransport::deltas(["Hi", " there"]),
        RevealPacing::default(),
    );
    let mut screen = Screen::default();
    let before = host.log().len();

    let turn = host.submit_user_turn("hello", None).unwrap();
    run_until_settled(&mut host, &mut screen, Duration::from_millis(1));

    assert_eq!(host.log().len(), before + 2);
    assert!(!host.log().is_streaming());
    let roles: Vec<Role> = host.log().turns().iter().map(|t| t.role).collect();
    assert_eq!(roles, vec![Role::User, Role::Model]);
    assert_eq!(host.log().get(turn).unwrap().text, "Hi there");
    assert_eq!(screen.finalized, vec![(turn, "Hi there".to_string(), true)]);
}

#[test]
fn scenario_b_reset_rewinds_without_firing() {
    let (tx, rx) = mpsc::channel::<AutopilotFire>();
    let tx = Mutex::new(tx);
    let on_fire: FireCallback = Arc::new(move |fire: AutopilotFire| tx.lock().send(fire).is_ok());
    let intervals = IntervalSequence::new(vec![
        Duration::from_millis(400),
        Duration::from_millis(800),
    ])
    .unwrap();
    let mut autopilot = Autopilot::new(intervals, on_fire);
    autopilot.start().unwrap();

    let first = rx.recv_timeout(Duration::from_secs(3)).unwrap();
    assert_eq!(first.sequence, 1);
    assert_eq!(first.interval, Duration::from_millis(400));

    let deadline = Instant::now() + Duration::from_secs(2);
    while autopilot.cursor() != 1 {
        assert!(Instant::now() < deadline, "cursor never advanced");
        thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(autopilot.current_interval(), Duration::from_millis(800));

    thread::sleep(Duration::from_millis(300));
    autopilot.reset_timer();
    assert_eq!(autopilot.cursor(), 0);
    assert_eq!(autopilot.current_interval(), Duration::from_millis(400));
    assert!(rx.recv_timeout(Duration::from_millis(250)).is_err());

    // The next wait starts over from the first interval.
    let next = rx.recv_timeout(Duration::from_secs(3)).unwrap();
    assert_eq!(next.sequence, 2);
    assert_eq!(next.interval, Duration::from_millis(400));

    autopilot.stop();
    autopilot.stop();
    assert!(!autopilot.is_running());
}

#[test]
fn scenario_c_error_after_good_delta() {
    let mut host = host(
        ScriptedTransport::chunks(
            [
                StreamChunk::Text("Here is the first part".into()),
                StreamChunk::Error("Error: The request timed out.".into()),
            ],
            ScriptEnd::Done,
        ),
        RevealPacing::Typewriter { chars_per_tick: 4 },
    );
    let mut screen = Screen::default();

    let turn = host.submit_user_turn("tell me a story", None).unwrap();
    run_until_settled(&mut host, &mut screen, Duration::from_millis(1));
    for _ in 0..5 {
        assert!(host.tick(&mut screen).unwrap().is_none());
    }

    let text = &host.log().get(turn).unwrap().text;
    assert!(text.starts_with("Here is the first part"));
    assert!(text.ends_with("Error: The request timed out."));
    assert_eq!(screen.finalized.len(), 1);
    assert!(!screen.finalized[0].2);
}

#[test]
fn final_text_does_not_depend_on_polling_rate() {
    let deltas = ["The ", "quick ", "brown ", "fox ", "\u{1f98a}", " jumps."];
    let expected: String = deltas.concat();

    for (pacing, tick) in [
        (RevealPacing::Batch, Duration::ZERO),
        (RevealPacing::Typewriter { chars_per_tick: 1 }, Duration::from_millis(1)),
        (RevealPacing::Typewriter { chars_per_tick: 7 }, Duration::from_millis(3)),
    ] {
        let transport = ScriptedTransport::deltas(deltas).with_delay(Duration::from_millis(2));
        let mut host = host(transport, pacing);
        let mut screen = Screen::default();
        let turn = host.submit_user_turn("go", None).unwrap();
        run_until_settled(&mut host, &mut screen, tick);

        assert_eq!(host.log().get(turn).unwrap().text, expected, "{:?}", pacing);
        assert_eq!(screen.revealed.last(), Some(&expected));
        assert!(screen
            .revealed
            .windows(2)
            .all(|w| w[1].starts_with(w[0].as_str())));
    }
}

#[test]
fn cancel_settles_as_failure_and_frees_host() {
    let mut host = host(
        ScriptedTransport::chunks([StreamChunk::Text("Thinking".into())], ScriptEnd::Stall),
        RevealPacing::Batch,
    );
    let mut screen = Screen::default();

    host.submit_user_turn("slow question", None).unwrap();
    assert!(host.cancel_stream());
    run_until_settled(&mut host, &mut screen, Duration::from_millis(1));

    assert!(!host.is_busy());
    assert!(!screen.finalized[0].2);
    assert!(host.submit_user_turn("next", None).is_ok());
}

#[test]
fn chat_survives_save_and_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("chat.json");

    let mut first = host(ScriptedTransport::deltas(["Saved answer"]), RevealPacing::Batch);
    let mut screen = Screen::default();
    let turn = first.submit_user_turn("remember this", None).unwrap();
    run_until_settled(&mut first, &mut screen, Duration::from_millis(1));
    first.set_pinned(turn, true).unwrap();
    first.save_chat(&path).unwrap();

    let mut second = host(ScriptedTransport::deltas(["unused"]), RevealPacing::Batch);
    second.load_chat(&path).unwrap();
    let pinned: Vec<&str> = second
        .log()
        .pinned_view()
        .iter()
        .map(|t| t.text.as_str())
        .collect();
    assert_eq!(pinned, vec!["remember this", "Saved answer"]);
}
