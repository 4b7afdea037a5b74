//! Controller behaviour against an instrumented fake engine
//!
//! Every test runs the real playback loop thread; the fake backend records
//! engine calls and asserts through `max_open` that at most one player is
//! ever open.

mod helpers;

use helpers::{fast_settings, Call, Harness, WAIT};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use vitrine_common::config::PauseMode;
use vitrine_common::events::PlaybackState;
use vitrine_player::controller::{Command, ControllerSettings, Outcome};
use vitrine_player::error::Error;

fn switch(h: &Harness, name: &str) -> u64 {
    match h
        .controller
        .execute(Command::SwitchCollection(name.to_string()))
        .unwrap()
        .outcome
    {
        Outcome::Switched { generation, .. } => generation,
        other => panic!("unexpected outcome {:?}", other),
    }
}

fn position(calls: &[Call], call: &Call) -> usize {
    calls
        .iter()
        .position(|c| c == call)
        .unwrap_or_else(|| panic!("{:?} not found in {:?}", call, calls))
}

// ============================================================================
// Switching
// ============================================================================

#[test]
fn test_switch_plays_first_file() {
    let h = Harness::start();
    switch(&h, "alpha");

    assert!(h.backend.wait_loaded(&h.file("alpha", "a1.mp4"), 1));
    let status = h.controller.status();
    assert_eq!(status.state, PlaybackState::Playing);
    assert_eq!(status.current_collection.as_deref(), Some("alpha"));
    assert_eq!(status.generation, 1);
}

#[test]
fn test_playlist_advances_in_order_and_repeats() {
    let h = Harness::start();
    switch(&h, "alpha");
    let (a1, a2, a3) = (
        h.file("alpha", "a1.mp4"),
        h.file("alpha", "a2.mp4"),
        h.file("alpha", "a3.mp4"),
    );

    assert!(h.backend.wait_loaded(&a1, 1));
    h.backend.finish_current();
    assert!(h.backend.wait_loaded(&a2, 1));
    h.backend.finish_current();
    assert!(h.backend.wait_loaded(&a3, 1));
    h.backend.finish_current();
    assert!(h.backend.wait_loaded(&a1, 2));

    assert_eq!(h.backend.loads(), vec![a1.clone(), a2, a3, a1]);
    assert_eq!(h.backend.max_open(), 1);
}

/// Select A, let A1 start, select B: A1 is released, then B1 starts
#[test]
fn test_switch_interrupts_and_starts_new_playlist() {
    let h = Harness::start();
    let a1 = h.file("alpha", "a1.mp4");
    let b1 = h.file("beta", "b1.mp4");

    switch(&h, "alpha");
    assert!(h.backend.wait_loaded(&a1, 1));

    let started = Instant::now();
    switch(&h, "beta");
    assert!(h.backend.wait_loaded(&b1, 1));
    assert!(started.elapsed() < Duration::from_secs(1));

    let calls = h.backend.calls();
    assert!(position(&calls, &Call::Released(a1.clone())) < position(&calls, &Call::Loaded(b1.clone())));
    assert_eq!(h.backend.loads(), vec![a1, b1]);
    assert_eq!(h.backend.max_open(), 1);
}

#[test]
fn test_same_collection_twice_restarts_twice() {
    let h = Harness::start();
    let a1 = h.file("alpha", "a1.mp4");
    let a2 = h.file("alpha", "a2.mp4");

    let g1 = switch(&h, "alpha");
    assert!(h.backend.wait_loaded(&a1, 1));
    h.backend.finish_current();
    assert!(h.backend.wait_loaded(&a2, 1));

    let g2 = switch(&h, "alpha");
    assert!(h.backend.wait_loaded(&a1, 2));
    let g3 = switch(&h, "alpha");
    assert!(h.backend.wait_loaded(&a1, 3));

    assert!(g1 < g2 && g2 < g3);
    assert_eq!(h.backend.loads(), vec![a1.clone(), a2, a1.clone(), a1]);
}

#[test]
fn test_unknown_collection_rejected_without_state_change() {
    let h = Harness::start();
    let result = h
        .controller
        .execute(Command::SwitchCollection("nope".to_string()));

    assert!(matches!(result, Err(Error::Config(_))));
    let status = h.controller.status();
    assert_eq!(status.state, PlaybackState::Idle);
    assert_eq!(status.generation, 0);
}

#[test]
fn test_concurrent_switches_converge() {
    let h = Harness::start();
    let threads: Vec<_> = (0..8)
        .map(|t| {
            let controller = Arc::clone(&h.controller);
            thread::spawn(move || {
                for i in 0..10 {
                    let name = if (t + i) % 2 == 0 { "alpha" } else { "beta" };
                    controller
                        .execute(Command::SwitchCollection(name.to_string()))
                        .unwrap();
                }
            })
        })
        .collect();
    for t in threads {
        t.join().unwrap();
    }

    let status = h.controller.status();
    assert_eq!(status.generation, 80);

    let first = match status.current_collection.as_deref() {
        Some("alpha") => h.file("alpha", "a1.mp4"),
        Some("beta") => h.file("beta", "b1.mp4"),
        other => panic!("unexpected selection {:?}", other),
    };
    assert!(h.backend.wait_for(WAIT, |calls| {
        calls.last() == Some(&Call::Loaded(first.clone()))
    }));
    assert_eq!(h.backend.max_open(), 1);
}

#[test]
fn test_empty_collection_backs_off_until_switch() {
    let h = Harness::start();
    switch(&h, "empty");
    thread::sleep(Duration::from_millis(60));
    assert!(h.backend.loads().is_empty());
    assert_eq!(h.controller.playback_state(), PlaybackState::Playing);

    // Next has nothing to interrupt
    let reply = h.controller.execute(Command::Next).unwrap();
    assert_eq!(reply.outcome, Outcome::NothingToSkip);

    switch(&h, "beta");
    assert!(h.backend.wait_loaded(&h.file("beta", "b1.mp4"), 1));
}

#[test]
fn test_unloadable_file_is_skipped() {
    let h = Harness::start();
    let (a1, a2, a3) = (
        h.file("alpha", "a1.mp4"),
        h.file("alpha", "a2.mp4"),
        h.file("alpha", "a3.mp4"),
    );
    h.backend.fail_on(&a2);

    switch(&h, "alpha");
    assert!(h.backend.wait_loaded(&a1, 1));
    h.backend.finish_current();
    assert!(h.backend.wait_loaded(&a3, 1));
    assert_eq!(h.backend.loads(), vec![a1, a3]);
}

// ============================================================================
// Transport commands
// ============================================================================

#[test]
fn test_commands_rejected_while_idle() {
    let h = Harness::start();
    for command in [Command::Play, Command::Pause, Command::Next] {
        match h.controller.execute(command) {
            Err(Error::InvalidState { state, .. }) => assert_eq!(state, PlaybackState::Idle),
            other => panic!("expected InvalidState, got {:?}", other),
        }
    }
}

#[test]
fn test_pause_while_stopped_rejected() {
    let h = Harness::start();
    switch(&h, "alpha");
    assert!(h.backend.wait_loaded(&h.file("alpha", "a1.mp4"), 1));
    h.controller.execute(Command::Stop).unwrap();

    match h.controller.execute(Command::Pause) {
        Err(Error::InvalidState { state, .. }) => assert_eq!(state, PlaybackState::Stopped),
        other => panic!("expected InvalidState, got {:?}", other),
    }
    assert_eq!(h.controller.playback_state(), PlaybackState::Stopped);
}

#[test]
fn test_stop_releases_and_clears_display_once() {
    let h = Harness::start();
    let a1 = h.file("alpha", "a1.mp4");
    switch(&h, "alpha");
    assert!(h.backend.wait_loaded(&a1, 1));

    let reply = h.controller.execute(Command::Stop).unwrap();
    assert_eq!(reply.outcome, Outcome::Stopped);
    assert_eq!(reply.state, PlaybackState::Stopped);

    // Stop returns after teardown
    assert!(h.backend.calls().contains(&Call::Released(a1)));
    assert_eq!(h.display.clears(), 1);
    assert!(!h.controller.status().session_active);

    h.controller.execute(Command::Stop).unwrap();
    assert_eq!(h.display.clears(), 1);
    assert_eq!(h.backend.open(), 0);
}

#[test]
fn test_play_after_stop_restarts_from_first_file() {
    let h = Harness::start();
    let a1 = h.file("alpha", "a1.mp4");
    let a2 = h.file("alpha", "a2.mp4");
    switch(&h, "alpha");
    assert!(h.backend.wait_loaded(&a1, 1));
    h.backend.finish_current();
    assert!(h.backend.wait_loaded(&a2, 1));

    h.controller.execute(Command::Stop).unwrap();
    let reply = h.controller.execute(Command::Play).unwrap();
    assert_eq!(reply.outcome, Outcome::Started);
    assert!(h.backend.wait_loaded(&a1, 2));
}

#[test]
fn test_play_while_playing_is_not_an_error() {
    let h = Harness::start();
    switch(&h, "alpha");
    let reply = h.controller.execute(Command::Play).unwrap();
    assert_eq!(reply.outcome, Outcome::AlreadyPlaying);
    assert_eq!(reply.state, PlaybackState::Playing);
}

#[test]
fn test_next_skips_current_file() {
    let h = Harness::start();
    let a1 = h.file("alpha", "a1.mp4");
    let a2 = h.file("alpha", "a2.mp4");
    switch(&h, "alpha");
    assert!(h.backend.wait_loaded(&a1, 1));

    let reply = h.controller.execute(Command::Next).unwrap();
    assert_eq!(reply.outcome, Outcome::Skipped);
    assert!(h.backend.wait_loaded(&a2, 1));

    let calls = h.backend.calls();
    assert!(position(&calls, &Call::Released(a1)) < position(&calls, &Call::Loaded(a2)));
}

#[test]
fn test_next_while_stopped_rejected() {
    let h = Harness::start();
    switch(&h, "alpha");
    h.controller.execute(Command::Stop).unwrap();
    assert!(matches!(
        h.controller.execute(Command::Next),
        Err(Error::InvalidState { .. })
    ));
}

#[test]
fn test_release_pause_replays_file_on_resume() {
    let h = Harness::start();
    let a1 = h.file("alpha", "a1.mp4");
    switch(&h, "alpha");
    assert!(h.backend.wait_loaded(&a1, 1));

    let reply = h.controller.execute(Command::Pause).unwrap();
    assert_eq!(reply.outcome, Outcome::Paused);
    assert!(h.backend.wait_released(&a1, 1));
    assert_eq!(h.controller.playback_state(), PlaybackState::Paused);

    let reply = h.controller.execute(Command::Play).unwrap();
    assert_eq!(reply.outcome, Outcome::Resumed);
    assert!(h.backend.wait_loaded(&a1, 2));
    assert_eq!(h.backend.max_open(), 1);
}

#[test]
fn test_next_while_paused_advances() {
    let h = Harness::start();
    let a1 = h.file("alpha", "a1.mp4");
    let a2 = h.file("alpha", "a2.mp4");
    switch(&h, "alpha");
    assert!(h.backend.wait_loaded(&a1, 1));
    h.controller.execute(Command::Pause).unwrap();
    assert!(h.backend.wait_released(&a1, 1));

    let reply = h.controller.execute(Command::Next).unwrap();
    assert_eq!(reply.outcome, Outcome::Skipped);
    assert_eq!(reply.state, PlaybackState::Playing);
    assert!(h.backend.wait_loaded(&a2, 1));
    assert_eq!(h.backend.loads(), vec![a1, a2]);
}

/// Next then Pause before the loop reacts: the skip survives the pause
fn next_then_pause_advances(pause_mode: PauseMode) {
    for _ in 0..10 {
        let h = Harness::with_settings(fast_settings(pause_mode));
        let a1 = h.file("alpha", "a1.mp4");
        let a2 = h.file("alpha", "a2.mp4");
        switch(&h, "alpha");
        assert!(h.backend.wait_loaded(&a1, 1));

        assert_eq!(
            h.controller.execute(Command::Next).unwrap().outcome,
            Outcome::Skipped
        );
        h.controller.execute(Command::Pause).unwrap();
        assert!(h.backend.wait_released(&a1, 1));

        h.controller.execute(Command::Play).unwrap();
        assert!(h.backend.wait_loaded(&a2, 1));

        // a2 may replay if the skip landed before the pause; a1 never does
        let loads = h.backend.loads();
        assert_eq!(loads[0], a1);
        assert!(loads[1..].iter().all(|p| *p == a2), "loads {:?}", loads);
        assert_eq!(h.backend.max_open(), 1);
    }
}

#[test]
fn test_next_then_pause_keeps_skip_in_release_mode() {
    next_then_pause_advances(PauseMode::Release);
}

#[test]
fn test_next_then_pause_keeps_skip_in_hold_mode() {
    next_then_pause_advances(PauseMode::Hold);
}

/// Paused between two items: Next resumes with the entry that never started
#[test]
fn test_next_while_paused_between_items_does_not_skip_unstarted_entry() {
    let mut settings = fast_settings(PauseMode::Release);
    settings.playback.inter_item_gap_ms = 2000;
    let h = Harness::with_settings(settings);
    let a1 = h.file("alpha", "a1.mp4");
    let a2 = h.file("alpha", "a2.mp4");
    switch(&h, "alpha");
    assert!(h.backend.wait_loaded(&a1, 1));

    h.backend.finish_current();
    assert!(h.backend.wait_released(&a1, 1));
    let deadline = Instant::now() + WAIT;
    while h.controller.status().session_active {
        assert!(Instant::now() < deadline, "session never ended");
        thread::sleep(Duration::from_millis(5));
    }

    // Loop is in the gap before a2
    h.controller.execute(Command::Pause).unwrap();
    let reply = h.controller.execute(Command::Next).unwrap();
    assert_eq!(reply.state, PlaybackState::Playing);

    assert!(h.backend.wait_loaded(&a2, 1));
    assert_eq!(h.backend.loads(), vec![a1, a2]);
}

#[test]
fn test_stop_from_idle_clears_once() {
    let h = Harness::start();
    let reply = h.controller.execute(Command::Stop).unwrap();
    assert_eq!(reply.outcome, Outcome::Stopped);
    assert_eq!(h.controller.playback_state(), PlaybackState::Stopped);
    assert_eq!(h.display.clears(), 1);

    h.controller.execute(Command::Stop).unwrap();
    assert_eq!(h.display.clears(), 1);

    // Nothing was ever selected
    match h.controller.execute(Command::Play) {
        Err(Error::InvalidState { state, .. }) => assert_eq!(state, PlaybackState::Stopped),
        other => panic!("expected InvalidState, got {:?}", other),
    }
    assert!(h.backend.loads().is_empty());
}

#[test]
fn test_stop_from_paused_clears_once() {
    let h = Harness::start();
    let a1 = h.file("alpha", "a1.mp4");
    switch(&h, "alpha");
    assert!(h.backend.wait_loaded(&a1, 1));
    h.controller.execute(Command::Pause).unwrap();
    assert!(h.backend.wait_released(&a1, 1));

    h.controller.execute(Command::Stop).unwrap();
    assert_eq!(h.controller.playback_state(), PlaybackState::Stopped);
    assert_eq!(h.display.clears(), 1);
    h.controller.execute(Command::Stop).unwrap();
    assert_eq!(h.display.clears(), 1);

    assert_eq!(
        h.controller.execute(Command::Play).unwrap().outcome,
        Outcome::Started
    );
    assert!(h.backend.wait_loaded(&a1, 2));
}

#[test]
fn test_loop_item_holds_playlist_until_next() {
    let h = Harness::start();
    let looped = h.file("loops", "idle-loop.mp4");
    let intro = h.file("loops", "intro.mp4");
    switch(&h, "loops");

    assert!(h.backend.wait_loaded(&looped, 1));
    h.backend.finish_current();
    assert!(h.backend.wait_loaded(&looped, 2));
    h.backend.finish_current();
    assert!(h.backend.wait_loaded(&looped, 3));

    assert!(!h.backend.loads().contains(&intro));
    assert!(!h.backend.calls().contains(&Call::Released(looped.clone())));

    h.controller.execute(Command::Next).unwrap();
    assert!(h.backend.wait_loaded(&intro, 1));
    assert_eq!(h.backend.max_open(), 1);
}

#[test]
fn test_switch_interrupts_loop_item() {
    let h = Harness::start();
    let looped = h.file("loops", "idle-loop.mp4");
    switch(&h, "loops");
    assert!(h.backend.wait_loaded(&looped, 1));

    switch(&h, "beta");
    assert!(h.backend.wait_loaded(&h.file("beta", "b1.mp4"), 1));
    assert!(h.backend.calls().contains(&Call::Released(looped)));
}

#[test]
fn test_every_load_is_preceded_by_stray_sweep() {
    let h = Harness::start();
    switch(&h, "alpha");
    assert!(h.backend.wait_loaded(&h.file("alpha", "a1.mp4"), 1));
    h.backend.finish_current();
    assert!(h.backend.wait_loaded(&h.file("alpha", "a2.mp4"), 1));

    assert!(h.backend.sweeps() >= h.backend.loads().len());
}

#[test]
fn test_hold_pause_keeps_session() {
    let h = Harness::with_settings(fast_settings(PauseMode::Hold));
    let a1 = h.file("alpha", "a1.mp4");
    let a2 = h.file("alpha", "a2.mp4");
    switch(&h, "alpha");
    assert!(h.backend.wait_loaded(&a1, 1));

    h.controller.execute(Command::Pause).unwrap();
    assert!(h
        .backend
        .wait_for(WAIT, |calls| calls.contains(&Call::Paused(a1.clone()))));

    h.controller.execute(Command::Play).unwrap();
    assert!(h
        .backend
        .wait_for(WAIT, |calls| calls.contains(&Call::Resumed(a1.clone()))));
    assert!(!h.backend.calls().contains(&Call::Released(a1.clone())));

    h.backend.finish_current();
    assert!(h.backend.wait_loaded(&a2, 1));
}

#[test]
fn test_stop_while_held_releases_session() {
    let h = Harness::with_settings(fast_settings(PauseMode::Hold));
    let a1 = h.file("alpha", "a1.mp4");
    switch(&h, "alpha");
    assert!(h.backend.wait_loaded(&a1, 1));
    h.controller.execute(Command::Pause).unwrap();
    assert!(h
        .backend
        .wait_for(WAIT, |calls| calls.contains(&Call::Paused(a1.clone()))));

    h.controller.execute(Command::Stop).unwrap();
    assert!(h.backend.calls().contains(&Call::Released(a1)));
    assert_eq!(h.display.clears(), 1);
}

#[test]
fn test_mixed_commands_never_open_two_players() {
    let h = Harness::start();
    switch(&h, "alpha");

    let threads: Vec<_> = (0..4)
        .map(|t| {
            let controller = Arc::clone(&h.controller);
            thread::spawn(move || {
                for i in 0..25 {
                    let command = match (t * 7 + i) % 6 {
                        0 => Command::SwitchCollection("alpha".to_string()),
                        1 => Command::SwitchCollection("beta".to_string()),
                        2 => Command::Next,
                        3 => Command::Pause,
                        4 => Command::Play,
                        _ => Command::Stop,
                    };
                    // Rejections are expected here
                    let _ = controller.execute(command);
                }
            })
        })
        .collect();
    for t in threads {
        t.join().unwrap();
    }

    assert_eq!(h.backend.max_open(), 1);
    switch(&h, "beta");
    let b1 = h.file("beta", "b1.mp4");
    assert!(h
        .backend
        .wait_for(WAIT, |calls| calls.last() == Some(&Call::Loaded(b1.clone()))));
}

// ============================================================================
// Startup stage
// ============================================================================

#[test]
fn test_initial_collection_selected_at_startup() {
    let h = Harness::with_settings(ControllerSettings {
        initial_collection: Some("beta".to_string()),
        ..fast_settings(PauseMode::Release)
    });
    assert!(h.backend.wait_loaded(&h.file("beta", "b1.mp4"), 1));
    assert_eq!(h.controller.status().generation, 1);
}

#[test]
fn test_autostart_picks_first_collection() {
    let h = Harness::with_settings(ControllerSettings {
        autostart: true,
        ..fast_settings(PauseMode::Release)
    });
    assert!(h.backend.wait_loaded(&h.file("alpha", "a1.mp4"), 1));
}

#[test]
fn test_boot_video_plays_before_initial_selection() {
    let boot_dir = tempfile::TempDir::new().unwrap();
    let boot = boot_dir.path().join("boot.mp4");
    std::fs::write(&boot, b"").unwrap();

    let h = Harness::with_settings(ControllerSettings {
        boot_video: Some(boot.clone()),
        autostart: true,
        ..fast_settings(PauseMode::Release)
    });
    let a1 = h.file("alpha", "a1.mp4");

    assert!(h.backend.wait_loaded(&boot, 1));
    assert_eq!(h.controller.playback_state(), PlaybackState::Idle);
    h.backend.finish_current();
    assert!(h.backend.wait_loaded(&a1, 1));
    assert_eq!(h.backend.loads(), vec![boot, a1]);
}

#[test]
fn test_switch_during_boot_video_wins() {
    let boot_dir = tempfile::TempDir::new().unwrap();
    let boot = boot_dir.path().join("boot.mp4");
    std::fs::write(&boot, b"").unwrap();

    let h = Harness::with_settings(ControllerSettings {
        boot_video: Some(boot.clone()),
        autostart: true,
        ..fast_settings(PauseMode::Release)
    });
    assert!(h.backend.wait_loaded(&boot, 1));

    switch(&h, "beta");
    assert!(h.backend.wait_loaded(&h.file("beta", "b1.mp4"), 1));
    let status = h.controller.status();
    assert_eq!(status.current_collection.as_deref(), Some("beta"));
    assert_eq!(status.generation, 1);
}

// ============================================================================
// Events and shutdown
// ============================================================================

#[test]
fn test_switch_emits_events() {
    let h = Harness::start();
    let mut rx = h.state.events.subscribe();
    switch(&h, "alpha");
    assert!(h.backend.wait_loaded(&h.file("alpha", "a1.mp4"), 1));

    let mut types = Vec::new();
    while let Ok(event) = rx.try_recv() {
        types.push(event.event_type());
    }
    let changed = types.iter().position(|t| *t == "CollectionChanged").unwrap();
    let state = types.iter().position(|t| *t == "PlaybackStateChanged").unwrap();
    assert!(changed < state);
    assert!(types.contains(&"ItemStarted"));
}

#[test]
fn test_shutdown_is_ordered_and_idempotent() {
    let h = Harness::start();
    let a1 = h.file("alpha", "a1.mp4");
    switch(&h, "alpha");
    assert!(h.backend.wait_loaded(&a1, 1));

    let coordinator = h.coordinator();
    assert!(coordinator.shutdown());
    assert!(!coordinator.shutdown());
    assert!(coordinator.is_done());

    assert!(h.backend.calls().contains(&Call::Released(a1)));
    assert_eq!(h.backend.open(), 0);
    assert_eq!(h.display.clears(), 1);
    assert!(h.controller.status().shutting_down);

    assert!(matches!(
        h.controller.execute(Command::Play),
        Err(Error::ShuttingDown)
    ));
    assert!(matches!(
        h.controller
            .execute(Command::SwitchCollection("beta".to_string())),
        Err(Error::ShuttingDown)
    ));
}

#[test]
fn test_shutdown_without_playback() {
    let h = Harness::unstarted(fast_settings(PauseMode::Release));
    let coordinator = h.coordinator();
    assert!(coordinator.shutdown());
    assert_eq!(h.display.clears(), 1);
}
