//! End-to-end game lifecycle through the admin API and the polling tracker.
//!
//! A local participant works through a fizzbuzz kata while cycles run; the
//! test checks that history, score and feedback follow the commits, and that
//! reset and game transitions take effect on the next cycle.

use tddgame::admin::{
    self, AdminError, create_game, join_local, participant_view, reset_participant, scoreboard,
    set_game_status,
};
use tddgame::core::scoring::score_history;
use tddgame::core::types::{CommitRecord, GameStatus, TddPhase};
use tddgame::io::config::TrackerConfig;
use tddgame::io::store::{FileStore, GameStore, INITIAL_FEEDBACK};
use tddgame::io::test_runner::CommandTestRunner;
use tddgame::poll::{ParticipantOutcome, Tracker, TrackerSettings};
use tddgame::test_support::{KATA_TEST, ScriptedFeedback, TestRepo, fake_test_runner, seed_kata};

const BUZZ_TEST: &str = "def test_buzz():\n    assert fizzbuzz(5) == 'Buzz'\n# needs: buzz\n";

fn only_outcome<S: GameStore>(
    tracker: &Tracker<S, CommandTestRunner, ScriptedFeedback>,
) -> ParticipantOutcome {
    let report = tracker.run_cycle().expect("cycle");
    assert_eq!(report.participants.len(), 1, "one participant per cycle");
    report.participants[0].outcome.clone()
}

#[test]
fn kata_progress_is_tracked_across_cycles() {
    let state = tempfile::tempdir().expect("state dir");
    let repo = TestRepo::new().expect("repo");
    let kata = seed_kata(&repo).expect("kata");

    let store = FileStore::new(state.path());
    let game = create_game(&store, "Friday kata").expect("game");
    let player = join_local(&store, &game.id, "Ada", repo.root()).expect("join");
    assert_eq!(player.feedback, INITIAL_FEEDBACK);

    let tracker = Tracker::new(
        store,
        fake_test_runner(),
        ScriptedFeedback::valid(),
        TrackerSettings::from(&TrackerConfig::default()),
    );

    match only_outcome(&tracker) {
        ParticipantOutcome::Processed { new_commits, score } => {
            assert_eq!(new_commits, 3);
            assert!((score - 7.55).abs() < 1e-9);
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(only_outcome(&tracker), ParticipantOutcome::UpToDate);

    let tests = format!("{KATA_TEST}{BUZZ_TEST}");
    let red = repo
        .commit_file("test_fizzbuzz.py", &tests, "Add failing buzz test")
        .expect("red commit");
    assert!(matches!(
        only_outcome(&tracker),
        ParticipantOutcome::Processed { new_commits: 1, .. }
    ));

    let view = participant_view(tracker.store(), &game.id, &player.id).expect("view");
    let shas: Vec<&str> = view.history.iter().map(|entry| entry.record.sha.as_str()).collect();
    assert_eq!(shas, vec![kata[0].as_str(), kata[1].as_str(), kata[2].as_str(), red.as_str()]);
    let last = view.history.last().expect("last entry");
    assert_eq!(last.record.position, 3);
    assert_eq!(last.record.classification, TddPhase::Red);
    assert_eq!(last.feedback, format!("feedback for {red}"));

    let records: Vec<CommitRecord> =
        view.history.iter().map(|entry| entry.record.clone()).collect();
    let expected = score_history(&records).overall;
    assert_eq!(view.participant.score, expected);
    assert_eq!(view.report.overall, expected);
    assert_eq!(view.participant.last_synced, red);
    assert_eq!(view.participant.feedback, "scripted overall feedback");

    let reset = reset_participant(tracker.store(), &game.id, &player.id).expect("reset");
    assert_eq!(reset.score, 0.0);
    assert!(reset.last_synced.is_empty());
    assert!(matches!(
        only_outcome(&tracker),
        ParticipantOutcome::Processed { new_commits: 4, .. }
    ));

    set_game_status(tracker.store(), &game.id, GameStatus::Stopped).expect("stop");
    let report = tracker.run_cycle().expect("cycle");
    assert_eq!(report.games_polled, 0);
    assert!(report.participants.is_empty());
}

#[test]
fn stopped_games_refuse_new_participants_and_transitions() {
    let state = tempfile::tempdir().expect("state dir");
    let repo = TestRepo::new().expect("repo");
    seed_kata(&repo).expect("kata");
    let store = FileStore::new(state.path());
    let game = create_game(&store, "kata").expect("game");

    set_game_status(&store, &game.id, GameStatus::Stopped).expect("stop");

    let err = join_local(&store, &game.id, "Grace", repo.root()).expect_err("join refused");
    assert!(matches!(err, AdminError::GameNotRunning { .. }));
    let err = set_game_status(&store, &game.id, GameStatus::Running).expect_err("stopped is final");
    assert!(matches!(
        err,
        AdminError::InvalidTransition {
            from: GameStatus::Stopped,
            to: GameStatus::Running
        }
    ));
    assert!(scoreboard(&store, &game.id).expect("scores").is_empty());
}

#[test]
fn scoreboard_orders_players_by_score() {
    let state = tempfile::tempdir().expect("state dir");
    let strong = TestRepo::new().expect("repo");
    seed_kata(&strong).expect("kata");
    let weak = TestRepo::new().expect("repo");
    weak.commit_file("NOTES.md", "todo\n", "notes").expect("commit");

    let store = FileStore::new(state.path());
    let game = admin::create_game(&store, "kata").expect("game");
    let weak_player = join_local(&store, &game.id, "Weak", weak.root()).expect("join");
    let strong_player = join_local(&store, &game.id, "Strong", strong.root()).expect("join");

    let tracker = Tracker::new(
        store,
        fake_test_runner(),
        ScriptedFeedback::valid(),
        TrackerSettings::from(&TrackerConfig::default()),
    );
    let report = tracker.run_cycle().expect("cycle");
    assert_eq!(report.participants.len(), 2);

    let board = scoreboard(tracker.store(), &game.id).expect("scores");
    let ids: Vec<&str> = board.iter().map(|player| player.id.as_str()).collect();
    assert_eq!(ids, vec![strong_player.id.as_str(), weak_player.id.as_str()]);
    assert!(board[0].score > board[1].score);
}
