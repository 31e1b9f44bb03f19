//! Administrative commands: games, registration, and participant maintenance.
//!
//! These only mutate store fields the polling cycle reads later.

use std::path::{Path, PathBuf};

use rand::{Rng, distributions::Alphanumeric};
use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::core::locator::{parse_full_name, same_locator};
use crate::core::scoring::{ScoreReport, score_history};
use crate::core::types::{CommitRecord, GameStatus};
use crate::io::store::{
    GameRecord, GameStore, HistoryEntry, INITIAL_FEEDBACK, ParticipantField, ParticipantRecord,
};

const ID_LEN: usize = 6;

#[derive(Debug, Error)]
pub enum AdminError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("game {0} not found")]
    GameNotFound(String),
    #[error("participant {participant_id} not found in game {game_id}")]
    ParticipantNotFound {
        game_id: String,
        participant_id: String,
    },
    #[error("game {game_id} is {status}, not running")]
    GameNotRunning { game_id: String, status: GameStatus },
    #[error("cannot move game from {from} to {to}")]
    InvalidTransition { from: GameStatus, to: GameStatus },
    #[error("invalid GitHub repository URL: {0}")]
    InvalidRepositoryUrl(String),
    #[error("repository {0} is already registered in this game")]
    DuplicateRepository(String),
    #[error("working copy {0} does not exist")]
    WorkingCopyMissing(String),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// A request to register a participant by repository URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinRequest {
    pub game_id: String,
    pub name: String,
    pub repo_url: String,
}

/// Participant with its history and a freshly computed score breakdown.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParticipantView {
    pub participant: ParticipantRecord,
    pub history: Vec<HistoryEntry>,
    pub report: ScoreReport,
}

pub fn create_game<S: GameStore>(store: &S, name: &str) -> Result<GameRecord, AdminError> {
    let name = required(name, "name")?;
    let taken: Vec<String> = store.list_games()?.into_iter().map(|game| game.id).collect();
    let game = GameRecord {
        id: unique_id(&taken),
        name: name.to_string(),
        status: GameStatus::Running,
    };
    store.put_game(&game)?;
    info!(game = %game.id, name = %game.name, "game created");
    Ok(game)
}

/// Move a game between running, paused, and stopped. Stopped is final.
pub fn set_game_status<S: GameStore>(
    store: &S,
    game_id: &str,
    to: GameStatus,
) -> Result<GameRecord, AdminError> {
    let mut game = find_game(store, game_id)?;
    let allowed = match (game.status, to) {
        (GameStatus::Stopped, _) => false,
        (from, to) => from != to,
    };
    if !allowed {
        return Err(AdminError::InvalidTransition {
            from: game.status,
            to,
        });
    }
    store.set_game_status(&game.id, to)?;
    info!(game = %game.id, from = %game.status, %to, "game status changed");
    game.status = to;
    Ok(game)
}

/// Register a participant tracked through a GitHub repository.
pub fn join_game<S: GameStore>(
    store: &S,
    clone_root: &Path,
    request: &JoinRequest,
) -> Result<ParticipantRecord, AdminError> {
    let game_id = required(&request.game_id, "game_id")?;
    let name = required(&request.name, "name")?;
    let url = required(&request.repo_url, "repo_url")?;

    let game = running_game(store, game_id)?;
    let full_name =
        parse_full_name(url).ok_or_else(|| AdminError::InvalidRepositoryUrl(url.to_string()))?;
    let workdir = clone_root.join(&game.id).join(&full_name);
    register(store, &game, name, full_name, workdir, false)
}

/// Register a participant tracked through an existing local working copy.
pub fn join_local<S: GameStore>(
    store: &S,
    game_id: &str,
    name: &str,
    path: &Path,
) -> Result<ParticipantRecord, AdminError> {
    let game_id = required(game_id, "game_id")?;
    let name = required(name, "name")?;
    let game = running_game(store, game_id)?;
    let workdir = path
        .canonicalize()
        .map_err(|_| AdminError::WorkingCopyMissing(path.display().to_string()))?;
    let locator = workdir.display().to_string();
    register(store, &game, name, locator, workdir, true)
}

fn register<S: GameStore>(
    store: &S,
    game: &GameRecord,
    name: &str,
    locator: String,
    workdir: PathBuf,
    is_local: bool,
) -> Result<ParticipantRecord, AdminError> {
    let existing = store.list_participants(&game.id)?;
    if existing.iter().any(|other| same_locator(&other.locator, &locator)) {
        return Err(AdminError::DuplicateRepository(locator));
    }
    let taken: Vec<String> = existing.into_iter().map(|other| other.id).collect();
    let participant = ParticipantRecord {
        id: unique_id(&taken),
        game_id: game.id.clone(),
        name: name.to_string(),
        locator,
        score: 0.0,
        feedback: INITIAL_FEEDBACK.to_string(),
        last_synced: String::new(),
        workdir,
        is_local,
        paused: false,
    };
    store.put_participant(&participant)?;
    info!(game = %game.id, participant = %participant.id, locator = %participant.locator, "participant joined");
    Ok(participant)
}

/// Forget everything processed for a participant so the next cycle starts over.
pub fn reset_participant<S: GameStore>(
    store: &S,
    game_id: &str,
    participant_id: &str,
) -> Result<ParticipantRecord, AdminError> {
    let mut participant = find_participant(store, game_id, participant_id)?;
    store.delete_history(&participant.game_id, &participant.id)?;
    participant.last_synced.clear();
    participant.score = 0.0;
    participant.feedback = INITIAL_FEEDBACK.to_string();
    participant.paused = false;
    store.put_participant(&participant)?;
    info!(game = %participant.game_id, participant = %participant.id, "participant reset");
    Ok(participant)
}

/// Flip the participant's paused flag and return the new value.
pub fn toggle_participant_pause<S: GameStore>(
    store: &S,
    game_id: &str,
    participant_id: &str,
) -> Result<bool, AdminError> {
    let participant = find_participant(store, game_id, participant_id)?;
    let paused = !participant.paused;
    store.set_participant_field(
        &participant.game_id,
        &participant.id,
        ParticipantField::Paused(paused),
    )?;
    Ok(paused)
}

/// Participants of a game, highest score first (ties by name).
pub fn scoreboard<S: GameStore>(
    store: &S,
    game_id: &str,
) -> Result<Vec<ParticipantRecord>, AdminError> {
    let game = find_game(store, game_id)?;
    let mut participants = store.list_participants(&game.id)?;
    participants.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.name.cmp(&b.name)));
    Ok(participants)
}

pub fn participant_view<S: GameStore>(
    store: &S,
    game_id: &str,
    participant_id: &str,
) -> Result<ParticipantView, AdminError> {
    let participant = find_participant(store, game_id, participant_id)?;
    let history = store.history(&participant.game_id, &participant.id)?;
    let records: Vec<CommitRecord> = history.iter().map(|entry| entry.record.clone()).collect();
    let report = score_history(&records);
    Ok(ParticipantView {
        participant,
        history,
        report,
    })
}

pub fn find_game<S: GameStore>(store: &S, game_id: &str) -> Result<GameRecord, AdminError> {
    let game_id = normalize_id(required(game_id, "game_id")?);
    store
        .game(&game_id)?
        .ok_or(AdminError::GameNotFound(game_id))
}

fn running_game<S: GameStore>(store: &S, game_id: &str) -> Result<GameRecord, AdminError> {
    let game = find_game(store, game_id)?;
    if game.status != GameStatus::Running {
        return Err(AdminError::GameNotRunning {
            game_id: game.id,
            status: game.status,
        });
    }
    Ok(game)
}

fn find_participant<S: GameStore>(
    store: &S,
    game_id: &str,
    participant_id: &str,
) -> Result<ParticipantRecord, AdminError> {
    let game = find_game(store, game_id)?;
    let participant_id = normalize_id(required(participant_id, "participant_id")?);
    store
        .participant(&game.id, &participant_id)?
        .ok_or(AdminError::ParticipantNotFound {
            game_id: game.id,
            participant_id,
        })
}

fn required<'a>(value: &'a str, field: &'static str) -> Result<&'a str, AdminError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AdminError::MissingField(field));
    }
    Ok(trimmed)
}

fn normalize_id(id: &str) -> String {
    id.to_ascii_uppercase()
}

fn unique_id(taken: &[String]) -> String {
    loop {
        let id = generate_short_id();
        if !taken.iter().any(|other| other.eq_ignore_ascii_case(&id)) {
            return id;
        }
    }
}

fn generate_short_id() -> String {
    let mut rng = rand::thread_rng();
    std::iter::repeat_with(|| rng.sample(Alphanumeric))
        .map(char::from)
        .take(ID_LEN)
        .collect::<String>()
        .to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::store::FileStore;
    use crate::test_support::TestRepo;

    fn store() -> (tempfile::TempDir, FileStore) {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = FileStore::new(temp.path().join("state"));
        (temp, store)
    }

    fn join(game_id: &str, name: &str, url: &str) -> JoinRequest {
        JoinRequest {
            game_id: game_id.to_string(),
            name: name.to_string(),
            repo_url: url.to_string(),
        }
    }

    #[test]
    fn created_games_get_short_uppercase_ids() {
        let (_temp, store) = store();
        let game = create_game(&store, "Kata night").expect("create");
        assert_eq!(game.id.len(), ID_LEN);
        assert!(game.id.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
        assert_eq!(game.status, GameStatus::Running);
        assert!(matches!(create_game(&store, "  "), Err(AdminError::MissingField("name"))));
    }

    #[test]
    fn join_registers_participant_with_initial_state() {
        let (temp, store) = store();
        let game = create_game(&store, "Kata").expect("create");
        let clone_root = temp.path().join("clones");
        let player = join_game(
            &store,
            &clone_root,
            &join(&game.id.to_lowercase(), "Alice", "https://github.com/Alice/Kata.git"),
        )
        .expect("join");
        assert_eq!(player.locator, "Alice/Kata");
        assert_eq!(player.feedback, INITIAL_FEEDBACK);
        assert_eq!(player.workdir, clone_root.join(&game.id).join("Alice/Kata"));
        assert!(!player.is_local);
        assert_eq!(store.list_participants(&game.id).expect("list").len(), 1);
    }

    #[test]
    fn join_rejects_duplicates_and_bad_input() {
        let (temp, store) = store();
        let game = create_game(&store, "Kata").expect("create");
        let root = temp.path().join("clones");
        let alice = join(&game.id, "Alice", "https://github.com/alice/kata");
        join_game(&store, &root, &alice).expect("join");

        let dup = join_game(
            &store,
            &root,
            &join(&game.id, "Mallory", "git@github.com:ALICE/KATA.git"),
        );
        assert!(matches!(dup, Err(AdminError::DuplicateRepository(_))));
        let bad = join_game(&store, &root, &join(&game.id, "Bob", "https://gitlab.com/bob/kata"));
        assert!(matches!(bad, Err(AdminError::InvalidRepositoryUrl(_))));
        let missing = join_game(&store, &root, &join(&game.id, "", "https://github.com/bob/kata"));
        assert!(matches!(missing, Err(AdminError::MissingField("name"))));
        let unknown = join_game(
            &store,
            &root,
            &join("ZZZZZZ", "Bob", "https://github.com/bob/kata"),
        );
        assert!(matches!(unknown, Err(AdminError::GameNotFound(_))));
    }

    #[test]
    fn join_requires_running_game() {
        let (temp, store) = store();
        let game = create_game(&store, "Kata").expect("create");
        set_game_status(&store, &game.id, GameStatus::Paused).expect("pause");
        let err = join_game(
            &store,
            temp.path(),
            &join(&game.id, "Bob", "https://github.com/bob/kata"),
        );
        assert!(matches!(err, Err(AdminError::GameNotRunning { .. })));
    }

    #[test]
    fn stopped_games_stay_stopped() {
        let (_temp, store) = store();
        let game = create_game(&store, "Kata").expect("create");
        set_game_status(&store, &game.id, GameStatus::Paused).expect("pause");
        set_game_status(&store, &game.id, GameStatus::Running).expect("resume");
        assert!(matches!(
            set_game_status(&store, &game.id, GameStatus::Running),
            Err(AdminError::InvalidTransition { .. })
        ));
        set_game_status(&store, &game.id, GameStatus::Stopped).expect("stop");
        assert!(matches!(
            set_game_status(&store, &game.id, GameStatus::Running),
            Err(AdminError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn local_participants_point_at_existing_working_copies() {
        let (temp, store) = store();
        let game = create_game(&store, "Kata").expect("create");
        let repo = TestRepo::new().expect("repo");
        let player = join_local(&store, &game.id, "Local", repo.root()).expect("join");
        assert!(player.is_local);
        assert_eq!(player.workdir, repo.root().canonicalize().expect("canonical"));

        let missing = join_local(&store, &game.id, "Ghost", &temp.path().join("ghost"));
        assert!(matches!(missing, Err(AdminError::WorkingCopyMissing(_))));
    }

    #[test]
    fn reset_clears_processing_state() {
        let (temp, store) = store();
        let game = create_game(&store, "Kata").expect("create");
        let player = join_game(
            &store,
            temp.path(),
            &join(&game.id, "Alice", "https://github.com/alice/kata"),
        )
        .expect("join");
        let mut dirty = player.clone();
        dirty.score = 9.5;
        dirty.last_synced = "abc".to_string();
        dirty.feedback = "Error pulling latest changes".to_string();
        dirty.paused = true;
        store.put_participant(&dirty).expect("dirty");

        let reset = reset_participant(&store, &game.id, &player.id.to_lowercase()).expect("reset");
        assert_eq!(reset, player);
        assert_eq!(store.participant(&game.id, &player.id).expect("load"), Some(player));
    }

    #[test]
    fn pause_toggles_and_scoreboard_sorts_by_score() {
        let (temp, store) = store();
        let game = create_game(&store, "Kata").expect("create");
        let alice = join_game(
            &store,
            temp.path(),
            &join(&game.id, "Alice", "https://github.com/alice/kata"),
        )
        .expect("join");
        let mut bob = join_game(
            &store,
            temp.path(),
            &join(&game.id, "Bob", "https://github.com/bob/kata"),
        )
        .expect("join");
        bob.score = 3.5;
        store.put_participant(&bob).expect("score bob");

        assert!(toggle_participant_pause(&store, &game.id, &alice.id).expect("pause"));
        assert!(!toggle_participant_pause(&store, &game.id, &alice.id).expect("resume"));

        let names: Vec<String> = scoreboard(&store, &game.id)
            .expect("scoreboard")
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(names, vec!["Bob".to_string(), "Alice".to_string()]);
    }

    #[test]
    fn unknown_participant_is_reported() {
        let (_temp, store) = store();
        let game = create_game(&store, "Kata").expect("create");
        let err = participant_view(&store, &game.id, "NOPE00").unwrap_err();
        assert!(matches!(err, AdminError::ParticipantNotFound { .. }));
    }
}
