//! Game, participant, and history storage.
//!
//! [`GameStore`] is the seam the tracker and admin commands talk to. [`FileStore`]
//! keeps one JSON file per game and one per participant (record plus history),
//! each replaced atomically so a polling cycle's update becomes visible at once.
//! Every read-modify-write of a participant file holds an advisory lock on a
//! sibling `<P>.lock` file, so the CLI and the polling daemon never interleave.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use fslock::LockFile;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::types::{CommitRecord, GameStatus};

pub const INITIAL_FEEDBACK: &str = "Waiting for initial pull…";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameRecord {
    pub id: String,
    pub name: String,
    pub status: GameStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantRecord {
    pub id: String,
    pub game_id: String,
    pub name: String,
    /// `owner/repo` for remote participants, the working-copy path for local ones.
    pub locator: String,
    pub score: f64,
    /// Latest feedback text; also carries synchronization errors.
    pub feedback: String,
    /// Empty until the first successful cycle.
    pub last_synced: String,
    pub workdir: PathBuf,
    pub is_local: bool,
    pub paused: bool,
}

/// One processed commit plus the feedback it received.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    #[serde(flatten)]
    pub record: CommitRecord,
    #[serde(default)]
    pub feedback: String,
}

/// Single-field participant updates.
#[derive(Debug, Clone, PartialEq)]
pub enum ParticipantField {
    Score(f64),
    Feedback(String),
    LastSynced(String),
    Paused(bool),
}

/// Everything a successful cycle writes for one participant.
///
/// `synced_from` and `history_len` describe the state the cycle started from;
/// the update is refused when the stored participant no longer matches them.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleUpdate {
    pub synced_from: String,
    pub history_len: usize,
    pub new_entries: Vec<HistoryEntry>,
    pub last_synced: String,
    pub score: f64,
    pub feedback: String,
}

pub trait GameStore {
    fn list_games(&self) -> Result<Vec<GameRecord>>;
    fn game(&self, game_id: &str) -> Result<Option<GameRecord>>;
    /// Create or replace a game record.
    fn put_game(&self, game: &GameRecord) -> Result<()>;
    fn set_game_status(&self, game_id: &str, status: GameStatus) -> Result<()>;

    fn list_participants(&self, game_id: &str) -> Result<Vec<ParticipantRecord>>;
    fn participant(&self, game_id: &str, participant_id: &str) -> Result<Option<ParticipantRecord>>;
    /// Create or replace a participant record, keeping any existing history.
    fn put_participant(&self, participant: &ParticipantRecord) -> Result<()>;
    fn set_participant_field(
        &self,
        game_id: &str,
        participant_id: &str,
        field: ParticipantField,
    ) -> Result<()>;

    fn history(&self, game_id: &str, participant_id: &str) -> Result<Vec<HistoryEntry>>;
    fn append_history(
        &self,
        game_id: &str,
        participant_id: &str,
        entry: &HistoryEntry,
    ) -> Result<()>;
    fn delete_history(&self, game_id: &str, participant_id: &str) -> Result<()>;

    /// Apply a cycle's results as one visible write.
    fn commit_cycle(&self, game_id: &str, participant_id: &str, update: &CycleUpdate) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ParticipantFile {
    participant: ParticipantRecord,
    #[serde(default)]
    history: Vec<HistoryEntry>,
}

/// JSON files under `<root>/games/<GAME>/`.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn games_dir(&self) -> PathBuf {
        self.root.join("games")
    }

    fn game_path(&self, game_id: &str) -> PathBuf {
        self.games_dir().join(game_id).join("game.json")
    }

    fn participants_dir(&self, game_id: &str) -> PathBuf {
        self.games_dir().join(game_id).join("participants")
    }

    fn participant_path(&self, game_id: &str, participant_id: &str) -> PathBuf {
        self.participants_dir(game_id).join(format!("{participant_id}.json"))
    }

    fn load_participant_file(
        &self,
        game_id: &str,
        participant_id: &str,
    ) -> Result<Option<ParticipantFile>> {
        read_json(&self.participant_path(game_id, participant_id))
    }

    fn require_participant_file(
        &self,
        game_id: &str,
        participant_id: &str,
    ) -> Result<ParticipantFile> {
        self.load_participant_file(game_id, participant_id)?
            .ok_or_else(|| anyhow!("participant {participant_id} not found in game {game_id}"))
    }

    /// Exclusive lock on one participant file, released when dropped.
    fn lock_participant(&self, game_id: &str, participant_id: &str) -> Result<LockFile> {
        let dir = self.participants_dir(game_id);
        fs::create_dir_all(&dir).with_context(|| format!("create directory {}", dir.display()))?;
        let path = dir.join(format!("{participant_id}.lock"));
        let mut lock = LockFile::open(path.as_path())
            .with_context(|| format!("open lock {}", path.display()))?;
        lock.lock().with_context(|| format!("lock {}", path.display()))?;
        Ok(lock)
    }

    fn write_participant_file(&self, file: &ParticipantFile) -> Result<()> {
        let path = self.participant_path(&file.participant.game_id, &file.participant.id);
        debug!(path = %path.display(), history = file.history.len(), "writing participant");
        write_json(&path, file)
    }
}

impl GameStore for FileStore {
    fn list_games(&self) -> Result<Vec<GameRecord>> {
        let mut games = Vec::new();
        for id in list_dir_names(&self.games_dir())? {
            if let Some(game) = self.game(&id)? {
                games.push(game);
            }
        }
        Ok(games)
    }

    fn game(&self, game_id: &str) -> Result<Option<GameRecord>> {
        read_json(&self.game_path(game_id))
    }

    fn put_game(&self, game: &GameRecord) -> Result<()> {
        write_json(&self.game_path(&game.id), game)
    }

    fn set_game_status(&self, game_id: &str, status: GameStatus) -> Result<()> {
        let mut game = self
            .game(game_id)?
            .ok_or_else(|| anyhow!("game {game_id} not found"))?;
        game.status = status;
        self.put_game(&game)
    }

    fn list_participants(&self, game_id: &str) -> Result<Vec<ParticipantRecord>> {
        let dir = self.participants_dir(game_id);
        let mut participants = Vec::new();
        for name in list_dir_names(&dir)? {
            let Some(id) = name.strip_suffix(".json") else {
                continue;
            };
            if let Some(file) = self.load_participant_file(game_id, id)? {
                participants.push(file.participant);
            }
        }
        Ok(participants)
    }

    fn participant(
        &self,
        game_id: &str,
        participant_id: &str,
    ) -> Result<Option<ParticipantRecord>> {
        Ok(self
            .load_participant_file(game_id, participant_id)?
            .map(|file| file.participant))
    }

    fn put_participant(&self, participant: &ParticipantRecord) -> Result<()> {
        let _lock = self.lock_participant(&participant.game_id, &participant.id)?;
        let history = self
            .load_participant_file(&participant.game_id, &participant.id)?
            .map(|file| file.history)
            .unwrap_or_default();
        self.write_participant_file(&ParticipantFile {
            participant: participant.clone(),
            history,
        })
    }

    fn set_participant_field(
        &self,
        game_id: &str,
        participant_id: &str,
        field: ParticipantField,
    ) -> Result<()> {
        let _lock = self.lock_participant(game_id, participant_id)?;
        let mut file = self.require_participant_file(game_id, participant_id)?;
        let participant = &mut file.participant;
        match field {
            ParticipantField::Score(score) => participant.score = score,
            ParticipantField::Feedback(text) => participant.feedback = text,
            ParticipantField::LastSynced(sha) => participant.last_synced = sha,
            ParticipantField::Paused(paused) => participant.paused = paused,
        }
        self.write_participant_file(&file)
    }

    fn history(&self, game_id: &str, participant_id: &str) -> Result<Vec<HistoryEntry>> {
        Ok(self.require_participant_file(game_id, participant_id)?.history)
    }

    fn append_history(
        &self,
        game_id: &str,
        participant_id: &str,
        entry: &HistoryEntry,
    ) -> Result<()> {
        let _lock = self.lock_participant(game_id, participant_id)?;
        let mut file = self.require_participant_file(game_id, participant_id)?;
        file.history.push(entry.clone());
        self.write_participant_file(&file)
    }

    fn delete_history(&self, game_id: &str, participant_id: &str) -> Result<()> {
        let _lock = self.lock_participant(game_id, participant_id)?;
        let mut file = self.require_participant_file(game_id, participant_id)?;
        file.history.clear();
        self.write_participant_file(&file)
    }

    fn commit_cycle(
        &self,
        game_id: &str,
        participant_id: &str,
        update: &CycleUpdate,
    ) -> Result<()> {
        let _lock = self.lock_participant(game_id, participant_id)?;
        let mut file = self.require_participant_file(game_id, participant_id)?;
        if file.participant.last_synced != update.synced_from
            || file.history.len() != update.history_len
        {
            return Err(anyhow!(
                "participant {participant_id} changed while the cycle ran; results discarded"
            ));
        }
        for entry in &update.new_entries {
            if file.history.iter().any(|seen| seen.record.sha == entry.record.sha) {
                return Err(anyhow!(
                    "commit {} already recorded for participant {participant_id}",
                    entry.record.sha
                ));
            }
            file.history.push(entry.clone());
        }
        file.participant.last_synced = update.last_synced.clone();
        file.participant.score = update.score;
        file.participant.feedback = update.feedback.clone();
        self.write_participant_file(&file)
    }
}

fn list_dir_names(dir: &Path) -> Result<Vec<String>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut names = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("read directory {}", dir.display()))? {
        let entry = entry.with_context(|| format!("read entry in {}", dir.display()))?;
        if let Some(name) = entry.file_name().to_str() {
            names.push(name.to_string());
        }
    }
    names.sort();
    Ok(names)
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let value =
        serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    Ok(Some(value))
}

/// Atomically write JSON to disk (temp file + rename).
fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value)?;
    buf.push('\n');
    let parent = path
        .parent()
        .with_context(|| format!("store path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, buf).with_context(|| format!("write temp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}
