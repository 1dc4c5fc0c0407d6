use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command as ProcessCommand, Stdio};
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use chrono::Utc;

use super::episode::{
    Season, SeasonEpisode, find_episode, find_season_episode, format_play_head, group,
    parse_entries,
};
use super::process::run_player;
use crate::config::Settings;
use crate::store::LocalStateStore;

/// Which episode of the resolved listing to play.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EpisodeSelector {
    Overall(u32),
    InSeason { season: u32, number: u32 },
}

#[derive(Debug, Clone)]
pub(crate) struct WatchRequest {
    pub(crate) title_id: String,
    pub(crate) entries_path: PathBuf,
    pub(crate) episode: EpisodeSelector,
    pub(crate) duration_secs: Option<f64>,
    pub(crate) from_start: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct WatchOutcome {
    pub(crate) episode_title: String,
    pub(crate) resumed_from: f64,
    pub(crate) play_head_in_sec: f64,
    pub(crate) player_succeeded: bool,
}

pub(crate) fn load_seasons(path: &Path, settings: &Settings) -> Result<Vec<Season>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read episode list {}", path.display()))?;
    let entries = parse_entries(&raw)
        .with_context(|| format!("failed to parse episode list {}", path.display()))?;
    Ok(group(&entries, settings.chunk_size, &settings.cipher_key)?)
}

pub(crate) fn select_episode(
    seasons: &[Season],
    selector: EpisodeSelector,
) -> Result<&SeasonEpisode> {
    let found = match selector {
        EpisodeSelector::Overall(id) => find_episode(seasons, id),
        EpisodeSelector::InSeason { season, number } => {
            find_season_episode(seasons, season, number)
        }
    };
    found.ok_or_else(|| anyhow!("no such episode: {}", describe_selector(selector)))
}

fn describe_selector(selector: EpisodeSelector) -> String {
    match selector {
        EpisodeSelector::Overall(id) => format!("episode {id}"),
        EpisodeSelector::InSeason { season, number } => {
            format!("season {season} episode {number}")
        }
    }
}

/// Keeps a reported position within `[0, duration]` when the duration is known.
pub(crate) fn clamp_play_head(seconds: f64, duration_secs: Option<f64>) -> f64 {
    let seconds = if seconds.is_finite() { seconds.max(0.0) } else { 0.0 };
    match duration_secs {
        Some(duration) if duration.is_finite() && duration >= 0.0 => seconds.min(duration),
        _ => seconds,
    }
}

pub(crate) fn build_player_command(
    player_bin: &Path,
    url: &str,
    start_secs: f64,
) -> ProcessCommand {
    let mut cmd = ProcessCommand::new(player_bin);
    if start_secs > 0.0 {
        cmd.arg(format!("--start={start_secs:.0}"));
    }
    cmd.arg(url)
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit());
    cmd
}

/// Plays one episode and keeps the title's resume position up to date.
///
/// The position is written at every checkpoint while the player runs and once
/// more on teardown. Nothing is written if the player cannot be started.
///
/// The player reports no position back, so the play head is estimated as the
/// resume point plus wall-clock time since launch. Time spent paused counts
/// as watched; `duration_secs`, when known, caps the estimate.
pub(crate) fn run_watch(
    store: &LocalStateStore,
    settings: &Settings,
    request: &WatchRequest,
) -> Result<WatchOutcome> {
    let seasons = load_seasons(&request.entries_path, settings)?;
    let episode = select_episode(&seasons, request.episode)?;
    let Some(url) = episode.url.as_deref() else {
        bail!(
            "{} ({}) has no playable url",
            episode.title,
            describe_selector(request.episode)
        );
    };

    let resumed_from = if request.from_start {
        0.0
    } else {
        store
            .get_watch_progress(&request.title_id)
            .map(|record| clamp_play_head(record.play_head_in_sec, request.duration_secs))
            .unwrap_or(0.0)
    };
    tracing::info!(
        title_id = %request.title_id,
        episode = %episode.title,
        resumed_from,
        "starting playback"
    );

    let cmd = build_player_command(&settings.player_bin, url, resumed_from);
    let mut last_head = resumed_from;
    let exit = run_player(cmd, settings.checkpoint_interval, |elapsed: Duration| {
        let head = clamp_play_head(resumed_from + elapsed.as_secs_f64(), request.duration_secs);
        store.upsert_watch_progress(&request.title_id, head, Utc::now())?;
        last_head = head;
        Ok(())
    })
    .with_context(|| format!("playback failed for {}", episode.title))?;
    tracing::info!(
        title_id = %request.title_id,
        play_head_in_sec = last_head,
        elapsed_secs = exit.elapsed.as_secs_f64(),
        "playback finished"
    );

    Ok(WatchOutcome {
        episode_title: episode.title.clone(),
        resumed_from,
        play_head_in_sec: last_head,
        player_succeeded: exit.status.success(),
    })
}

pub(crate) fn describe_outcome(title_id: &str, outcome: &WatchOutcome) -> String {
    let mut message = format!(
        "Saved position for {title_id}: {} ({} -> {})",
        outcome.episode_title,
        format_play_head(outcome.resumed_from),
        format_play_head(outcome.play_head_in_sec)
    );
    if !outcome.player_succeeded {
        message.push_str("\nPlayer exited with an error.");
    }
    message
}
