use chrono::{DateTime, Local, Utc};
use serde_json::Value;

use super::cipher::{CipherKey, bytes_to_latin1, decode};
use crate::error::ResolveError;

/// One raw upstream item: an episode label and its hex ciphertext.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct EncryptedEpisodeEntry {
    pub(crate) label: String,
    pub(crate) ciphertext: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DecodedEpisode {
    /// 1-based position in the whole input sequence.
    pub(crate) id: u32,
    pub(crate) title: String,
    /// `None` when the ciphertext could not be decoded.
    pub(crate) url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SeasonEpisode {
    /// 1-based position within the season.
    pub(crate) number: u32,
    /// Overall id, kept so an exact episode stays addressable across seasons.
    pub(crate) id: u32,
    pub(crate) title: String,
    pub(crate) url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Season {
    pub(crate) id: u32,
    pub(crate) title: String,
    pub(crate) episodes: Vec<SeasonEpisode>,
}

/// Parses the upstream list of single-key `{ label: hexCiphertext }` objects.
pub(crate) fn parse_entries(raw: &str) -> Result<Vec<EncryptedEpisodeEntry>, ResolveError> {
    let value: Value =
        serde_json::from_str(raw).map_err(|err| ResolveError::MalformedInput {
            index: 0,
            reason: format!("invalid JSON: {err}"),
        })?;
    let Value::Array(items) = value else {
        return Err(ResolveError::MalformedInput {
            index: 0,
            reason: "expected a JSON array of single-key objects".to_string(),
        });
    };

    items
        .iter()
        .enumerate()
        .map(|(index, item)| parse_entry(index, item))
        .collect()
}

fn parse_entry(index: usize, item: &Value) -> Result<EncryptedEpisodeEntry, ResolveError> {
    let malformed = |reason: &str| ResolveError::MalformedInput {
        index,
        reason: reason.to_string(),
    };

    let object = item.as_object().ok_or_else(|| malformed("entry is not an object"))?;
    if object.len() != 1 {
        return Err(malformed("entry must have exactly one key"));
    }
    let Some((label, ciphertext)) = object.iter().next() else {
        return Err(malformed("entry must have exactly one key"));
    };
    let ciphertext = ciphertext
        .as_str()
        .ok_or_else(|| malformed("ciphertext is not a string"))?;

    Ok(EncryptedEpisodeEntry {
        label: label.clone(),
        ciphertext: ciphertext.trim().to_string(),
    })
}

pub(crate) fn decode_episodes(
    entries: &[EncryptedEpisodeEntry],
    key: &CipherKey,
) -> Vec<DecodedEpisode> {
    entries
        .iter()
        .enumerate()
        .map(|(idx, entry)| {
            let url = match decode(&entry.ciphertext, key) {
                Ok(bytes) => Some(bytes_to_latin1(&bytes)),
                Err(err) => {
                    tracing::debug!(
                        episode = %entry.label,
                        error = %err,
                        "episode url failed to decode"
                    );
                    None
                }
            };
            DecodedEpisode {
                id: (idx + 1) as u32,
                title: entry.label.clone(),
                url,
            }
        })
        .collect()
}

/// Decodes `entries` and splits them into seasons of `chunk_size` episodes.
///
/// Input order is kept as-is. Only the last season may hold fewer than
/// `chunk_size` episodes. Entries that fail to decode stay in place with a
/// `None` url.
pub(crate) fn group(
    entries: &[EncryptedEpisodeEntry],
    chunk_size: usize,
    key: &CipherKey,
) -> Result<Vec<Season>, ResolveError> {
    if chunk_size < 1 {
        return Err(ResolveError::InvalidArgument(format!(
            "chunk size must be at least 1, got {chunk_size}"
        )));
    }

    let decoded = decode_episodes(entries, key);
    let seasons = decoded
        .chunks(chunk_size)
        .enumerate()
        .map(|(chunk_idx, chunk)| {
            let season_id = (chunk_idx + 1) as u32;
            Season {
                id: season_id,
                title: season_title(season_id),
                episodes: chunk
                    .iter()
                    .enumerate()
                    .map(|(pos, episode)| SeasonEpisode {
                        number: (pos + 1) as u32,
                        id: episode.id,
                        title: episode.title.clone(),
                        url: episode.url.clone(),
                    })
                    .collect(),
            }
        })
        .collect();
    Ok(seasons)
}

pub(crate) fn season_title(season_id: u32) -> String {
    format!("Season {season_id:02}")
}

pub(crate) fn find_episode(seasons: &[Season], overall_id: u32) -> Option<&SeasonEpisode> {
    seasons
        .iter()
        .flat_map(|season| season.episodes.iter())
        .find(|episode| episode.id == overall_id)
}

pub(crate) fn find_season_episode(
    seasons: &[Season],
    season_id: u32,
    number: u32,
) -> Option<&SeasonEpisode> {
    seasons
        .iter()
        .find(|season| season.id == season_id)?
        .episodes
        .iter()
        .find(|episode| episode.number == number)
}

pub(crate) fn seasons_to_json(seasons: &[Season]) -> Value {
    Value::Array(
        seasons
            .iter()
            .map(|season| {
                serde_json::json!({
                    "id": season.id,
                    "title": season.title,
                    "episodes": season.episodes.iter().map(|episode| serde_json::json!({
                        "id": episode.number,
                        "overallId": episode.id,
                        "title": episode.title,
                        "url": episode.url,
                    })).collect::<Vec<_>>(),
                })
            })
            .collect(),
    )
}

pub(crate) fn format_play_head(seconds: f64) -> String {
    if !seconds.is_finite() || seconds <= 0.0 {
        return "0:00".to_string();
    }
    let total = seconds.floor() as u64;
    let (hours, minutes, secs) = (total / 3600, (total % 3600) / 60, total % 60);
    if hours > 0 {
        format!("{hours}:{minutes:02}:{secs:02}")
    } else {
        format!("{minutes}:{secs:02}")
    }
}

pub(crate) fn truncate(s: &str, max: usize) -> String {
    let mut out = s.to_string();
    if out.chars().count() > max {
        out = out.chars().take(max.saturating_sub(3)).collect::<String>() + "...";
    }
    out
}

pub(crate) fn format_updated_at_display(ts: &DateTime<Utc>) -> String {
    ts.with_timezone(&Local)
        .format("%Y-%m-%d %H:%M %:z")
        .to_string()
}
