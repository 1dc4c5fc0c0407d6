use std::env;
use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Result, bail};

use crate::app::cipher::CipherKey;
use crate::paths::database_file_path;

/// Key for the play-URL cipher. Replaced at build time by setting
/// `REELTRACK_CIPHER_KEY` in the compiler's environment.
const CIPHER_KEY: &str = match option_env!("REELTRACK_CIPHER_KEY") {
    Some(key) => key,
    None => "s5feqxw21",
};

pub(crate) const DEFAULT_CHUNK_SIZE: usize = 12;
pub(crate) const DEFAULT_CHECKPOINT_SECS: u64 = 10;
const DEFAULT_PLAYER: &str = "mpv";

#[derive(Debug, Clone)]
pub(crate) struct Settings {
    pub(crate) database_path: PathBuf,
    pub(crate) player_bin: PathBuf,
    pub(crate) chunk_size: usize,
    pub(crate) checkpoint_interval: Duration,
    pub(crate) cipher_key: CipherKey,
}

impl Settings {
    pub(crate) fn from_env() -> Result<Self> {
        let database_path = match env::var_os("REELTRACK_DB") {
            Some(value) if !value.is_empty() => PathBuf::from(value),
            _ => database_file_path()?,
        };
        Ok(Self {
            database_path,
            player_bin: resolve_player_bin_from_env(env::var_os("REELTRACK_PLAYER")),
            chunk_size: resolve_chunk_size_from_env(env::var_os("REELTRACK_CHUNK_SIZE"))?,
            checkpoint_interval: resolve_checkpoint_from_env(env::var_os(
                "REELTRACK_CHECKPOINT_SECS",
            ))?,
            cipher_key: CipherKey::new(CIPHER_KEY),
        })
    }
}

pub(crate) fn resolve_player_bin_from_env(env_value: Option<OsString>) -> PathBuf {
    match env_value {
        Some(value) if !value.is_empty() => PathBuf::from(value),
        _ => PathBuf::from(DEFAULT_PLAYER),
    }
}

pub(crate) fn resolve_chunk_size_from_env(env_value: Option<OsString>) -> Result<usize> {
    match parse_positive(env_value, "REELTRACK_CHUNK_SIZE")? {
        Some(value) => Ok(value as usize),
        None => Ok(DEFAULT_CHUNK_SIZE),
    }
}

pub(crate) fn resolve_checkpoint_from_env(env_value: Option<OsString>) -> Result<Duration> {
    let secs = parse_positive(env_value, "REELTRACK_CHECKPOINT_SECS")?
        .unwrap_or(DEFAULT_CHECKPOINT_SECS);
    Ok(Duration::from_secs(secs))
}

fn parse_positive(env_value: Option<OsString>, name: &str) -> Result<Option<u64>> {
    let Some(value) = env_value.filter(|value| !value.is_empty()) else {
        return Ok(None);
    };
    let text = value.to_string_lossy();
    match text.trim().parse::<u64>() {
        Ok(parsed) if parsed > 0 => Ok(Some(parsed)),
        _ => bail!("{name} must be a positive integer, got '{text}'"),
    }
}
