pub(crate) mod cipher;
mod episode;
mod process;
mod tui;
mod watch;


use anyhow::{Context, Result, bail};
use chrono::Utc;

use crate::cli::{BookmarkCommand, Cli, Command, PlayArgs, ProgressCommand};
use crate::config::Settings;
use crate::error::StoreError;
use crate::store::{BOOKMARK_CAPACITY, LocalStateStore};

use self::episode::{
    Season, format_play_head, format_updated_at_display, group, parse_entries, seasons_to_json,
    truncate,
};
use self::watch::{EpisodeSelector, WatchRequest, describe_outcome, run_watch};

pub fn run(cli: Cli) -> Result<()> {
    let mut settings = Settings::from_env()?;
    if let Some(db) = cli.db {
        settings.database_path = db;
    }

    match cli.command {
        Some(Command::Episodes {
            file,
            chunk_size,
            json,
        }) => run_episodes(&settings, &file, chunk_size, json)?,
        Some(Command::Encrypt { plaintext }) => {
            let hex = cipher::encode(plaintext.as_bytes(), &settings.cipher_key)?;
            println!("{hex}");
        }
        Some(Command::Bookmark(command)) => run_bookmark(&open_store(&settings)?, command)?,
        Some(Command::Progress(command)) => run_progress(&open_store(&settings)?, command)?,
        Some(Command::Play(args)) => run_play(&open_store(&settings)?, settings, args)?,
        Some(Command::Tui) | None => tui::run_tui(&open_store(&settings)?)?,
    }

    Ok(())
}

fn open_store(settings: &Settings) -> Result<LocalStateStore> {
    LocalStateStore::open(&settings.database_path).with_context(|| {
        format!(
            "failed to open state store at {}",
            settings.database_path.display()
        )
    })
}

fn run_episodes(
    settings: &Settings,
    file: &std::path::Path,
    chunk_size: Option<usize>,
    json: bool,
) -> Result<()> {
    let raw = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read episode list {}", file.display()))?;
    let entries = parse_entries(&raw)?;
    let seasons = group(
        &entries,
        chunk_size.unwrap_or(settings.chunk_size),
        &settings.cipher_key,
    )?;

    if json {
        println!("{}", serde_json::to_string_pretty(&seasons_to_json(&seasons))?);
    } else {
        print_seasons(&seasons);
    }
    Ok(())
}

fn print_seasons(seasons: &[Season]) {
    if seasons.is_empty() {
        println!("No episodes.");
        return;
    }
    for season in seasons {
        println!("{}", season.title);
        for episode in &season.episodes {
            println!(
                "  {:>3}  #{:<5} {:<32} {}",
                episode.number,
                episode.id,
                truncate(&episode.title, 32),
                episode.url.as_deref().unwrap_or("<undecodable>")
            );
        }
    }
}

fn run_bookmark(store: &LocalStateStore, command: BookmarkCommand) -> Result<()> {
    match command {
        BookmarkCommand::Add { id } => {
            report_store(store.add_bookmark(&id))?;
            println!("Bookmarked {id}.");
        }
        BookmarkCommand::Remove { ids } => {
            let removed =
                report_store(store.bulk_remove_bookmarks(ids.iter().map(String::as_str)))?;
            println!("Removed {removed} of {} bookmark(s).", ids.len());
        }
        BookmarkCommand::Toggle { id } => {
            if report_store(store.toggle_bookmark(&id))? {
                println!("Bookmarked {id}.");
            } else {
                println!("Removed bookmark for {id}.");
            }
        }
        BookmarkCommand::List => {
            let mut ids: Vec<String> = store.list_bookmarks().into_iter().map(|b| b.id).collect();
            if ids.is_empty() {
                println!("No bookmarks yet. Run `reeltrack bookmark add <id>`.");
                return Ok(());
            }
            ids.sort();
            println!("{} of {BOOKMARK_CAPACITY} bookmarks", ids.len());
            for id in ids {
                println!("  {id}");
            }
        }
    }
    Ok(())
}

fn run_progress(store: &LocalStateStore, command: ProgressCommand) -> Result<()> {
    match command {
        ProgressCommand::Set { id, seconds } => {
            report_store(store.upsert_watch_progress(&id, seconds, Utc::now()))?;
            println!("Saved position for {id}: {}", format_play_head(seconds));
        }
        ProgressCommand::Get { id } => match store.get_watch_progress(&id) {
            Some(record) => println!(
                "{id}: {} ({:.1}s), updated {}",
                format_play_head(record.play_head_in_sec),
                record.play_head_in_sec,
                format_updated_at_display(&record.updated_at)
            ),
            None => println!("No saved position for {id}."),
        },
        ProgressCommand::List => {
            let records = store.list_watch_progress();
            if records.is_empty() {
                println!("No saved positions yet.");
                return Ok(());
            }
            println!("{:<40} {:<10} {:<28}", "TITLE", "RESUME", "UPDATED");
            for record in records {
                println!(
                    "{:<40} {:<10} {:<28}",
                    truncate(&record.id, 40),
                    format_play_head(record.play_head_in_sec),
                    format_updated_at_display(&record.updated_at)
                );
            }
        }
    }
    Ok(())
}

fn run_play(store: &LocalStateStore, mut settings: Settings, args: PlayArgs) -> Result<()> {
    if let Some(player) = args.player {
        settings.player_bin = player;
    }
    let episode = match (args.episode, args.season, args.number) {
        (Some(id), _, _) => EpisodeSelector::Overall(id),
        (None, Some(season), Some(number)) => EpisodeSelector::InSeason { season, number },
        _ => bail!("pass --episode <N> or --season <S> --number <E>"),
    };
    let request = WatchRequest {
        title_id: args.title_id,
        entries_path: args.file,
        episode,
        duration_secs: args.duration,
        from_start: args.from_start,
    };

    let outcome = run_watch(store, &settings, &request)?;
    println!("{}", describe_outcome(&request.title_id, &outcome));
    Ok(())
}

/// Turns a store error into a user-facing message that names its kind.
fn report_store<T>(result: Result<T, StoreError>) -> Result<T> {
    result.map_err(|err| {
        let message = describe_store_error(&err);
        anyhow::Error::new(err).context(message)
    })
}

fn describe_store_error(err: &StoreError) -> String {
    match err {
        StoreError::CapacityExceeded { capacity } => {
            format!("Bookmark list is full ({capacity}). Remove some bookmarks first.")
        }
        StoreError::InvalidArgument(msg) => format!("Invalid request: {msg}"),
        StoreError::StorageUnavailable(fault) => format!("Storage unavailable: {fault}"),
    }
}
