mod render;

use std::collections::HashSet;
use std::io;
use std::sync::mpsc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::execute;
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::widgets::TableState;

use crate::db::{BookmarkRecord, WatchProgressRecord};
use crate::store::{LocalStateStore, Snapshot};

use super::describe_store_error;
use self::render::draw_tui;

/// How often the dashboard re-reads rows written by other reeltrack processes.
const EXTERNAL_RELOAD_INTERVAL: Duration = Duration::from_secs(2);

/// One title in the library view.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct LibraryRow {
    pub(crate) id: String,
    pub(crate) bookmarked: bool,
    pub(crate) play_head_in_sec: Option<f64>,
    pub(crate) updated_at: Option<DateTime<Utc>>,
}

pub(crate) enum StoreEvent {
    Bookmarks(Snapshot<BookmarkRecord>),
    Progress(Snapshot<WatchProgressRecord>),
}

#[derive(Debug, Clone)]
pub(super) struct PendingDelete {
    pub(super) ids: Vec<String>,
}

pub(super) struct ViewState {
    pub(super) rows: Vec<LibraryRow>,
    pub(super) table_state: TableState,
    pub(super) marked: HashSet<String>,
    pub(super) status: String,
    pub(super) pending_delete: Option<PendingDelete>,
    pub(super) bookmark_count: usize,
}

/// Titles with progress come first, most recently watched on top; titles that
/// are only bookmarked follow in id order.
pub(crate) fn build_rows(
    bookmarks: &Snapshot<BookmarkRecord>,
    progress: &Snapshot<WatchProgressRecord>,
) -> Vec<LibraryRow> {
    let mut watched: Vec<&WatchProgressRecord> = progress.values().collect();
    watched.sort_by(|left, right| {
        right
            .updated_at
            .cmp(&left.updated_at)
            .then_with(|| left.id.cmp(&right.id))
    });

    let mut rows: Vec<LibraryRow> = watched
        .into_iter()
        .map(|record| LibraryRow {
            id: record.id.clone(),
            bookmarked: bookmarks.contains_key(&record.id),
            play_head_in_sec: Some(record.play_head_in_sec),
            updated_at: Some(record.updated_at),
        })
        .collect();
    rows.extend(
        bookmarks
            .keys()
            .filter(|id| !progress.contains_key(*id))
            .map(|id| LibraryRow {
                id: id.clone(),
                bookmarked: true,
                play_head_in_sec: None,
                updated_at: None,
            }),
    );
    rows
}

struct TerminalSession;

impl TerminalSession {
    fn enter() -> Result<Self> {
        enable_raw_mode().context("failed to enable raw mode")?;
        execute!(io::stdout(), EnterAlternateScreen).context("failed to enter alternate screen")?;
        Ok(Self)
    }
}

impl Drop for TerminalSession {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let _ = execute!(io::stdout(), LeaveAlternateScreen);
    }
}

pub(crate) fn run_tui(store: &LocalStateStore) -> Result<()> {
    let (tx, rx) = mpsc::channel::<StoreEvent>();
    let bookmarks_tx = tx.clone();
    let _bookmarks_sub = store.subscribe_bookmarks(move |snapshot| {
        let _ = bookmarks_tx.send(StoreEvent::Bookmarks(snapshot.clone()));
    });
    let _progress_sub = store.subscribe_watch_progress(move |snapshot| {
        let _ = tx.send(StoreEvent::Progress(snapshot.clone()));
    });

    let _session = TerminalSession::enter()?;
    let mut terminal = Terminal::new(CrosstermBackend::new(io::stdout()))
        .context("failed to initialize terminal backend")?;
    terminal.clear()?;

    let mut bookmarks: Snapshot<BookmarkRecord> = Snapshot::default();
    let mut progress: Snapshot<WatchProgressRecord> = Snapshot::default();
    let mut view = ViewState {
        rows: Vec::new(),
        table_state: TableState::default(),
        marked: HashSet::new(),
        status: status_info("Ready."),
        pending_delete: None,
        bookmark_count: 0,
    };

    let mut last_reload = Instant::now();
    loop {
        if last_reload.elapsed() >= EXTERNAL_RELOAD_INTERVAL {
            last_reload = Instant::now();
            if let Err(err) = store.reload() {
                view.status = status_error(&describe_store_error(&err));
            }
        }
        if drain_store_events(&rx, &mut bookmarks, &mut progress) {
            refresh_rows(&mut view, &bookmarks, &progress);
        }
        terminal.draw(|frame| draw_tui(frame, &mut view))?;

        if !event::poll(Duration::from_millis(200))? {
            continue;
        }
        let Event::Key(key) = event::read()? else {
            continue;
        };
        if key.kind != KeyEventKind::Press {
            continue;
        }

        if let Some(pending) = view.pending_delete.as_ref() {
            match key.code {
                KeyCode::Char('y') | KeyCode::Enter => {
                    let ids = pending.ids.clone();
                    view.pending_delete = None;
                    match store.bulk_remove_bookmarks(ids.iter().map(String::as_str)) {
                        Ok(removed) => {
                            view.marked.clear();
                            view.status = status_info(&format!("Removed {removed} bookmark(s)."));
                        }
                        Err(err) => view.status = status_error(&describe_store_error(&err)),
                    }
                }
                KeyCode::Esc | KeyCode::Char('n') => {
                    view.pending_delete = None;
                    view.status = status_info("Delete canceled.");
                }
                _ => {}
            }
            continue;
        }

        match key.code {
            KeyCode::Char('q') => break,
            KeyCode::Up => {
                if let Some(selected) = view.table_state.selected() {
                    view.table_state.select(Some(selected.saturating_sub(1)));
                }
            }
            KeyCode::Down => {
                if let Some(selected) = view.table_state.selected()
                    && !view.rows.is_empty()
                {
                    let next = (selected + 1).min(view.rows.len() - 1);
                    view.table_state.select(Some(next));
                }
            }
            KeyCode::Char('b') => {
                let Some(id) = selected_row(&view).map(|row| row.id.clone()) else {
                    view.status = status_error("No title selected.");
                    continue;
                };
                view.status = match store.toggle_bookmark(&id) {
                    Ok(true) => status_info(&format!("Bookmarked {id}.")),
                    Ok(false) => status_info(&format!("Removed bookmark for {id}.")),
                    Err(err) => status_error(&describe_store_error(&err)),
                };
            }
            KeyCode::Char(' ') => {
                let Some((id, bookmarked)) =
                    selected_row(&view).map(|row| (row.id.clone(), row.bookmarked))
                else {
                    continue;
                };
                if !bookmarked {
                    view.status = status_error("Only bookmarked titles can be marked.");
                    continue;
                }
                if !view.marked.remove(&id) {
                    view.marked.insert(id);
                }
            }
            KeyCode::Char('d') => {
                let mut ids: Vec<String> = if view.marked.is_empty() {
                    selected_row(&view)
                        .filter(|row| row.bookmarked)
                        .map(|row| vec![row.id.clone()])
                        .unwrap_or_default()
                } else {
                    view.marked.iter().cloned().collect()
                };
                if ids.is_empty() {
                    view.status = status_error("Nothing to remove: select or mark bookmarks.");
                    continue;
                }
                ids.sort();
                view.pending_delete = Some(PendingDelete { ids });
                view.status = status_info("Confirm: y/Enter to remove, n/Esc to cancel.");
            }
            _ => {}
        }
    }

    terminal.show_cursor()?;
    Ok(())
}

fn selected_row(view: &ViewState) -> Option<&LibraryRow> {
    view.table_state
        .selected()
        .and_then(|idx| view.rows.get(idx))
}

/// Applies queued store notifications. Returns whether anything changed.
pub(crate) fn drain_store_events(
    rx: &mpsc::Receiver<StoreEvent>,
    bookmarks: &mut Snapshot<BookmarkRecord>,
    progress: &mut Snapshot<WatchProgressRecord>,
) -> bool {
    let mut changed = false;
    while let Ok(event) = rx.try_recv() {
        match event {
            StoreEvent::Bookmarks(snapshot) => *bookmarks = snapshot,
            StoreEvent::Progress(snapshot) => *progress = snapshot,
        }
        changed = true;
    }
    changed
}

fn refresh_rows(
    view: &mut ViewState,
    bookmarks: &Snapshot<BookmarkRecord>,
    progress: &Snapshot<WatchProgressRecord>,
) {
    let selected_id = selected_row(view).map(|row| row.id.clone());
    view.rows = build_rows(bookmarks, progress);
    view.bookmark_count = bookmarks.len();
    view.marked.retain(|id| bookmarks.contains_key(id));

    if view.rows.is_empty() {
        view.table_state.select(None);
        return;
    }
    if let Some(id) = selected_id
        && let Some(idx) = view.rows.iter().position(|row| row.id == id)
    {
        view.table_state.select(Some(idx));
        return;
    }
    match view.table_state.selected() {
        Some(selected) => view.table_state.select(Some(selected.min(view.rows.len() - 1))),
        None => view.table_state.select(Some(0)),
    }
}

pub(super) fn status_info(msg: &str) -> String {
    format!("INFO: {msg}")
}

pub(super) fn status_error(msg: &str) -> String {
    format!("ERROR: {msg}")
}
