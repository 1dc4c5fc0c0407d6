use ratatui::Frame;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{
    Block, BorderType, Borders, Cell, Clear, Padding, Paragraph, Row, Table, Wrap,
};

use super::super::episode::{format_play_head, format_updated_at_display, truncate};
use super::ViewState;
use crate::store::BOOKMARK_CAPACITY;

const ACCENT: Color = Color::Rgb(110, 170, 255);
const MUTED: Color = Color::Rgb(185, 195, 210);

pub(super) fn draw_tui(frame: &mut Frame, view: &mut ViewState) {
    let bg = Block::default().style(Style::default().bg(Color::Black));
    frame.render_widget(bg, frame.area());

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(8),
            Constraint::Length(3),
            Constraint::Length(3),
        ])
        .split(frame.area());

    let header = Paragraph::new(Line::from(vec![
        Span::styled(
            "REELTRACK",
            Style::default().fg(ACCENT).add_modifier(Modifier::BOLD),
        ),
        Span::raw("   "),
        Span::styled(format!("{} titles", view.rows.len()), Style::default().fg(MUTED)),
        Span::raw("   "),
        Span::styled(
            format!("{}/{BOOKMARK_CAPACITY} bookmarks", view.bookmark_count),
            Style::default().fg(MUTED),
        ),
        Span::raw("   "),
        Span::styled(
            format!("{} marked", view.marked.len()),
            Style::default().fg(Color::Yellow),
        ),
    ]))
    .alignment(Alignment::Center)
    .block(panel_block("Library"));
    frame.render_widget(header, chunks[0]);

    let rows: Vec<Row> = view
        .rows
        .iter()
        .map(|row| {
            let mark = if view.marked.contains(&row.id) { "[x]" } else { "[ ]" };
            Row::new(vec![
                Cell::from(mark),
                Cell::from(if row.bookmarked { "★" } else { "" }),
                Cell::from(truncate(&row.id, 48)),
                Cell::from(
                    row.play_head_in_sec
                        .map(format_play_head)
                        .unwrap_or_else(|| "-".to_string()),
                ),
                Cell::from(
                    row.updated_at
                        .as_ref()
                        .map(format_updated_at_display)
                        .unwrap_or_else(|| "-".to_string()),
                ),
            ])
        })
        .collect();

    let table = Table::new(
        rows,
        [
            Constraint::Length(4),
            Constraint::Length(2),
            Constraint::Percentage(50),
            Constraint::Length(10),
            Constraint::Length(26),
        ],
    )
    .header(
        Row::new(vec!["", "", "Title", "Resume", "Updated"])
            .style(Style::default().fg(ACCENT).add_modifier(Modifier::BOLD)),
    )
    .block(panel_block("Titles"))
    .row_highlight_style(
        Style::default()
            .bg(ACCENT)
            .fg(Color::Black)
            .add_modifier(Modifier::BOLD),
    )
    .highlight_symbol("▸ ");
    frame.render_stateful_widget(table, chunks[1], &mut view.table_state);

    let controls = Paragraph::new(Line::from(Span::styled(
        "↑/↓ move  b bookmark  space mark  d remove bookmarks  q quit",
        Style::default().fg(MUTED),
    )))
    .alignment(Alignment::Center)
    .block(panel_block("Controls"));
    frame.render_widget(controls, chunks[2]);

    let status = Paragraph::new(view.status.clone())
        .style(status_style(&view.status))
        .block(panel_block("Status"));
    frame.render_widget(status, chunks[3]);

    if let Some(pending) = view.pending_delete.as_ref() {
        let listed: Vec<String> = pending.ids.iter().take(5).map(|id| truncate(id, 48)).collect();
        let more = pending.ids.len().saturating_sub(listed.len());
        let mut popup_text = format!(
            "Remove {} bookmark(s)?\n\n{}",
            pending.ids.len(),
            listed.join("\n")
        );
        if more > 0 {
            popup_text.push_str(&format!("\n...and {more} more"));
        }
        popup_text.push_str("\n\n[y / Enter] Remove   [n / Esc] Cancel");

        let popup_area = popup_rect_for_text(frame.area(), &popup_text);
        frame.render_widget(Clear, popup_area);
        let popup = Paragraph::new(popup_text)
            .alignment(Alignment::Center)
            .wrap(Wrap { trim: true })
            .block(modal_block("Confirm Remove"));
        frame.render_widget(popup, popup_area);
    }
}

fn panel_block(title: &'static str) -> Block<'static> {
    Block::default()
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded)
        .border_style(Style::default().fg(Color::Rgb(125, 135, 150)))
        .title(title)
}

fn modal_block(title: &'static str) -> Block<'static> {
    panel_block(title)
        .border_style(
            Style::default()
                .fg(Color::Rgb(160, 190, 235))
                .add_modifier(Modifier::BOLD),
        )
        .padding(Padding::new(2, 2, 1, 1))
}

fn status_style(status: &str) -> Style {
    if status.starts_with("ERROR:") {
        Style::default()
            .fg(Color::Rgb(255, 145, 120))
            .add_modifier(Modifier::BOLD)
    } else {
        Style::default().fg(Color::Rgb(205, 165, 255))
    }
}

fn popup_rect_for_text(area: Rect, text: &str) -> Rect {
    let longest = text
        .lines()
        .map(|line| line.chars().count() as u16)
        .max()
        .unwrap_or(0);
    let line_count = text.lines().count() as u16;

    let available_width = area.width.saturating_sub(2).max(1);
    let width = longest
        .saturating_add(12)
        .clamp(48.min(available_width), 72.min(available_width));
    let available_height = area.height.saturating_sub(2).max(1);
    let height = line_count
        .saturating_add(6)
        .clamp(10.min(available_height), 20.min(available_height));

    let x = area.x + area.width.saturating_sub(width) / 2;
    let y = area.y + area.height.saturating_sub(height) / 2;
    Rect::new(x, y, width, height)
}
