//! Plain-text rendering of the session, results and song detail views.

use crate::{library::Song, session::Status, MatchResult};

const BAR_GLYPHS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

/// One-line status banner.
pub fn status_line(status: Status) -> String {
    format!("[{}] {}", status.as_str(), status.message())
}

/// Renders bar heights in `[0, 1]` as block glyphs.
pub fn bars(amplitudes: &[f32]) -> String {
    amplitudes
        .iter()
        .map(|height| {
            let level = (height.clamp(0.0, 1.0) * (BAR_GLYPHS.len() - 1) as f32).round();
            BAR_GLYPHS[level as usize]
        })
        .collect()
}

/// Ranked result lines; the playing entry is marked with `▶`.
pub fn result_lines(matches: &[MatchResult], playing: Option<&str>) -> Vec<String> {
    matches
        .iter()
        .enumerate()
        .map(|(index, entry)| {
            let marker = if playing == Some(entry.id.as_str()) {
                "▶"
            } else {
                " "
            };
            format!(
                "{marker} {}. {} - {}  {}",
                index + 1,
                entry.display_title(),
                entry.display_artist(),
                entry.percentage_label()
            )
        })
        .collect()
}

/// Detail card for a library song.
pub fn song_card(song: &Song) -> String {
    let mut card = format!(
        "{}\n{} · {} · {}\nReleased {}\n",
        song.title, song.artist, song.album, song.duration, song.release_date
    );
    if !song.lyrics.is_empty() {
        card.push_str("\nLyrics\n");
        card.push_str(&song.lyrics);
        card.push('\n');
    }
    if !song.credits.is_empty() {
        card.push_str("\nCredits\n");
        card.push_str(&song.credits);
        card.push('\n');
    }
    if !song.bio.is_empty() {
        card.push_str("\nAbout the artist\n");
        card.push_str(&song.bio);
        card.push('\n');
    }
    if let Some(dates) = song.touring.as_ref().filter(|dates| !dates.is_empty()) {
        card.push_str("\nOn tour\n");
        for date in dates {
            card.push_str(&format!("  {}  {}, {}\n", date.date, date.venue, date.city));
        }
    }
    if let Some(links) = song.social.as_ref().filter(|links| !links.is_empty()) {
        let mut links: Vec<_> = links.iter().collect();
        links.sort();
        card.push_str("\nLinks\n");
        for (name, url) in links {
            card.push_str(&format!("  {name}: {url}\n"));
        }
    }
    card
}

/// Progress bar line for the song detail player.
pub fn progress_line(progress: f64, elapsed: &str, remaining: &str, width: usize) -> String {
    let filled = ((progress.clamp(0.0, 1.0) * width as f64).round() as usize).min(width);
    format!(
        "{elapsed} [{}{}] {remaining}",
        "=".repeat(filled),
        " ".repeat(width - filled)
    )
}
