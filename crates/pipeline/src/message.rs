//! Notification texts sent back to job owners.

use std::time::Duration;
use chrono::Local;
use humansize::{format_size, BINARY};

use crate::job::Job;
use crate::progress::ProgressUpdate;

const BAR_LENGTH: usize = 10;
const MAX_ERROR_CHARS: usize = 150;

/// Render a bar like `[▓▓▓▒░░░░░░] 37.5%`
pub fn progress_bar(percentage: f64, length: usize) -> String {
    let percentage = if percentage.is_finite() { percentage.clamp(0.0, 100.0) } else { 0.0 };
    let filled = (length as f64 * percentage / 100.0) as usize;

    let bar: String = (0..length)
        .map(|i| {
            if i >= filled {
                '░'
            } else if i == filled - 1 && percentage < 100.0 {
                '▒'
            } else {
                '▓'
            }
        })
        .collect();

    format!("[{}] {:.1}%", bar, percentage)
}

pub fn format_file_size(bytes: u64) -> String {
    format_size(bytes, BINARY)
}

pub fn format_speed(bytes_per_sec: f64) -> String {
    let bytes = if bytes_per_sec.is_finite() && bytes_per_sec > 0.0 { bytes_per_sec as u64 } else { 0 };
    format!("{}/s", format_file_size(bytes))
}

/// `MM:SS` below an hour, `HH:MM:SS` above
pub fn format_clock(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs == 0 {
        return "00:00:00".to_string();
    }
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;
    if hours > 0 {
        format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{:02}:{:02}", minutes, seconds)
    }
}

fn header(job: &Job) -> [String; 2] {
    [
        format!("🎬 *{}*", job.title),
        format!("📺 Episode {} [{}]", job.sequence, job.quality),
    ]
}

pub fn progress_message(job: &Job, update: &ProgressUpdate) -> String {
    let [title, episode] = header(job);
    let mut lines = vec![title, episode, String::new(), "**Upload Progress:**".to_string()];

    if update.total == 0 {
        lines.push(progress_bar(0.0, BAR_LENGTH));
        lines.push(format!("📦 `{}`", format_file_size(update.current)));
    } else {
        lines.push(progress_bar(update.percentage, BAR_LENGTH));
        lines.push(format!(
            "📦 `{} / {}`",
            format_file_size(update.current),
            format_file_size(update.total)
        ));
    }

    if update.speed > 0.0 {
        lines.push(format!("⚡ {}", format_speed(update.speed)));
    }

    if let Some(eta) = update.eta.filter(|eta| !eta.is_zero()) {
        let done_at = chrono::Duration::from_std(eta)
            .ok()
            .and_then(|d| Local::now().checked_add_signed(d));
        match done_at {
            Some(at) => lines.push(format!("⏳ ETA: {} ({})", format_clock(eta), at.format("%H:%M:%S"))),
            None => lines.push(format!("⏳ ETA: {}", format_clock(eta))),
        }
    }

    if update.total > 0 {
        lines.push(format!("`{:.1}% complete`", update.percentage));
    }

    lines.join("\n")
}

pub fn completion_message(job: &Job, bytes: u64, elapsed: Duration) -> String {
    let secs = elapsed.as_secs_f64();
    let average = if secs > 0.0 { bytes as f64 / secs } else { 0.0 };
    let [title, episode] = header(job);

    [
        "✅ *Upload Complete!*".to_string(),
        title,
        episode,
        format!("📊 {}", format_file_size(bytes)),
        format!("⚡ Average: {}", format_speed(average)),
        format!("⏱️ Duration: {}", format_clock(elapsed)),
        format!("📅 {}", Local::now().format("%Y-%m-%d %H:%M")),
    ]
    .join("\n")
}

pub fn failure_message(job: &Job, error: &str) -> String {
    let truncated: String = error.chars().take(MAX_ERROR_CHARS).collect();
    let [title, episode] = header(job);

    [
        "❌ *Upload Failed*".to_string(),
        title,
        episode,
        String::new(),
        "**Error:**".to_string(),
        format!("`{}`", truncated),
    ]
    .join("\n")
}

pub fn cancelled_message(job: &Job) -> String {
    format!("🛑 Cancelled {} [{}]", job.label(), job.quality)
}

/// Position is 1-based
pub fn queue_message(position: usize, queued: usize, estimated_wait: Option<Duration>) -> String {
    let mut lines = vec![
        "📋 *Queue Status*".to_string(),
        format!("Position: `{}` of `{}`", position, queued),
    ];
    if let Some(wait) = estimated_wait.filter(|w| !w.is_zero()) {
        lines.push(format!("Estimated wait: `{}`", format_clock(wait)));
    }
    lines.push(String::new());
    lines.push("Your download will start soon...".to_string());
    lines.join("\n")
}
