//! Terminal rendering for modeswitch types.
//!
//! Extension traits that add colored output to modeswitch-core types using
//! owo_colors.

use modeswitch_core::clock::Timestamp;
use modeswitch_core::event::{CalendarEvent, EventSummary};
use modeswitch_core::ledger::{ArchiveReason, ArchivedEvent, EventPhase, LedgerEntry};
use modeswitch_core::mode::Mode;
use modeswitch_core::status::ModeStatus;
use modeswitch_core::switch::SwitchRecord;
use owo_colors::OwoColorize;

/// Extension trait for terminal rendering with colors.
pub trait Render {
    fn render(&self) -> String;
}

fn render_on_off(is_on: bool) -> String {
    if is_on {
        "ON".green().bold().to_string()
    } else {
        "off".dimmed().to_string()
    }
}

fn render_time(at: &Timestamp) -> String {
    at.format("%a %b %-d %H:%M").to_string()
}

fn render_window(start: &Timestamp, end: &Timestamp) -> String {
    if start.date_naive() == end.date_naive() {
        format!("{} - {}", render_time(start), end.format("%H:%M"))
    } else {
        format!("{} - {}", render_time(start), render_time(end))
    }
}

impl Render for SwitchRecord {
    fn render(&self) -> String {
        let mut line = format!(
            "{} {}",
            render_on_off(self.is_on),
            format!("({})", self.controlled_by).dimmed()
        );
        if let Some(expire_at) = &self.expire_at {
            line.push_str(&format!(" until {}", render_time(expire_at)).yellow().to_string());
        }
        line
    }
}

impl Render for EventSummary {
    fn render(&self) -> String {
        format!(
            "{} {}",
            self.summary,
            render_window(&self.start, &self.end).dimmed()
        )
    }
}

impl Render for CalendarEvent {
    fn render(&self) -> String {
        let summary = if self.is_linked() {
            format!("{} {}", self.summary, "(linked)".cyan())
        } else {
            self.summary.clone()
        };
        let mut line = format!(
            "{} {} {}",
            summary,
            render_window(&self.start, &self.end).dimmed(),
            self.uid.dimmed()
        );
        if let Some(description) = self.description() {
            line.push_str(&format!("\n      {}", description.italic()));
        }
        line
    }
}

impl Render for LedgerEntry {
    fn render(&self) -> String {
        let phase = match self.phase {
            EventPhase::Upcoming => "upcoming".blue().to_string(),
            EventPhase::Running => "running".green().to_string(),
            EventPhase::Ended => "ended".dimmed().to_string(),
        };
        format!(
            "{} {} {}",
            phase,
            self.event.mode_key.dimmed(),
            self.event.render()
        )
    }
}

impl Render for ArchivedEvent {
    fn render(&self) -> String {
        let reason = match self.reason {
            ArchiveReason::Deleted => "deleted".red().to_string(),
            ArchiveReason::Finished => "finished".dimmed().to_string(),
        };
        format!(
            "{} {} {}",
            reason,
            self.event.mode_key.dimmed(),
            self.event.summary
        )
    }
}

impl Render for Mode {
    fn render(&self) -> String {
        format!("{} {}", self.name, format!("[{}]", self.key).dimmed())
    }
}

impl Render for ModeStatus {
    fn render(&self) -> String {
        let mut lines = vec![format!(
            "{} {} {}",
            render_on_off(self.is_on),
            self.name.bold(),
            format!("({}, {})", self.controlled_by, self.group).dimmed()
        )];

        if let Some(expire_at) = &self.expire_at {
            lines.push(format!("   expires {}", render_time(expire_at)).yellow().to_string());
        }
        if self.override_on {
            lines.push(format!("   {}", "calendar override engaged".magenta()));
        }
        if let Some(active) = &self.active {
            lines.push(format!("   {} {}", "now:".green(), active.render()));
        }
        if let Some(next) = &self.next {
            lines.push(format!("   {} {}", "next:".blue(), next.render()));
        }
        if let Some(last_ended) = &self.last_ended {
            let line = format!("   last event ended {}", render_time(last_ended));
            lines.push(line.dimmed().to_string());
        }

        lines.join("\n")
    }
}
