use anyhow::{Context, Result};
use modeswitch_core::config::Settings;
use modeswitch_core::event::{EventPatch, NewEvent, parse_endpoint};
use modeswitch_core::window::TimeWindow;
use owo_colors::OwoColorize;

use super::open_session;
use crate::render::Render;

/// Fields given to `event update`. `None` leaves the field alone.
pub struct EventEdits {
    pub title: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
    pub description: Option<String>,
}

pub fn add(
    settings: &Settings,
    mode: &str,
    title: &str,
    start: &str,
    end: Option<&str>,
    description: Option<&str>,
) -> Result<()> {
    let tz = settings.time_zone;
    let start_at = parse_endpoint(start, tz, false)?;
    // Without an end, a bare start date covers that whole day
    let end_at = parse_endpoint(end.unwrap_or(start), tz, true)?;

    let mut draft = NewEvent::new(start_at, end_at, title);
    if let Some(description) = description.filter(|d| !d.is_empty()) {
        draft = draft.with_description(description);
    }

    let mut session = open_session(settings)?;
    let event = session
        .engine
        .create_event(mode, draft)
        .with_context(|| format!("Could not add event to '{}'", mode))?;

    println!("{} {}", "+".green(), event.render());
    Ok(())
}

pub fn list(settings: &Settings, mode: &str, from: Option<&str>, to: Option<&str>) -> Result<()> {
    let session = open_session(settings)?;
    let engine = &session.engine;

    let window = TimeWindow::from_args(from, to, engine.now(), settings.time_zone)?;
    let events = engine.events(mode, Some(window))?;

    if events.is_empty() {
        println!("{}", "   No events".dimmed());
        return Ok(());
    }

    let mut events = events;
    events.sort_by(|a, b| a.start.cmp(&b.start));
    for event in &events {
        println!("   {}", event.render());
    }
    Ok(())
}

pub fn update(settings: &Settings, mode: &str, uid: &str, edits: EventEdits) -> Result<()> {
    let tz = settings.time_zone;

    let mut patch = EventPatch {
        start: edits
            .start
            .as_deref()
            .map(|s| parse_endpoint(s, tz, false))
            .transpose()?,
        end: edits
            .end
            .as_deref()
            .map(|s| parse_endpoint(s, tz, true))
            .transpose()?,
        summary: edits.title,
        ..Default::default()
    };
    if let Some(description) = edits.description.as_deref() {
        patch.set_description((!description.is_empty()).then_some(description));
    }

    if patch.is_empty() {
        anyhow::bail!("Nothing to update. Pass --title, --start, --end or --description.");
    }

    let mut session = open_session(settings)?;
    let event = session
        .engine
        .update_event(mode, uid, &patch)
        .with_context(|| format!("Could not update event {}", uid))?;

    println!("{} {}", "~".yellow(), event.render());
    Ok(())
}

pub fn delete(settings: &Settings, mode: &str, uid: &str) -> Result<()> {
    let mut session = open_session(settings)?;
    let removed = session
        .engine
        .delete_event(mode, uid)
        .with_context(|| format!("Could not delete event {}", uid))?;

    println!("{} {}", "-".red(), removed.render());
    Ok(())
}
