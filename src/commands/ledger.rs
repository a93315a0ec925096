use anyhow::Result;
use modeswitch_core::config::Settings;
use owo_colors::OwoColorize;

use super::open_session;
use crate::render::Render;

pub fn run(settings: &Settings, json: bool) -> Result<()> {
    let session = open_session(settings)?;
    let engine = &session.engine;

    engine.sweep_ledger();
    let snapshot = engine.ledger_snapshot();

    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        return Ok(());
    }

    if snapshot.entries.is_empty() && snapshot.archived.is_empty() {
        println!("{}", "No events".dimmed());
        return Ok(());
    }

    for entry in &snapshot.entries {
        println!("{}", entry.render());
    }

    if !snapshot.archived.is_empty() {
        println!();
        println!("{}", "Archived:".bold());
        for archived in &snapshot.archived {
            println!("   {}", archived.render());
        }
    }

    Ok(())
}
