use anyhow::Result;
use modeswitch_core::config::Settings;
use modeswitch_core::status::{ModeStatus, event_modes_on, modes_running_with_override};
use owo_colors::OwoColorize;

use super::open_session;
use crate::render::Render;

pub fn run(settings: &Settings, mode: Option<&str>, json: bool) -> Result<()> {
    let session = open_session(settings)?;
    let engine = &session.engine;

    let statuses: Vec<ModeStatus> = match mode {
        Some(key) => vec![engine.status(key)?],
        None => engine.statuses(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&statuses)?);
        return Ok(());
    }

    for (i, status) in statuses.iter().enumerate() {
        println!("{}", status.render());

        if i < statuses.len() - 1 {
            println!();
        }
    }

    if mode.is_none() {
        let names = |list: Vec<&ModeStatus>| {
            list.iter()
                .map(|s| s.name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        };

        let event_on = event_modes_on(&statuses);
        if !event_on.is_empty() {
            println!();
            println!("{} {}", "Event modes on:".bold(), names(event_on));
        }

        let overridden = modes_running_with_override(&statuses);
        if !overridden.is_empty() {
            println!("{} {}", "On with override:".bold(), names(overridden));
        }
    }

    Ok(())
}
