use anyhow::Result;
use modeswitch_core::config::Settings;
use modeswitch_core::mode::mode_friendly;
use owo_colors::OwoColorize;

use super::open_session;
use crate::render::Render;

pub fn turn_on(settings: &Settings, mode: &str, minutes: Option<u32>) -> Result<()> {
    let mut session = open_session(settings)?;
    let record = session.engine.turn_on(mode, minutes)?;

    println!("{} {}", mode_friendly(mode).bold(), record.render());
    Ok(())
}

pub fn turn_off(settings: &Settings, mode: &str) -> Result<()> {
    let mut session = open_session(settings)?;
    let record = session.engine.turn_off(mode)?;

    println!("{} {}", mode_friendly(mode).bold(), record.render());
    Ok(())
}

pub fn set_override(settings: &Settings, mode: &str, on: bool) -> Result<()> {
    let mut session = open_session(settings)?;
    session.engine.set_override(mode, on)?;

    let state = if on {
        "engaged".magenta().to_string()
    } else {
        "released".dimmed().to_string()
    };
    println!("{} calendar override {}", mode_friendly(mode).bold(), state);
    Ok(())
}
