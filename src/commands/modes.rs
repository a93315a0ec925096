use anyhow::Result;
use modeswitch_core::config::Settings;
use modeswitch_core::mode::MODES;
use owo_colors::OwoColorize;

use crate::render::Render;

pub fn run(settings: &Settings) -> Result<()> {
    for mode in MODES {
        let marker = if settings.is_enabled(mode.key) {
            "●".green().to_string()
        } else {
            "○".dimmed().to_string()
        };
        println!("{} {} {}", marker, mode.render(), mode.group.dimmed());
    }

    if settings.link_enabled {
        println!();
        println!("{}", "Bris events are mirrored into No Tachnun".dimmed());
    }

    Ok(())
}
