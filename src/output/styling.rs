use console::{style, StyledObject};
use std::fmt::Display;

/// Work in progress
pub fn pending(text: impl Display) -> StyledObject<String> {
    style(text.to_string()).bright().yellow()
}

pub fn passed(text: impl Display) -> StyledObject<String> {
    style(text.to_string()).bright().green()
}

pub fn failed(text: impl Display) -> StyledObject<String> {
    style(text.to_string()).bright().red()
}

/// Improvement tags and other labels
pub fn highlight(text: impl Display) -> StyledObject<String> {
    style(text.to_string()).cyan()
}

pub fn muted(text: impl Display) -> StyledObject<String> {
    style(text.to_string()).dim()
}

pub fn heading(text: impl Display) -> StyledObject<String> {
    style(text.to_string()).bright()
}

pub fn banner(text: impl Display) -> StyledObject<String> {
    style(text.to_string()).magenta().bold()
}
