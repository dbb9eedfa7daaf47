use clap::builder::styling::{AnsiColor, Color, Style};
use clap::builder::Styles;
use crossterm::style::{Attribute, Stylize};
use unicode_width::UnicodeWidthStr;

pub fn get_styles() -> Styles {
    clap::builder::Styles::styled()
        .usage(
            Style::new()
                .bold()
                .underline()
                .fg_color(Some(Color::Ansi(AnsiColor::Cyan))),
        )
        .header(
            Style::new()
                .bold()
                .underline()
                .fg_color(Some(Color::Ansi(AnsiColor::Cyan))),
        )
        .literal(
            Style::new()
                .bold()
                .fg_color(Some(Color::Ansi(AnsiColor::Green))),
        )
        .invalid(
            Style::new()
                .bold()
                .fg_color(Some(Color::Ansi(AnsiColor::Red))),
        )
        .error(
            Style::new()
                .bold()
                .fg_color(Some(Color::Ansi(AnsiColor::Red))),
        )
        .valid(
            Style::new()
                .bold()
                .fg_color(Some(Color::Ansi(AnsiColor::Green))),
        )
        .placeholder(Style::new().fg_color(Some(Color::Ansi(AnsiColor::BrightBlack))))
}

pub mod colors {
    use crossterm::style::Color;

    pub const CYAN: Color = Color::Rgb {
        r: 0,
        g: 200,
        b: 220,
    };
    pub const GREEN: Color = Color::Rgb {
        r: 80,
        g: 220,
        b: 120,
    };
    pub const RED: Color = Color::Rgb {
        r: 240,
        g: 80,
        b: 80,
    };
    pub const ORANGE: Color = Color::Rgb {
        r: 255,
        g: 170,
        b: 60,
    };
    pub const DIM: Color = Color::Rgb {
        r: 130,
        g: 130,
        b: 140,
    };
    pub const WHITE: Color = Color::Rgb {
        r: 235,
        g: 235,
        b: 235,
    };
}

const HEADER_WIDTH: usize = 60;

pub fn print_success(message: &str) {
    println!(" {} {}", "✓".with(colors::GREEN).bold(), message.with(colors::GREEN));
}

pub fn print_error(message: &str) {
    println!(" {} {}", "✗".with(colors::RED).bold(), message.with(colors::RED));
}

pub fn print_warning(message: &str) {
    println!(" {} {}", "⚠".with(colors::ORANGE).bold(), message.with(colors::ORANGE));
}

pub fn print_section_header(title: &str) {
    let title_len = title.width();
    let padding = HEADER_WIDTH.saturating_sub(title_len + 2) / 2;
    println!();
    println!(
        "{} {} {}",
        "─".repeat(padding).with(colors::CYAN),
        title.with(colors::CYAN).bold().attribute(Attribute::Italic),
        "─"
            .repeat(HEADER_WIDTH.saturating_sub(title_len + 2 + padding))
            .with(colors::CYAN)
    );
}

pub fn print_key_value(key: &str, value: &str) {
    println!(
        "  {} {} {}",
        "•".with(colors::CYAN),
        format!("{}:", key).with(colors::DIM),
        value.with(colors::WHITE)
    );
}

pub fn print_empty_list(message: &str) {
    println!(
        "  {} {}",
        "○".with(colors::DIM),
        message.with(colors::DIM).attribute(Attribute::Italic)
    );
}

/// Pads `text` to `width` display columns.
pub fn pad(text: &str, width: usize) -> String {
    format!("{}{}", text, " ".repeat(width.saturating_sub(text.width())))
}

pub fn get_prompt() -> String {
    format!("{} ", "automation ❯".with(colors::CYAN).bold())
}

pub struct CommandHelp {
    pub name: &'static str,
    pub args: &'static str,
    pub description: &'static str,
}

pub fn print_help(commands: &[CommandHelp]) {
    print_section_header("Available Commands");
    let name_width = commands
        .iter()
        .map(|c| c.name.width() + c.args.width() + 1)
        .max()
        .unwrap_or(0);
    for cmd in commands {
        let usage = format!("{} {}", cmd.name, cmd.args);
        println!(
            "  {}  {}",
            pad(&usage, name_width).with(colors::GREEN).bold(),
            cmd.description.with(colors::WHITE)
        );
    }
    println!();
}
