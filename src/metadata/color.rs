//! Overlay color parsing
//!
//! One grammar shared by metadata validation and the layout engine: hex
//! (`#rgb`/`#rrggbb`), `rgb(r, g, b)`, or a small set of named colors.

use std::sync::OnceLock;

use regex::Regex;

/// RGB color in the 0..=255 range per channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

pub const BLACK: Color = Color { r: 0, g: 0, b: 0 };

fn color_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^(#[0-9a-fA-F]{3}|#[0-9a-fA-F]{6}|rgb\(\s*\d{1,3}\s*,\s*\d{1,3}\s*,\s*\d{1,3}\s*\)|[a-zA-Z]+)$",
        )
        .expect("color pattern is valid")
    })
}

/// Whether the string matches the accepted color grammar. Names must also be
/// in the known set.
pub fn is_valid(value: &str) -> bool {
    color_regex().is_match(value) && Color::parse(value).is_some()
}

impl Color {
    /// Parse a color string; `None` when outside the grammar.
    pub fn parse(value: &str) -> Option<Color> {
        let value = value.trim();
        if !color_regex().is_match(value) {
            return None;
        }

        if let Some(hex) = value.strip_prefix('#') {
            return match hex.len() {
                3 => {
                    let bytes: Vec<u8> = hex
                        .chars()
                        .map(|c| c.to_digit(16).map(|d| (d * 17) as u8))
                        .collect::<Option<_>>()?;
                    Some(Color {
                        r: bytes[0],
                        g: bytes[1],
                        b: bytes[2],
                    })
                }
                6 => {
                    let r = u8::from_str_radix(&hex[0..2], 16).ok()?;
                    let g = u8::from_str_radix(&hex[2..4], 16).ok()?;
                    let b = u8::from_str_radix(&hex[4..6], 16).ok()?;
                    Some(Color { r, g, b })
                }
                _ => None,
            };
        }

        if let Some(body) = value.strip_prefix("rgb(") {
            let body = body.strip_suffix(')')?;
            let channels: Vec<u8> = body
                .split(',')
                .map(|part| part.trim().parse::<u16>().ok().filter(|v| *v <= 255))
                .collect::<Option<Vec<u16>>>()?
                .into_iter()
                .map(|v| v as u8)
                .collect();
            if channels.len() != 3 {
                return None;
            }
            return Some(Color {
                r: channels[0],
                g: channels[1],
                b: channels[2],
            });
        }

        named(value)
    }

    /// Channels scaled to the 0..=1 range used by PDF color operators.
    pub fn to_unit(&self) -> (f64, f64, f64) {
        (
            self.r as f64 / 255.0,
            self.g as f64 / 255.0,
            self.b as f64 / 255.0,
        )
    }
}

fn named(name: &str) -> Option<Color> {
    let c = |r, g, b| Some(Color { r, g, b });
    match name.to_ascii_lowercase().as_str() {
        "black" => c(0, 0, 0),
        "white" => c(255, 255, 255),
        "red" => c(255, 0, 0),
        "green" => c(0, 128, 0),
        "blue" => c(0, 0, 255),
        "yellow" => c(255, 255, 0),
        "cyan" => c(0, 255, 255),
        "magenta" => c(255, 0, 255),
        "gray" | "grey" => c(128, 128, 128),
        "orange" => c(255, 165, 0),
        "purple" => c(128, 0, 128),
        _ => None,
    }
}
