use serde::{Deserialize, Serialize};

use crate::error::{AmbraResult, Error};

/// RGBA color with 8-bit components
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Debug)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

fn parse_hex_component(hex: &str, original: &str) -> AmbraResult<u8> {
    u8::from_str_radix(hex, 16).map_err(|_| Error::InvalidHexColor {
        value: original.to_string(),
        reason: format!("invalid hex component '{}'", hex),
    })
}

impl Color {
    pub(crate) const WHITE: Color = Color {
        r: 255,
        g: 255,
        b: 255,
        a: 255,
    };
    pub(crate) const BLACK: Color = Color {
        r: 0,
        g: 0,
        b: 0,
        a: 255,
    };

    /// Outputs the hex value for that colour.
    #[inline]
    pub fn as_hex(&self) -> String {
        if self.a < 255 {
            format!("#{:02X}{:02X}{:02X}{:02X}", self.r, self.g, self.b, self.a)
        } else {
            format!("#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
        }
    }

    /// Creates a Color from a string (in theory a hex but it can also be black/white).
    ///
    /// Errors if the string is not a valid hex colour.
    pub fn from_hex(hex: &str) -> AmbraResult<Self> {
        let original = hex;
        let hex = hex.trim_start_matches('#');

        if hex == "white" {
            return Ok(Color::WHITE);
        } else if hex == "black" {
            return Ok(Color::BLACK);
        }
        // Parse based on length
        match hex.len() {
            // #RGB format (e.g., #F00 for red)
            3 => {
                let r = parse_hex_component(&hex[0..1], original)?;
                let g = parse_hex_component(&hex[1..2], original)?;
                let b = parse_hex_component(&hex[2..3], original)?;
                Ok(Color {
                    r: r * 17, // Convert 0xF to 0xFF
                    g: g * 17,
                    b: b * 17,
                    a: 255,
                })
            }
            // #RGBA format (e.g., #F00F for red with full opacity)
            4 => {
                let r = parse_hex_component(&hex[0..1], original)?;
                let g = parse_hex_component(&hex[1..2], original)?;
                let b = parse_hex_component(&hex[2..3], original)?;
                let a = parse_hex_component(&hex[3..4], original)?;
                Ok(Color {
                    r: r * 17,
                    g: g * 17,
                    b: b * 17,
                    a: a * 17,
                })
            }
            // #RRGGBB format (e.g., #FF0000 for red)
            6 => {
                let r = parse_hex_component(&hex[0..2], original)?;
                let g = parse_hex_component(&hex[2..4], original)?;
                let b = parse_hex_component(&hex[4..6], original)?;
                Ok(Color { r, g, b, a: 255 })
            }
            // #RRGGBBAA format (e.g., #FF0000FF for red with full opacity)
            8 => {
                let r = parse_hex_component(&hex[0..2], original)?;
                let g = parse_hex_component(&hex[2..4], original)?;
                let b = parse_hex_component(&hex[4..6], original)?;
                let a = parse_hex_component(&hex[6..8], original)?;
                Ok(Color { r, g, b, a })
            }
            _ => Err(Error::InvalidHexColor {
                value: original.to_string(),
                reason: format!("invalid length {}", hex.len()),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn can_parse_hex_colors() {
        let inputs = vec![
            (
                "#F00",
                Color {
                    r: 255,
                    g: 0,
                    b: 0,
                    a: 255,
                },
            ),
            (
                "#F00F",
                Color {
                    r: 255,
                    g: 0,
                    b: 0,
                    a: 255,
                },
            ),
            (
                "#FF00",
                Color {
                    r: 255,
                    g: 255,
                    b: 0,
                    a: 0,
                },
            ),
            (
                "#FF0000",
                Color {
                    r: 255,
                    g: 0,
                    b: 0,
                    a: 255,
                },
            ),
            (
                "#FF000080",
                Color {
                    r: 255,
                    g: 0,
                    b: 0,
                    a: 128,
                },
            ),
            ("white", Color::WHITE),
            ("black", Color::BLACK),
        ];

        for (input, expected) in inputs {
            assert_eq!(Color::from_hex(input).unwrap(), expected, "{input}");
        }
    }

    #[test]
    fn rejects_invalid_hex_colors() {
        for input in ["#F0", "#GG0000", "", "#FF00000"] {
            assert!(
                matches!(Color::from_hex(input), Err(Error::InvalidHexColor { .. })),
                "{input}"
            );
        }
    }

    #[test]
    fn hex_output_omits_opaque_alpha() {
        assert_eq!(Color::from_hex("#FF0000").unwrap().as_hex(), "#FF0000");
        assert_eq!(Color::from_hex("#FF000080").unwrap().as_hex(), "#FF000080");
    }
}
