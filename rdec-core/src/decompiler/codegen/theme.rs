//! Colour themes for ANSI and HTML output.

/// 24-bit colour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb(pub u8, pub u8, pub u8);

impl Rgb {
    /// `#rrggbb` form used in HTML spans.
    pub fn hex(self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.0, self.1, self.2)
    }

    /// ANSI truecolor foreground escape.
    pub fn ansi(self) -> String {
        format!("\x1b[38;2;{};{};{}m", self.0, self.1, self.2)
    }
}

/// Syntactic class of an output token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Token {
    Keyword,
    Number,
    Str,
    Symbol,
    Type,
    Label,
    Comment,
    /// Assembly column.
    Asm,
}

/// Token colours of one theme.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Theme {
    pub name: &'static str,
    keyword: Rgb,
    number: Rgb,
    string: Rgb,
    symbol: Rgb,
    types: Rgb,
    label: Rgb,
    comment: Rgb,
    asm: Rgb,
}

impl Theme {
    /// Names accepted by [`Theme::by_name`].
    pub const NAMES: [&'static str; 3] = ["default", "dark", "light"];

    /// Look a theme up by name. Unknown names fall back to `default`.
    pub fn by_name(name: &str) -> Theme {
        match name.trim().to_ascii_lowercase().as_str() {
            "default" => Self::default_theme(),
            "dark" => Self::dark(),
            "light" => Self::light(),
            other => {
                log::warn!("unknown theme `{other}`, using `default`");
                Self::default_theme()
            }
        }
    }

    pub fn color(&self, token: Token) -> Rgb {
        match token {
            Token::Keyword => self.keyword,
            Token::Number => self.number,
            Token::Str => self.string,
            Token::Symbol => self.symbol,
            Token::Type => self.types,
            Token::Label => self.label,
            Token::Comment => self.comment,
            Token::Asm => self.asm,
        }
    }

    fn default_theme() -> Theme {
        Theme {
            name: "default",
            keyword: Rgb(0xc6, 0x78, 0xdd),
            number: Rgb(0xd1, 0x9a, 0x66),
            string: Rgb(0x98, 0xc3, 0x79),
            symbol: Rgb(0x61, 0xaf, 0xef),
            types: Rgb(0xe5, 0xc0, 0x7b),
            label: Rgb(0xe0, 0x6c, 0x75),
            comment: Rgb(0x7f, 0x84, 0x8e),
            asm: Rgb(0x56, 0xb6, 0xc2),
        }
    }

    fn dark() -> Theme {
        Theme {
            name: "dark",
            keyword: Rgb(0xff, 0x79, 0xc6),
            number: Rgb(0xbd, 0x93, 0xf9),
            string: Rgb(0xf1, 0xfa, 0x8c),
            symbol: Rgb(0x50, 0xfa, 0x7b),
            types: Rgb(0x8b, 0xe9, 0xfd),
            label: Rgb(0xff, 0xb8, 0x6c),
            comment: Rgb(0x62, 0x72, 0xa4),
            asm: Rgb(0x8b, 0xe9, 0xfd),
        }
    }

    fn light() -> Theme {
        Theme {
            name: "light",
            keyword: Rgb(0x00, 0x00, 0xff),
            number: Rgb(0x09, 0x86, 0x58),
            string: Rgb(0xa3, 0x15, 0x15),
            symbol: Rgb(0x79, 0x5e, 0x26),
            types: Rgb(0x26, 0x7f, 0x99),
            label: Rgb(0xaf, 0x00, 0xdb),
            comment: Rgb(0x00, 0x80, 0x00),
            asm: Rgb(0x80, 0x80, 0x80),
        }
    }
}

impl Default for Theme {
    fn default() -> Self {
        Self::default_theme()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_theme_falls_back() {
        assert_eq!(Theme::by_name("solarized"), Theme::default());
        assert_eq!(Theme::by_name("DARK").name, "dark");
    }

    #[test]
    fn colour_encodings() {
        let c = Rgb(0x12, 0xab, 0x00);
        assert_eq!(c.hex(), "#12ab00");
        assert_eq!(c.ansi(), "\x1b[38;2;18;171;0m");
    }
}
