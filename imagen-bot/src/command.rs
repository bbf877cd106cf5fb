//! Command routing and argument parsing.
//!
//! Turns message text into a [`Command`] and the `imagen` arguments into a
//! structured [`ImageRequest`].

use crate::session::SessionError;

/// Bot commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Generate or edit an image; holds the text after the command word
    Imagen(String),
    /// Cancel the caller's session that is waiting for uploads
    Cancel,
    /// Show usage, quoting the prefix character the user typed
    Help(char),
    Start,
    Unknown(String),
}

impl Command {
    /// Route message text.
    ///
    /// Text starting with `/` or `!` is a command; a `@botname` suffix on
    /// the command word is ignored. Any other text is `None`.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim_start();
        let prefix = text.chars().next().filter(|c| *c == '/' || *c == '!')?;

        let rest = &text[prefix.len_utf8()..];
        let (word, args) = match rest.find(char::is_whitespace) {
            Some(idx) => (&rest[..idx], rest[idx..].trim_start()),
            None => (rest, ""),
        };
        let name = word.split('@').next().unwrap_or_default();

        Some(match name {
            "imagen" => Self::Imagen(args.to_string()),
            "imagencancel" => Self::Cancel,
            "imagenhelp" => Self::Help(prefix),
            "start" => Self::Start,
            other => Self::Unknown(other.to_string()),
        })
    }
}

/// Whether a request creates new images or edits uploaded ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Generate,
    Edit,
}

/// Flags that take a value. Only flags the user set are forwarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flag {
    Count,
    Size,
    Background,
    Quality,
}

impl Flag {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "n" => Some(Self::Count),
            "size" => Some(Self::Size),
            "background" => Some(Self::Background),
            "quality" => Some(Self::Quality),
            _ => None,
        }
    }

    pub const fn name(&self) -> &'static str {
        match self {
            Self::Count => "n",
            Self::Size => "size",
            Self::Background => "background",
            Self::Quality => "quality",
        }
    }
}

/// Structured image request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRequest {
    pub prompt: String,
    pub count: u32,
    pub size: String,
    pub quality: String,
    pub background: String,
    pub mode: Mode,
    /// Flags given explicitly, in the order they appeared
    pub explicit: Vec<Flag>,
}

impl Default for ImageRequest {
    fn default() -> Self {
        Self {
            prompt: String::new(),
            count: 1,
            size: "1024x1024".into(),
            quality: "auto".into(),
            background: "opaque".into(),
            mode: Mode::Generate,
            explicit: Vec::new(),
        }
    }
}

impl ImageRequest {
    /// Parse `imagen` arguments: `-edit`, `-n <int>`, `-size <s>`,
    /// `-background <s>`, `-quality <s>`; every other word is prompt text.
    /// Unknown flags are ignored.
    pub fn parse(args: &str) -> Result<Self, SessionError> {
        let mut request = Self::default();
        let mut prompt = Vec::new();
        let mut words = args.split_whitespace().peekable();

        while let Some(word) = words.next() {
            let Some(name) = word.strip_prefix('-') else {
                prompt.push(word);
                continue;
            };

            if name == "edit" {
                request.mode = Mode::Edit;
                continue;
            }
            let Some(flag) = Flag::from_name(name) else {
                continue;
            };

            let Some(value) = words.next_if(|v| !v.starts_with('-')) else {
                return Err(SessionError::MissingValue(flag.name().to_string()));
            };

            match flag {
                Flag::Count => {
                    request.count = value.parse().map_err(|_| {
                        SessionError::MalformedArguments(format!("Invalid value for n: {value}"))
                    })?;
                }
                Flag::Size => request.size = value.to_string(),
                Flag::Background => request.background = value.to_string(),
                Flag::Quality => request.quality = value.to_string(),
            }
            if !request.explicit.contains(&flag) {
                request.explicit.push(flag);
            }
        }

        request.prompt = prompt.join(" ");
        if request.prompt.is_empty() {
            return Err(SessionError::MalformedArguments("No prompt provided".into()));
        }
        Ok(request)
    }

    /// Edits need uploaded images before the service can be called.
    pub const fn needs_uploads(&self) -> bool {
        matches!(self.mode, Mode::Edit)
    }
}

/// Usage text for the help command.
pub fn help_text(prefix: char) -> String {
    format!(
        "🤖 Imagen Telegram Bot\n\n\
         Available commands:\n\n\
         {prefix}imagen (args) [prompt]\n  \
         args can be:\n    \
         -edit: toggles edit mode\n    \
         -n 1: generate n output images\n    \
         -size 1024x1024\n    \
         -background transparent (default is opaque)\n    \
         -quality auto\n\
         {prefix}imagencancel - cancel waiting for image uploads\n\
         {prefix}imagenhelp - show this help"
    )
}

pub const WELCOME_TEXT: &str = "🤖 Welcome! This is the Imagen Telegram Bot";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routes_commands() {
        assert_eq!(
            Command::parse("/imagen a cat"),
            Some(Command::Imagen("a cat".into()))
        );
        assert_eq!(
            Command::parse("!imagen@ImagenBot  -edit hat"),
            Some(Command::Imagen("-edit hat".into()))
        );
        assert_eq!(Command::parse("/imagen"), Some(Command::Imagen(String::new())));
        assert_eq!(Command::parse("/imagencancel"), Some(Command::Cancel));
        assert_eq!(Command::parse("!imagenhelp"), Some(Command::Help('!')));
        assert_eq!(Command::parse("/start"), Some(Command::Start));
        assert_eq!(
            Command::parse("/weather"),
            Some(Command::Unknown("weather".into()))
        );
        assert_eq!(Command::parse("just text"), None);
        assert_eq!(Command::parse(""), None);
    }

    #[test]
    fn parses_defaults() {
        let req = ImageRequest::parse("a red fox").unwrap();
        assert_eq!(req.prompt, "a red fox");
        assert_eq!(req.count, 1);
        assert_eq!(req.size, "1024x1024");
        assert_eq!(req.background, "opaque");
        assert_eq!(req.quality, "auto");
        assert_eq!(req.mode, Mode::Generate);
        assert!(req.explicit.is_empty());
        assert!(!req.needs_uploads());
    }

    #[test]
    fn parses_flags_anywhere() {
        let req = ImageRequest::parse("a fox -n 2 in snow -edit -size 1536x1024 -quality high")
            .unwrap();
        assert_eq!(req.prompt, "a fox in snow");
        assert_eq!(req.count, 2);
        assert_eq!(req.size, "1536x1024");
        assert_eq!(req.quality, "high");
        assert_eq!(req.mode, Mode::Edit);
        assert_eq!(req.explicit, vec![Flag::Count, Flag::Size, Flag::Quality]);
        assert!(req.needs_uploads());
        assert!(!req.explicit.contains(&Flag::Background));
    }

    #[test]
    fn missing_value() {
        let err = ImageRequest::parse("fox -size").unwrap_err();
        assert_eq!(err.kind(), "missing-required-value");
        assert_eq!(err.to_string(), "Missing value for flag: size");

        let err = ImageRequest::parse("fox -n -edit").unwrap_err();
        assert_eq!(err.to_string(), "Missing value for flag: n");
    }

    #[test]
    fn invalid_count() {
        let err = ImageRequest::parse("fox -n many").unwrap_err();
        assert_eq!(err.kind(), "malformed-arguments");
        assert_eq!(err.to_string(), "Invalid value for n: many");
    }

    #[test]
    fn empty_prompt() {
        let err = ImageRequest::parse("-edit -n 2").unwrap_err();
        assert_eq!(err.to_string(), "No prompt provided");
    }

    #[test]
    fn help_mentions_prefix() {
        let text = help_text('!');
        assert!(text.contains("!imagen (args) [prompt]"));
        assert!(text.contains("!imagenhelp"));
    }
}
