//! Minimal IRC line parsing and formatting.

/// Bytes reserved for `:nick!user@host PRIVMSG #room :` when the server
/// relays our line to other clients.
const PRIVMSG_OVERHEAD: usize = 100;

/// Maximum IRC line length including `\r\n`.
const MAX_LINE: usize = 512;

/// One parsed protocol line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IrcMessage {
    pub prefix: Option<String>,
    pub command: String,
    pub params: Vec<String>,
}

impl IrcMessage {
    /// Parse a single line without its terminator. IRCv3 tags are dropped.
    pub fn parse(line: &str) -> Option<Self> {
        let mut rest = line.trim_end_matches(['\r', '\n']);

        if rest.starts_with('@') {
            rest = rest.split_once(' ')?.1.trim_start();
        }

        let prefix = match rest.strip_prefix(':') {
            Some(tail) => {
                let (prefix, tail) = tail.split_once(' ')?;
                rest = tail.trim_start();
                Some(prefix.to_string())
            },
            None => None,
        };

        let (command, mut rest) = match rest.split_once(' ') {
            Some((command, tail)) => (command, tail),
            None => (rest, ""),
        };
        if command.is_empty() {
            return None;
        }

        let mut params = Vec::new();
        loop {
            rest = rest.trim_start_matches(' ');
            if rest.is_empty() {
                break;
            }
            if let Some(trailing) = rest.strip_prefix(':') {
                params.push(trailing.to_string());
                break;
            }
            match rest.split_once(' ') {
                Some((param, tail)) => {
                    params.push(param.to_string());
                    rest = tail;
                },
                None => {
                    params.push(rest.to_string());
                    break;
                },
            }
        }

        Some(Self {
            prefix,
            command: command.to_ascii_uppercase(),
            params,
        })
    }

    /// Nick part of a `nick!user@host` prefix.
    pub fn nick(&self) -> Option<&str> {
        let prefix = self.prefix.as_deref()?;
        let nick = prefix.split(['!', '@']).next().unwrap_or(prefix);
        (!nick.is_empty()).then_some(nick)
    }

    pub fn param(&self, index: usize) -> Option<&str> {
        self.params.get(index).map(String::as_str)
    }

    /// Last parameter, which carries the text for `PRIVMSG`, `ERROR` and numerics.
    pub fn trailing(&self) -> Option<&str> {
        self.params.last().map(String::as_str)
    }
}

/// Body of a `PRIVMSG`, with CTCP `ACTION` rendered as `* nick text`.
/// Other CTCP requests yield `None`.
pub fn privmsg_text(nick: &str, text: &str) -> Option<String> {
    match text.strip_prefix('\u{1}') {
        Some(ctcp) => {
            let ctcp = ctcp.trim_end_matches('\u{1}');
            ctcp.strip_prefix("ACTION ")
                .map(|action| format!("* {nick} {action}"))
        },
        None => Some(text.to_string()),
    }
}

/// Build the `PRIVMSG` lines needed to deliver `text` to `room`.
///
/// Newlines split the text into separate messages, empty lines are skipped
/// and long lines are chunked on character boundaries.
pub fn privmsg_lines(room: &str, text: &str) -> Vec<String> {
    let budget = MAX_LINE.saturating_sub(PRIVMSG_OVERHEAD + room.len()).max(1);
    text.lines()
        .map(|line| line.trim_end_matches('\r'))
        .filter(|line| !line.trim().is_empty())
        .flat_map(|line| chunk(line, budget))
        .map(|chunk| format!("PRIVMSG {room} :{chunk}"))
        .collect()
}

fn chunk(line: &str, max_bytes: usize) -> Vec<&str> {
    let mut out = Vec::new();
    let mut rest = line;
    while rest.len() > max_bytes {
        let mut cut = max_bytes;
        while !rest.is_char_boundary(cut) {
            cut -= 1;
        }
        if cut == 0 {
            cut = rest.chars().next().map_or(rest.len(), char::len_utf8);
        }
        let (head, tail) = rest.split_at(cut);
        out.push(head);
        rest = tail;
    }
    out.push(rest);
    out
}
