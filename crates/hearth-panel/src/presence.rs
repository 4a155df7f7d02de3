use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;

use crate::logs::strip_ansi;

/// Players inferred as currently connected, derived from log text only.
#[derive(Debug, Clone, PartialEq, Eq, Default, serde::Serialize)]
pub struct Presence {
    pub count: usize,
    /// Lowercase identifiers, sorted for stable display.
    pub players: Vec<String>,
}

// Join/leave pattern families, in match order: vanilla, Bukkit/Spigot/
// Paper, Bedrock, and the bare "Player connected/disconnected" form some
// custom wrappers emit. Bedrock must precede the bare form because its
// lines also start with "Player connected:".
fn join_patterns() -> &'static [Regex] {
    static RES: OnceLock<Vec<Regex>> = OnceLock::new();
    RES.get_or_init(|| {
        [
            r"(\w+) joined the game",
            r"(\w+)\[/[^\]]*\] logged in",
            r"Player connected:\s*([^,]+), xuid:",
            r"Player connected:\s*(\S+)",
        ]
        .iter()
        .map(|p| Regex::new(p).expect("static regex"))
        .collect()
    })
}

fn leave_patterns() -> &'static [Regex] {
    static RES: OnceLock<Vec<Regex>> = OnceLock::new();
    RES.get_or_init(|| {
        [
            r"(\w+) left the game",
            r"(\w+) lost connection",
            r"Player disconnected:\s*([^,]+), xuid:",
            r"Player disconnected:\s*(\S+)",
        ]
        .iter()
        .map(|p| Regex::new(p).expect("static regex"))
        .collect()
    })
}

fn first_capture<'a>(patterns: &[Regex], line: &'a str) -> Option<String> {
    for re in patterns {
        if let Some(caps) = re.captures(line)
            && let Some(name) = caps.get(1)
        {
            return Some(name.as_str().trim().to_lowercase());
        }
    }
    None
}

/// Recomputes the online set from the full buffer.
///
/// Deliberately stateless: the buffer is bounded by the active polling
/// window, so replaying it on every update is cheap and survives buffer
/// truncation and out-of-order delivery. A leave for a name that never
/// joined is a no-op, so the count cannot go negative.
pub fn track<I, S>(lines: I) -> Presence
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut online: HashSet<String> = HashSet::new();

    for line in lines {
        let clean = strip_ansi(line.as_ref());
        if let Some(name) = first_capture(join_patterns(), &clean) {
            online.insert(name);
        } else if let Some(name) = first_capture(leave_patterns(), &clean) {
            online.remove(&name);
        }
    }

    let mut players: Vec<String> = online.into_iter().collect();
    players.sort();
    Presence {
        count: players.len(),
        players,
    }
}

/// Delta-aware wrapper: reports a recomputed set only when it differs
/// from the last one handed out, so consumers skip redundant updates.
#[derive(Debug, Default)]
pub struct PresenceFeed {
    last: Presence,
}

impl PresenceFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> &Presence {
        &self.last
    }

    pub fn update<I, S>(&mut self, lines: I) -> Option<Presence>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let next = track(lines);
        if next == self.last {
            return None;
        }
        self.last = next.clone();
        Some(next)
    }
}
