//! Channel `MODE` string parsing.
//!
//! Turns a mode string such as `+ov-b` plus its flat argument list into an
//! ordered list of [`ModeChange`] records. Parsing never fails: unknown mode
//! letters are still emitted and left for the caller to ignore.

use std::fmt;

/// Mode letters that consume an argument.
///
/// This is a fixed table rather than one derived from the server's
/// `CHANMODES` advertisement, so a few modes (notably `i`) are treated as
/// argument-taking even on networks where they are not.
pub const ARG_MODES: &[char] = &['o', 'v', 'h', 'q', 'a', 'b', 'e', 'i'];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeAction {
    Add,
    Remove,
}

impl ModeAction {
    pub fn sign(self) -> char {
        match self {
            ModeAction::Add => '+',
            ModeAction::Remove => '-',
        }
    }
}

/// A single parsed mode change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModeChange {
    pub mode: char,
    pub action: ModeAction,
    pub arg: Option<String>,
}

impl ModeChange {
    pub fn is_add(&self) -> bool {
        self.action == ModeAction::Add
    }
}

impl fmt::Display for ModeChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.arg {
            Some(arg) => write!(f, "{}{} {}", self.action.sign(), self.mode, arg),
            None => write!(f, "{}{}", self.action.sign(), self.mode),
        }
    }
}

/// Returns true if `mode` consumes an argument when parsed.
pub fn takes_arg(mode: char) -> bool {
    ARG_MODES.contains(&mode)
}

/// Parse a mode string and its arguments.
///
/// `+` and `-` switch the current action and are not emitted. The action
/// before any sign is `+`. Argument-taking letters consume the next unused
/// argument in order; if the arguments run out the change carries `None`.
pub fn parse_modes<S: AsRef<str>>(modestring: &str, args: &[S]) -> Vec<ModeChange> {
    let mut changes = Vec::new();
    let mut action = ModeAction::Add;
    let mut next_arg = 0usize;

    for c in modestring.chars() {
        match c {
            '+' => action = ModeAction::Add,
            '-' => action = ModeAction::Remove,
            mode => {
                let arg = if takes_arg(mode) && next_arg < args.len() {
                    let a = args[next_arg].as_ref().to_string();
                    next_arg += 1;
                    Some(a)
                } else {
                    None
                };
                changes.push(ModeChange { mode, action, arg });
            }
        }
    }

    changes
}

/// Split raw `MODE` parameters (everything after the target) into a mode
/// string and its argument list.
///
/// Servers and libraries differ on whether modes arrive as one token
/// (`+ov-b a b m`) or interleaved (`+o a +v b -b m`). Every token starting
/// with a sign is folded into the mode string; the rest are arguments.
pub fn split_mode_params<S: AsRef<str>>(params: &[S]) -> (String, Vec<String>) {
    let mut modestring = String::new();
    let mut args = Vec::new();
    for (i, p) in params.iter().enumerate() {
        let p = p.as_ref();
        if p.starts_with('+') || p.starts_with('-') || (i == 0 && !p.is_empty()) {
            modestring.push_str(p);
        } else {
            args.push(p.to_string());
        }
    }
    (modestring, args)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mixed_modes() {
        let changes = parse_modes("+ov-b", &["alice", "bob", "mask!*@*"]);
        assert_eq!(
            changes,
            vec![
                ModeChange { mode: 'o', action: ModeAction::Add, arg: Some("alice".into()) },
                ModeChange { mode: 'v', action: ModeAction::Add, arg: Some("bob".into()) },
                ModeChange { mode: 'b', action: ModeAction::Remove, arg: Some("mask!*@*".into()) },
            ]
        );
    }

    #[test]
    fn test_change_count_matches_letters() {
        for s in ["+o", "+ov-b", "-mnt+k", "+-+-", "", "ntk", "+lll-e"] {
            let letters = s.chars().filter(|c| *c != '+' && *c != '-').count();
            assert_eq!(parse_modes::<&str>(s, &[]).len(), letters, "modestring {s:?}");
        }
    }

    #[test]
    fn test_args_never_exceed_supplied() {
        let changes = parse_modes("+oooo", &["a", "b"]);
        assert_eq!(changes.len(), 4);
        assert_eq!(changes.iter().filter(|c| c.arg.is_some()).count(), 2);
        assert_eq!(changes[2].arg, None);
    }

    #[test]
    fn test_flag_modes_do_not_consume_args() {
        let changes = parse_modes("+mo", &["alice"]);
        assert_eq!(changes[0].arg, None);
        assert_eq!(changes[1].arg.as_deref(), Some("alice"));
    }

    #[test]
    fn test_lowercase_i_consumes_arg() {
        let changes = parse_modes("+iv", &["x", "bob"]);
        assert_eq!(changes[0].arg.as_deref(), Some("x"));
        assert_eq!(changes[1].arg.as_deref(), Some("bob"));
    }

    #[test]
    fn test_split_interleaved_params() {
        let (m, a) = split_mode_params(&["+o", "alice", "+v", "bob", "-b", "m!*@*"]);
        assert_eq!(m, "+o+v-b");
        assert_eq!(a, vec!["alice", "bob", "m!*@*"]);
        assert_eq!(parse_modes(&m, &a), parse_modes("+ov-b", &["alice", "bob", "m!*@*"]));
    }

    #[test]
    fn test_display() {
        let c = ModeChange { mode: 'b', action: ModeAction::Remove, arg: Some("x!*@*".into()) };
        assert_eq!(c.to_string(), "-b x!*@*");
    }
}
