//! User slash-command parser.
//!
//! Parses `/command arg1 arg2 ...` input lines into typed [`Command`] values
//! that the store turns into outbound lines.

/// A parsed user command. Each variant corresponds to a `/command`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Join { channel: String },
    Part { channel: Option<String>, reason: Option<String> },
    Nick { nick: String },
    Msg { target: String, text: String },
    Query { nick: String },
    Me { text: String },
    Kick { channel: Option<String>, user: String, reason: Option<String> },
    Mode { target: String, modes: String, args: Vec<String> },
    Topic { channel: Option<String>, text: Option<String> },
    Whois { nick: String },
    Who { target: String },
    Oper { name: String, password: String },
    React { msgid: String, emoji: String },
    Unreact { msgid: String, emoji: String },
    MetaGet { target: String, keys: Vec<String> },
    MetaSet { target: String, key: String, value: Option<String> },
    MetaList { target: String },
    MetaSub { keys: Vec<String> },
    MetaUnsub { keys: Vec<String> },
    Away { message: Option<String> },
    Register { account: String, email: Option<String>, password: String },
    Verify { account: String, code: String },
    Raw { line: String },
    List,
    Quit { message: Option<String> },
}

fn is_channel_like(s: &str) -> bool {
    s.starts_with('#') || s.starts_with('&')
}

fn words(s: Option<&&str>) -> Vec<String> {
    s.map(|s| s.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default()
}

fn non_empty(s: Option<&&str>) -> Option<String> {
    s.map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Parse a slash-command string into a [`Command`].
///
/// Returns `None` if the input does not start with `/` or is not a recognized
/// command. Commands are case-insensitive.
pub fn parse_command(input: &str) -> Option<Command> {
    let input = input.trim();
    let body = input.strip_prefix('/')?;

    let parts: Vec<&str> = body.splitn(3, ' ').collect();
    let cmd = parts.first()?.to_lowercase();

    match cmd.as_str() {
        "join" | "j" => {
            let channel = parts.get(1)?.to_string();
            let channel = if is_channel_like(&channel) {
                channel
            } else {
                format!("#{}", channel)
            };
            Some(Command::Join { channel })
        }
        "part" | "leave" => {
            let arg1 = parts.get(1).map(|s| s.to_string());
            let rest = parts.get(2).map(|s| s.to_string());
            let (channel, reason) = match arg1 {
                Some(a) if is_channel_like(&a) => (Some(a), rest),
                Some(a) => {
                    // no channel given: everything is the reason
                    let full = match rest {
                        Some(r) => format!("{} {}", a, r),
                        None => a,
                    };
                    (None, Some(full))
                }
                None => (None, None),
            };
            Some(Command::Part { channel, reason })
        }
        "nick" => Some(Command::Nick {
            nick: parts.get(1)?.to_string(),
        }),
        "msg" => {
            let target = parts.get(1)?.to_string();
            let text = parts.get(2).unwrap_or(&"").to_string();
            Some(Command::Msg { target, text })
        }
        "query" => Some(Command::Query {
            nick: parts.get(1)?.to_string(),
        }),
        "me" => {
            let text = body.split_once(' ').map(|(_, t)| t).unwrap_or("").to_string();
            Some(Command::Me { text })
        }
        "kick" => {
            let arg1 = parts.get(1)?.to_string();
            let rest = parts.get(2).map(|s| s.to_string());
            if is_channel_like(&arg1) {
                // /kick #channel user [reason]
                let rest = rest?;
                let mut sp = rest.splitn(2, ' ');
                let user = sp.next().unwrap_or("").to_string();
                let reason = sp.next().map(|s| s.to_string());
                Some(Command::Kick {
                    channel: Some(arg1),
                    user,
                    reason,
                })
            } else {
                Some(Command::Kick {
                    channel: None,
                    user: arg1,
                    reason: rest,
                })
            }
        }
        "mode" => {
            let target = parts.get(1)?.to_string();
            let mut rest = words(parts.get(2)).into_iter();
            let modes = rest.next().unwrap_or_default();
            Some(Command::Mode {
                target,
                modes,
                args: rest.collect(),
            })
        }
        "topic" => {
            let arg1 = parts.get(1).map(|s| s.to_string());
            match arg1 {
                Some(a) if is_channel_like(&a) => Some(Command::Topic {
                    channel: Some(a),
                    text: non_empty(parts.get(2)),
                }),
                Some(_) => Some(Command::Topic {
                    channel: None,
                    text: body.split_once(' ').map(|(_, t)| t.to_string()),
                }),
                None => Some(Command::Topic {
                    channel: None,
                    text: None,
                }),
            }
        }
        "whois" | "wi" => Some(Command::Whois {
            nick: parts.get(1)?.to_string(),
        }),
        "who" => Some(Command::Who {
            target: parts.get(1)?.to_string(),
        }),
        "oper" => {
            let name = parts.get(1)?.to_string();
            let password = parts.get(2)?.trim().to_string();
            Some(Command::Oper { name, password })
        }
        "react" | "unreact" => {
            let msgid = parts.get(1)?.to_string();
            let emoji = non_empty(parts.get(2))?;
            if cmd == "react" {
                Some(Command::React { msgid, emoji })
            } else {
                Some(Command::Unreact { msgid, emoji })
            }
        }
        "meta" | "metadata" => {
            let sub = parts.get(1)?.to_lowercase();
            let rest = words(parts.get(2));
            match sub.as_str() {
                "get" => {
                    let (target, keys) = rest.split_first()?;
                    if keys.is_empty() {
                        return None;
                    }
                    Some(Command::MetaGet {
                        target: target.clone(),
                        keys: keys.to_vec(),
                    })
                }
                "set" => {
                    let mut sp = parts.get(2)?.splitn(3, ' ');
                    let target = sp.next()?.to_string();
                    let key = sp.next().filter(|k| !k.is_empty())?.to_string();
                    let value = sp.next().filter(|v| !v.is_empty()).map(str::to_string);
                    Some(Command::MetaSet { target, key, value })
                }
                "list" => Some(Command::MetaList {
                    target: rest.first().cloned().unwrap_or_else(|| "*".to_string()),
                }),
                "sub" => Some(Command::MetaSub { keys: rest }),
                "unsub" => Some(Command::MetaUnsub { keys: rest }),
                _ => None,
            }
        }
        "away" => Some(Command::Away {
            message: body.split_once(' ').map(|(_, m)| m.to_string()),
        }),
        "back" => Some(Command::Away { message: None }),
        "register" => {
            // /register <account> <email|*> <password>
            let args: Vec<&str> = body.split_whitespace().skip(1).collect();
            let [account, email, password] = args.as_slice() else {
                return None;
            };
            Some(Command::Register {
                account: account.to_string(),
                email: (*email != "*").then(|| email.to_string()),
                password: password.to_string(),
            })
        }
        "verify" => {
            let args: Vec<&str> = body.split_whitespace().skip(1).collect();
            let [account, code] = args.as_slice() else {
                return None;
            };
            Some(Command::Verify {
                account: account.to_string(),
                code: code.to_string(),
            })
        }
        "raw" | "quote" => {
            let line = body.split_once(' ')?.1.trim();
            if line.is_empty() {
                return None;
            }
            Some(Command::Raw {
                line: line.to_string(),
            })
        }
        "list" => Some(Command::List),
        "quit" | "exit" => Some(Command::Quit {
            message: body.split_once(' ').map(|(_, m)| m.to_string()),
        }),
        _ => None,
    }
}
