//! 控制台输入解析
//!
//! 每行一条消息：
//!
//! ```text
//! <tenant> <user> <voice|-> <message...>
//! @alone|@kicked|@removed <tenant>
//! ```
//!
//! 只有以 `!` 开头的消息是指令；`bot:` 开头的用户视为机器人，忽略。

use crate::domain::{TenantId, VoiceTarget};
use crate::messages::{Command, Request, TeardownCause};

pub const PREFIX: char = '!';
const BOT_PREFIX: &str = "bot:";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Request(Request),
    Presence {
        tenant: TenantId,
        cause: TeardownCause,
    },
    /// 普通聊天、机器人消息、未知指令或空行
    Ignored,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("格式错误，应为 `<tenant> <user> <voice|-> <message>`")]
    Malformed,
    #[error("未知的成员事件: {0}")]
    UnknownPresence(String),
}

pub fn parse_line(line: &str) -> Result<Inbound, ParseError> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(Inbound::Ignored);
    }
    if let Some(rest) = line.strip_prefix('@') {
        return parse_presence(rest);
    }

    let mut parts = line.splitn(4, char::is_whitespace);
    let (Some(tenant), Some(user), Some(voice), Some(message)) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(ParseError::Malformed);
    };
    if user.starts_with(BOT_PREFIX) {
        return Ok(Inbound::Ignored);
    }
    let Some(command) = parse_command(message) else {
        return Ok(Inbound::Ignored);
    };

    Ok(Inbound::Request(Request {
        tenant: TenantId::from(tenant),
        requester: user.to_owned(),
        command,
        voice: (voice != "-").then(|| VoiceTarget::from(voice)),
    }))
}

/// `!play <url>` / `!skip` / `!stop`，指令名不区分大小写
pub fn parse_command(message: &str) -> Option<Command> {
    let body = message.trim().strip_prefix(PREFIX)?;
    let mut args = body.split_whitespace();
    let cmd = args.next()?.to_lowercase();
    match cmd.as_str() {
        "play" => Some(Command::Play(args.next().unwrap_or_default().to_owned())),
        "skip" => Some(Command::Skip),
        "stop" => Some(Command::Stop),
        _ => None,
    }
}

fn parse_presence(rest: &str) -> Result<Inbound, ParseError> {
    let mut parts = rest.split_whitespace();
    let kind = parts.next().unwrap_or_default();
    let Some(tenant) = parts.next() else {
        return Err(ParseError::Malformed);
    };
    let cause = match kind {
        "alone" => TeardownCause::AloneInChannel,
        "kicked" => TeardownCause::Disconnected,
        "removed" => TeardownCause::TenantRemoved,
        other => return Err(ParseError::UnknownPresence(other.to_owned())),
    };
    Ok(Inbound::Presence {
        tenant: TenantId::from(tenant),
        cause,
    })
}
