/// Text commands understood by the bot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Record,
    Stop,
    Status,
    TestRecord,
    Help,
}

impl Command {
    /// Parse `content` if it starts with `prefix` followed by a known command name.
    /// Anything after the name is ignored; commands take no arguments.
    pub fn parse(prefix: &str, content: &str) -> Option<Self> {
        let rest = content.trim_start().strip_prefix(prefix)?;
        if rest.starts_with(char::is_whitespace) {
            return None;
        }
        let name = rest.split_whitespace().next()?;

        match name.to_ascii_lowercase().as_str() {
            "record" => Some(Command::Record),
            "stop" => Some(Command::Stop),
            "status" => Some(Command::Status),
            "test_record" => Some(Command::TestRecord),
            "help" => Some(Command::Help),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::Record => "record",
            Command::Stop => "stop",
            Command::Status => "status",
            Command::TestRecord => "test_record",
            Command::Help => "help",
        }
    }

    pub fn help_text(prefix: &str) -> String {
        format!(
            "Commands:\n\
             `{p}record` - start recording your voice channel\n\
             `{p}stop` - stop recording and save the last segment\n\
             `{p}status` - show the current recording\n\
             `{p}test_record` - make a short test recording\n\
             `{p}help` - show this message",
            p = prefix
        )
    }
}
