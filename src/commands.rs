#[derive(Debug, Clone, PartialEq)]
pub enum SlashCommand {
    Help,
    New,
    /// Empty selection means "show the current selection".
    Models(Vec<String>),
    Stream(bool),
    Temperature(f32),
    MaxTokens(u32),
    /// Zero lifts the limit.
    MaxTurns(u32),
    /// Check each selected model's endpoint and key.
    TestConnections,
    Cancel,
    Quit,
    Invalid {
        command: String,
        usage: &'static str,
    },
    Unknown(String),
}

pub const HELP_TEXT: &str = "Commands: /help, /new, /models [a,b], /stream on|off, /temperature <0-2>, /max-tokens <n>, /max-turns <n>, /test, /cancel, /quit";

pub fn parse_slash_command(input: &str) -> Option<SlashCommand> {
    let trimmed = input.trim();
    if !trimmed.starts_with('/') {
        return None;
    }

    let mut parts = trimmed.splitn(2, char::is_whitespace);
    let command = parts.next().unwrap_or(trimmed).to_string();
    let argument = parts.next().map(str::trim).unwrap_or_default();

    let parsed = match command.as_str() {
        "/help" => SlashCommand::Help,
        "/new" => SlashCommand::New,
        "/test" => SlashCommand::TestConnections,
        "/cancel" => SlashCommand::Cancel,
        "/quit" => SlashCommand::Quit,
        "/models" => SlashCommand::Models(parse_model_list(argument)),
        "/stream" => match argument.to_ascii_lowercase().as_str() {
            "on" | "true" => SlashCommand::Stream(true),
            "off" | "false" => SlashCommand::Stream(false),
            _ => invalid(command, "/stream on|off"),
        },
        "/temperature" => match argument.parse::<f32>() {
            Ok(value) if value.is_finite() => SlashCommand::Temperature(value),
            _ => invalid(command, "/temperature <0-2>"),
        },
        "/max-tokens" => match argument.parse::<u32>() {
            Ok(value) if value > 0 => SlashCommand::MaxTokens(value),
            _ => invalid(command, "/max-tokens <1-4096>"),
        },
        "/max-turns" => match argument.parse::<u32>() {
            Ok(value) => SlashCommand::MaxTurns(value),
            Err(_) => invalid(command, "/max-turns <n> (0 for unlimited)"),
        },
        _ => SlashCommand::Unknown(command),
    };

    Some(parsed)
}

fn invalid(command: String, usage: &'static str) -> SlashCommand {
    SlashCommand::Invalid { command, usage }
}

fn parse_model_list(argument: &str) -> Vec<String> {
    argument
        .split(|c: char| c == ',' || c.is_whitespace())
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{parse_slash_command, SlashCommand};

    #[test]
    fn plain_text_is_not_a_command() {
        assert_eq!(parse_slash_command("hello /help"), None);
        assert_eq!(parse_slash_command("   "), None);
    }

    #[test]
    fn bare_commands_parse() {
        assert_eq!(parse_slash_command(" /help "), Some(SlashCommand::Help));
        assert_eq!(parse_slash_command("/new"), Some(SlashCommand::New));
        assert_eq!(parse_slash_command("/cancel"), Some(SlashCommand::Cancel));
        assert_eq!(
            parse_slash_command("/test"),
            Some(SlashCommand::TestConnections)
        );
        assert_eq!(parse_slash_command("/quit now"), Some(SlashCommand::Quit));
        assert_eq!(
            parse_slash_command("/clear"),
            Some(SlashCommand::Unknown("/clear".to_string()))
        );
    }

    #[test]
    fn model_lists_accept_commas_and_spaces() {
        assert_eq!(
            parse_slash_command("/models deepseek, doubao  mock"),
            Some(SlashCommand::Models(vec![
                "deepseek".to_string(),
                "doubao".to_string(),
                "mock".to_string(),
            ]))
        );
        assert_eq!(
            parse_slash_command("/models"),
            Some(SlashCommand::Models(Vec::new()))
        );
    }

    #[test]
    fn settings_commands_validate_arguments() {
        assert_eq!(
            parse_slash_command("/stream ON"),
            Some(SlashCommand::Stream(true))
        );
        assert_eq!(
            parse_slash_command("/stream off"),
            Some(SlashCommand::Stream(false))
        );
        assert_eq!(
            parse_slash_command("/temperature 1.25"),
            Some(SlashCommand::Temperature(1.25))
        );
        assert_eq!(
            parse_slash_command("/max-tokens 512"),
            Some(SlashCommand::MaxTokens(512))
        );
        assert_eq!(
            parse_slash_command("/max-turns 0"),
            Some(SlashCommand::MaxTurns(0))
        );

        for input in ["/stream", "/temperature warm", "/temperature NaN", "/max-tokens 0", "/max-turns -1"] {
            assert!(
                matches!(parse_slash_command(input), Some(SlashCommand::Invalid { .. })),
                "{input} should be rejected"
            );
        }
    }
}
