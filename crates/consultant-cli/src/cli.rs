use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Chat,
    Scan { image_path: PathBuf },
    SetApiKey { key: String },
    ClearApiKey,
}

#[derive(Debug, Clone)]
pub struct CliOptions {
    pub command: Command,
}

#[derive(Debug, Error)]
pub enum CliError {
    #[error("missing command")]
    MissingCommand,
    #[error("unknown argument: {0}")]
    UnknownArgument(String),
    #[error("missing value for argument: {0}")]
    MissingValue(String),
    #[error("help requested")]
    HelpRequested,
}

/// One line typed at the chat prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatInput<'a> {
    Blank,
    Quit,
    Reset,
    Message(&'a str),
}

impl<'a> ChatInput<'a> {
    pub fn parse(line: &'a str) -> Self {
        match line.trim() {
            "" => Self::Blank,
            "/quit" | "/exit" => Self::Quit,
            "/reset" => Self::Reset,
            text => Self::Message(text),
        }
    }
}

impl CliOptions {
    pub fn parse<I>(args: I) -> Result<Self, CliError>
    where
        I: IntoIterator<Item = String>,
    {
        let mut iter = args.into_iter();
        let command = match iter.next() {
            None => return Err(CliError::MissingCommand),
            Some(arg) => match arg.as_str() {
                "--help" | "-h" | "help" => return Err(CliError::HelpRequested),
                "chat" => Command::Chat,
                "scan" => {
                    let path = iter.next().ok_or(CliError::MissingValue(arg.clone()))?;
                    Command::Scan {
                        image_path: PathBuf::from(path),
                    }
                }
                "set-api-key" => {
                    let key = iter
                        .next()
                        .filter(|key| !key.trim().is_empty())
                        .ok_or(CliError::MissingValue(arg.clone()))?;
                    Command::SetApiKey { key }
                }
                "clear-api-key" => Command::ClearApiKey,
                unknown => return Err(CliError::UnknownArgument(unknown.to_string())),
            },
        };

        if let Some(extra) = iter.next() {
            if extra == "--help" || extra == "-h" {
                return Err(CliError::HelpRequested);
            }
            return Err(CliError::UnknownArgument(extra));
        }

        Ok(Self { command })
    }
}
