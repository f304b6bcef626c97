/// Commands the presentation layer sends into the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    StartStreaming,
    StopStreaming,
    Quit,
}

impl Command {
    pub fn parse(line: &str) -> Option<Command> {
        match line.trim().to_ascii_lowercase().as_str() {
            "start" | "s" => Some(Command::StartStreaming),
            "stop" | "x" => Some(Command::StopStreaming),
            "quit" | "q" | "exit" => Some(Command::Quit),
            _ => None,
        }
    }
}
