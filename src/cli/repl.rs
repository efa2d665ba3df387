//! Interactive question loop.

use crate::cli::output::Output;
use crate::rag::answer::{QueryEngine, QueryRequest};

/// A parsed REPL line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    Ask(String),
    ToggleCrossSheet,
    AddEntity(String),
    ListEntities,
    Clear,
    Help,
    Quit,
    Unknown(String),
    Empty,
}

impl ReplCommand {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return ReplCommand::Empty;
        }
        let Some(rest) = line.strip_prefix(':') else {
            return ReplCommand::Ask(line.to_string());
        };

        let (cmd, arg) = match rest.split_once(char::is_whitespace) {
            Some((cmd, arg)) => (cmd, arg.trim()),
            None => (rest, ""),
        };
        match cmd {
            "cross" => ReplCommand::ToggleCrossSheet,
            "entity" if arg.is_empty() => ReplCommand::ListEntities,
            "entity" => ReplCommand::AddEntity(arg.to_string()),
            "clear" => ReplCommand::Clear,
            "help" | "h" => ReplCommand::Help,
            "quit" | "q" | "exit" => ReplCommand::Quit,
            other => ReplCommand::Unknown(other.to_string()),
        }
    }
}

/// Mode carried between questions.
#[derive(Debug, Default)]
pub struct ReplState {
    pub cross_sheet: bool,
    pub entities: Vec<String>,
}

impl ReplState {
    pub fn request(&self, query: &str) -> QueryRequest {
        QueryRequest {
            cross_sheet: self.cross_sheet,
            entities: self.entities.clone(),
            ..QueryRequest::new(query)
        }
    }

    fn label(&self) -> String {
        match (self.cross_sheet || !self.entities.is_empty(), self.entities.is_empty()) {
            (false, _) => "sheetrag".to_string(),
            (true, true) => "sheetrag[cross]".to_string(),
            (true, false) => format!("sheetrag[{}]", self.entities.join(",")),
        }
    }
}

fn help(output: &Output) {
    output.subheader("Commands");
    output.list_item(":cross          toggle cross-sheet retrieval");
    output.list_item(":entity <name>  boost rows mentioning <name> (repeatable)");
    output.list_item(":entity         list active entities");
    output.list_item(":clear          reset mode and entities");
    output.list_item(":quit           leave");
}

/// Run the loop until `:quit` or end of input.
pub async fn run(engine: &QueryEngine, output: &Output) {
    output.banner();
    let mut state = ReplState::default();

    while let Some(line) = output.prompt(&state.label()) {
        match ReplCommand::parse(&line) {
            ReplCommand::Empty => {}
            ReplCommand::Quit => break,
            ReplCommand::Help => help(output),
            ReplCommand::ToggleCrossSheet => {
                state.cross_sheet = !state.cross_sheet;
                output.info(&format!(
                    "Cross-sheet retrieval {}",
                    if state.cross_sheet { "on" } else { "off" }
                ));
            }
            ReplCommand::AddEntity(entity) => {
                if !state.entities.contains(&entity) {
                    state.entities.push(entity);
                }
                output.info(&format!("Entities: {}", state.entities.join(", ")));
            }
            ReplCommand::ListEntities => {
                if state.entities.is_empty() {
                    output.info("No entities set");
                } else {
                    output.info(&format!("Entities: {}", state.entities.join(", ")));
                }
            }
            ReplCommand::Clear => {
                state = ReplState::default();
                output.info("Cleared");
            }
            ReplCommand::Unknown(cmd) => {
                output.warning(&format!("Unknown command :{} (try :help)", cmd));
            }
            ReplCommand::Ask(query) => match engine.ask(&state.request(&query)).await {
                Ok(response) => output.response(&response, true),
                Err(e) => output.error(&e.to_string()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("", ReplCommand::Empty)]
    #[case("  price of xyz ", ReplCommand::Ask("price of xyz".into()))]
    #[case(":cross", ReplCommand::ToggleCrossSheet)]
    #[case(":entity product xyz", ReplCommand::AddEntity("product xyz".into()))]
    #[case(":entity", ReplCommand::ListEntities)]
    #[case(":clear", ReplCommand::Clear)]
    #[case(":q", ReplCommand::Quit)]
    #[case(":quit", ReplCommand::Quit)]
    #[case(":bogus", ReplCommand::Unknown("bogus".into()))]
    fn test_parse(#[case] line: &str, #[case] expected: ReplCommand) {
        assert_eq!(ReplCommand::parse(line), expected);
    }

    #[test]
    fn test_state_builds_request() {
        let mut state = ReplState::default();
        assert_eq!(state.label(), "sheetrag");

        state.cross_sheet = true;
        assert_eq!(state.label(), "sheetrag[cross]");

        state.entities.push("xyz".into());
        let request = state.request("stock");
        assert!(request.cross_sheet);
        assert_eq!(request.entities, vec!["xyz"]);
        assert_eq!(state.label(), "sheetrag[xyz]");
    }
}
