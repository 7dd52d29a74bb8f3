//! Command-line arguments.

use clap::Parser;

/// Research a question on the web and report which claims the sources back up
#[derive(Parser, Debug, Clone)]
#[command(name = "factloop", version)]
pub struct Cli {
    /// Question to research (words are joined with spaces)
    #[arg(
        value_name = "QUESTION",
        required_unless_present_any = ["list", "show"],
        conflicts_with_all = ["list", "show"]
    )]
    pub question: Vec<String>,

    /// List the ids of saved runs
    #[arg(long, conflicts_with = "show")]
    pub list: bool,

    /// Print the report of a saved run
    #[arg(long, value_name = "ID")]
    pub show: Option<String>,
}

/// What the process was asked to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    Research(String),
    List,
    Show(String),
}

impl Cli {
    pub fn mode(self) -> Mode {
        if self.list {
            Mode::List
        } else if let Some(id) = self.show {
            Mode::Show(id)
        } else {
            Mode::Research(self.question.join(" ").trim().to_string())
        }
    }
}
