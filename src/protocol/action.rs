//! The closed set of request actions.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// Every action a `request` frame may name.
///
/// Parsing is total over the wire names; anything else is rejected before a
/// handler is chosen, so dispatch is an exhaustive `match`.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Action {
    /// Build the backend client from an API key and model.
    Initialize,
    /// Replace the tool catalog offered to the model.
    RegisterTools,
    /// Single-shot identity check against the model.
    Validate,
    /// Multi-round streaming chat; runs as its own task.
    Chat,
    /// Deliver the result of a tool call surfaced by a chat.
    ToolResult,
    /// Model-backed web search.
    WebSearch,
    /// Fetch URLs named in a prompt and answer from their content.
    WebFetch,
    /// Repair an edit whose `old_string` does not match.
    EnsureCorrectEdit,
    /// Undo over-escaping in file content about to be written.
    EnsureCorrectFileContent,
    /// Ask the model to rework a failed edit given an instruction.
    FixEditWithInstruction,
    /// Summarise a block of text.
    SummarizeText,
    /// Upload a file into a document collection.
    Upload,
    /// Acknowledge and stop reading input.
    Shutdown,
}

impl Action {
    /// All actions, in wire order.
    pub const ALL: [Action; 13] = [
        Action::Initialize,
        Action::RegisterTools,
        Action::Validate,
        Action::Chat,
        Action::ToolResult,
        Action::WebSearch,
        Action::WebFetch,
        Action::EnsureCorrectEdit,
        Action::EnsureCorrectFileContent,
        Action::FixEditWithInstruction,
        Action::SummarizeText,
        Action::Upload,
        Action::Shutdown,
    ];

    /// Wire name of the action.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initialize => "initialize",
            Self::RegisterTools => "registerTools",
            Self::Validate => "validate",
            Self::Chat => "chat",
            Self::ToolResult => "toolResult",
            Self::WebSearch => "tooling.webSearch",
            Self::WebFetch => "tooling.webFetch",
            Self::EnsureCorrectEdit => "tooling.ensureCorrectEdit",
            Self::EnsureCorrectFileContent => "tooling.ensureCorrectFileContent",
            Self::FixEditWithInstruction => "tooling.fixEditWithInstruction",
            Self::SummarizeText => "tooling.summarizeText",
            Self::Upload => "upload",
            Self::Shutdown => "shutdown",
        }
    }
}

impl Display for Action {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The unrecognised action name.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct UnknownAction(pub String);

impl FromStr for Action {
    type Err = UnknownAction;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|action| action.as_str() == s)
            .ok_or_else(|| UnknownAction(s.to_owned()))
    }
}
