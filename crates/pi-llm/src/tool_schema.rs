//! The shape of a tool definition as sent to a provider. Distinct from
//! `pi_agent::tools::Tool` (the executable trait): this is just the wire
//! description every adapter needs to build its `tools` request field.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON-Schema for the tool's parameters object.
    pub parameters: Value,
}
