//! Dynamic symbol table extraction via an `nm -D` style tool.

use regex::Regex;
use std::collections::HashSet;
use std::path::Path;
use std::process::Stdio;
use std::sync::OnceLock;
use tracing::{debug, instrument};

use crate::config::ToolCommand;
use crate::model::SymbolTable;

fn symbol_line() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^(?P<address>[0-9a-fA-F]+) (?P<kind>.) (?P<symbol>[_a-zA-Z][_a-zA-Z0-9]+)$")
            .expect("symbol line pattern is valid")
    })
}

#[derive(Debug, Clone)]
pub struct SymbolExtractor {
    tool: ToolCommand,
    excluded_types: HashSet<char>,
}

impl SymbolExtractor {
    pub fn new(tool: ToolCommand) -> Self {
        Self {
            tool,
            excluded_types: HashSet::from(['U']),
        }
    }

    pub fn with_excluded_types(mut self, types: impl IntoIterator<Item = char>) -> Self {
        self.excluded_types = types.into_iter().collect();
        self
    }

    /// Dumps and parses the dynamic symbols of `path`.
    ///
    /// The tool's exit status does not fail the call: a tool that exits non-zero
    /// simply yields whatever it printed, often nothing.
    ///
    /// # Errors
    ///
    /// Returns `Err` only if the tool cannot be spawned.
    #[instrument(skip(self), fields(tool = %self.tool.program))]
    pub async fn extract(&self, path: &Path) -> Result<SymbolTable, std::io::Error> {
        let output = self
            .tool
            .command()
            .arg("-D")
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .output()
            .await?;

        if !output.status.success() {
            debug!(status = %output.status, "Symbol tool exited unsuccessfully");
        }

        let symbols = self.parse(&String::from_utf8_lossy(&output.stdout));
        debug!(count = symbols.len(), "Parsed symbols");
        Ok(symbols)
    }

    /// Parses tool output; non-matching lines are ignored and later duplicates win.
    pub fn parse(&self, output: &str) -> SymbolTable {
        let mut symbols = SymbolTable::new();
        for captures in symbol_line().captures_iter(output) {
            let kind = captures["kind"].chars().next();
            if kind.is_some_and(|c| self.excluded_types.contains(&c)) {
                continue;
            }
            // Addresses wider than 64 bits are not real addresses.
            if let Ok(address) = u64::from_str_radix(&captures["address"], 16) {
                symbols.insert(captures["symbol"].to_string(), address);
            }
        }
        symbols
    }
}
