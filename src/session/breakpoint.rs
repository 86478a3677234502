use crate::dap::protocol::Breakpoint;
use crate::debuggee::{Condition, Debuggee};
use crate::error::{wire, Error};
use crate::session::stack::ClientConventions;
use serde::Deserialize;
use std::collections::BTreeMap;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetBreakpointsArguments {
    pub source: Option<SourceArgument>,
    #[serde(default)]
    pub breakpoints: Option<Vec<SourceBreakpoint>>,
    /// Deprecated form, lines without conditions.
    #[serde(default)]
    pub lines: Option<Vec<i64>>,
}

#[derive(Debug, Deserialize)]
pub struct SourceArgument {
    pub path: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SourceBreakpoint {
    pub line: i64,
    pub condition: Option<String>,
}

fn malformed_source() -> Error {
    Error::protocol(
        wire::MALFORMED_SOURCE,
        "setBreakpoints: property 'source' is empty or malformed",
    )
}

/// Replace every breakpoint of one source.
///
/// Produces one entry per requested breakpoint, in request order. Entries
/// that cannot be installed are reported unverified with a message instead
/// of failing the request.
pub fn set_breakpoints(
    debuggee: &dyn Debuggee,
    conventions: ClientConventions,
    arguments: &serde_json::Value,
) -> Result<Vec<Breakpoint>, Error> {
    let args: SetBreakpointsArguments =
        serde_json::from_value(arguments.clone()).map_err(|_| malformed_source())?;

    let path = args
        .source
        .and_then(|s| s.path)
        .filter(|p| !p.trim().is_empty())
        .ok_or_else(malformed_source)?;
    let path = conventions
        .path_from_client(&path)
        .ok_or_else(malformed_source)?;

    let requested: Vec<SourceBreakpoint> = match (args.breakpoints, args.lines) {
        (Some(bps), _) => bps,
        (None, Some(lines)) => lines
            .into_iter()
            .map(|line| SourceBreakpoint {
                line,
                condition: None,
            })
            .collect(),
        (None, None) => vec![],
    };

    let Some(source) = debuggee.find_source(&path) else {
        log::debug!(target: "dap", "breakpoints for unknown source {path}");
        return Ok(requested
            .iter()
            .map(|bp| unverified(bp.line, format!("source '{path}' is not loaded")))
            .collect());
    };

    // Per entry: debugger line, or the reason it was rejected.
    let mut outcomes: Vec<Result<u32, String>> = Vec::with_capacity(requested.len());
    let mut lines: BTreeMap<u32, Option<Condition>> = BTreeMap::new();

    for bp in &requested {
        let line = conventions
            .line_from_client(bp.line)
            .and_then(|line| u32::try_from(line).ok());
        let Some(line) = line else {
            outcomes.push(Err(format!("invalid line {}", bp.line)));
            continue;
        };
        if line == 0 {
            outcomes.push(Err(format!("invalid line {}", bp.line)));
            continue;
        }

        let condition = match bp.condition.as_deref().map(str::trim) {
            Some(expr) if !expr.is_empty() => match debuggee.compile_condition(expr) {
                Ok(cond) => Some(cond),
                Err(e) => {
                    outcomes.push(Err(e.message));
                    continue;
                }
            },
            _ => None,
        };

        // first definition of a line wins
        lines.entry(line).or_insert(condition);
        outcomes.push(Ok(line));
    }

    let confirmed = debuggee.reset_breakpoints(source, lines);

    Ok(requested
        .iter()
        .zip(outcomes)
        .map(|(bp, outcome)| match outcome {
            Ok(line) if confirmed.contains(&line) => Breakpoint {
                verified: true,
                line: bp.line,
                message: None,
            },
            Ok(_) => unverified(bp.line, "no code at this line".to_string()),
            Err(msg) => unverified(bp.line, msg),
        })
        .collect())
}

fn unverified(line: i64, message: String) -> Breakpoint {
    Breakpoint {
        verified: false,
        line,
        message: Some(message),
    }
}
