//! Debugger meta-commands typed into the debug console with a `!` prefix.

use crate::debuggee::Debuggee;
use regex::Regex;

pub const PREFIX: char = '!';

const HELP: &[&str] = &[
    "Available commands : ",
    "    !help - gets this help",
    "    !seterror <regex> - sets the regex which tells which errors to trap",
    "    !geterror - gets the current value of the regex which tells which errors to trap",
    "    !execendnotify [on|off] - sets the notification of end of execution on or off (default = off)",
    "    ... or type an expression to evaluate it on the fly.",
];

#[derive(Debug, Clone, PartialEq)]
pub enum MetaCommand {
    Help,
    GetError,
    SetError(String),
    ExecEndNotify(Option<String>),
    Unknown(String),
}

impl MetaCommand {
    /// Parse console input, `None` if it is a plain expression.
    pub fn parse(input: &str) -> Option<Self> {
        let cmd = input.trim_start().strip_prefix(PREFIX)?.trim();
        let (name, arg) = match cmd.split_once(char::is_whitespace) {
            Some((name, arg)) => (name, arg.trim()),
            None => (cmd, ""),
        };

        let command = match name {
            "help" if arg.is_empty() => MetaCommand::Help,
            "geterror" => MetaCommand::GetError,
            "seterror" => MetaCommand::SetError(arg.to_string()),
            "execendnotify" => {
                MetaCommand::ExecEndNotify((!arg.is_empty()).then(|| arg.to_string()))
            }
            _ => MetaCommand::Unknown(cmd.to_string()),
        };
        Some(command)
    }

    /// Run the command, returning the console lines to print.
    pub fn execute(&self, debuggee: &dyn Debuggee, notify_execution_end: &mut bool) -> Vec<String> {
        let mut out = vec![];
        match self {
            MetaCommand::Help => out.extend(HELP.iter().map(|s| s.to_string())),
            MetaCommand::GetError => {
                out.push(format!("Current error regex : {}", debuggee.error_filter()));
            }
            MetaCommand::SetError(pattern) => match Regex::new(pattern) {
                Ok(filter) => {
                    debuggee.set_error_filter(filter);
                    out.push(format!("Current error regex : {}", debuggee.error_filter()));
                }
                Err(e) => out.push(format!("Error setting regex: {e}")),
            },
            MetaCommand::ExecEndNotify(arg) => {
                match arg.as_deref() {
                    Some("on") => *notify_execution_end = true,
                    Some("off") => *notify_execution_end = false,
                    Some(_) => out.push("Error : expected 'on' or 'off'".to_string()),
                    None => {}
                }
                out.push(format!(
                    "Notifications of execution end are : {}",
                    if *notify_execution_end {
                        "enabled"
                    } else {
                        "disabled"
                    }
                ));
            }
            MetaCommand::Unknown(cmd) => {
                out.push(format!("Syntax error : {cmd}"));
                out.extend(HELP.iter().map(|s| s.to_string()));
            }
        }
        out
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::debuggee::test_utils::FakeDebuggee;

    #[test]
    fn test_parse() {
        struct TestCase {
            input: &'static str,
            expected: Option<MetaCommand>,
        }

        let cases = [
            TestCase {
                input: "a.b + 1",
                expected: None,
            },
            TestCase {
                input: "!help",
                expected: Some(MetaCommand::Help),
            },
            TestCase {
                input: "  ! geterror ",
                expected: Some(MetaCommand::GetError),
            },
            TestCase {
                input: "!seterror  ^foo.*$ ",
                expected: Some(MetaCommand::SetError("^foo.*$".to_string())),
            },
            TestCase {
                input: "!execendnotify",
                expected: Some(MetaCommand::ExecEndNotify(None)),
            },
            TestCase {
                input: "!execendnotify on",
                expected: Some(MetaCommand::ExecEndNotify(Some("on".to_string()))),
            },
            TestCase {
                input: "!frobnicate 1",
                expected: Some(MetaCommand::Unknown("frobnicate 1".to_string())),
            },
        ];

        for tc in cases {
            assert_eq!(MetaCommand::parse(tc.input), tc.expected, "input: {}", tc.input);
        }
    }

    #[test]
    fn test_error_filter_commands() {
        let debuggee = FakeDebuggee::new(1);
        let mut notify = false;

        let out = MetaCommand::SetError("^boom".to_string()).execute(&debuggee, &mut notify);
        assert_eq!(out, vec!["Current error regex : ^boom".to_string()]);
        assert_eq!(debuggee.error_filter().as_str(), "^boom");

        let out = MetaCommand::SetError("(".to_string()).execute(&debuggee, &mut notify);
        assert!(out[0].starts_with("Error setting regex:"));
        assert_eq!(debuggee.error_filter().as_str(), "^boom");
    }

    #[test]
    fn test_exec_end_notify() {
        let debuggee = FakeDebuggee::new(1);
        let mut notify = false;

        let out = MetaCommand::ExecEndNotify(Some("on".to_string())).execute(&debuggee, &mut notify);
        assert!(notify);
        assert_eq!(out, vec!["Notifications of execution end are : enabled".to_string()]);

        let out = MetaCommand::ExecEndNotify(Some("maybe".to_string())).execute(&debuggee, &mut notify);
        assert!(notify);
        assert_eq!(out.len(), 2);

        let out = MetaCommand::Unknown("x".to_string()).execute(&debuggee, &mut notify);
        assert_eq!(out.len(), 1 + HELP.len());
    }
}
