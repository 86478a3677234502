use crate::dap::protocol::{Source, StackFrame};
use crate::debuggee::{CallFrame, Debuggee};
use std::path::Path;
use url::Url;

/// Synthetic frames appended after the real ones: the truncation marker is
/// optional, the coroutine and the native boundary are always there.
const PSEUDO_FRAMES: usize = 3;

/// Line and path conventions announced by the client in `initialize`.
#[derive(Debug, Clone, Copy)]
pub struct ClientConventions {
    pub lines_start_at_1: bool,
    pub paths_are_uri: bool,
}

impl Default for ClientConventions {
    fn default() -> Self {
        Self {
            lines_start_at_1: true,
            paths_are_uri: false,
        }
    }
}

impl ClientConventions {
    pub fn line_to_client(&self, line: u32) -> i64 {
        if self.lines_start_at_1 {
            line as i64
        } else {
            line as i64 - 1
        }
    }

    /// `None` if the client line has no debugger counterpart.
    pub fn line_from_client(&self, line: i64) -> Option<i64> {
        if self.lines_start_at_1 {
            Some(line)
        } else {
            line.checked_add(1)
        }
    }

    pub fn path_to_client(&self, path: &str) -> String {
        if !self.paths_are_uri {
            return path.to_string();
        }
        Url::from_file_path(path)
            .map(String::from)
            .unwrap_or_else(|_| path.to_string())
    }

    /// `None` if the client sent a uri that does not denote a local file.
    pub fn path_from_client(&self, path: &str) -> Option<String> {
        if !self.paths_are_uri {
            return Some(path.to_string());
        }
        let url = Url::parse(path).ok()?;
        let file = url.to_file_path().ok()?;
        Some(file.to_string_lossy().into_owned())
    }
}

/// Window of the call stack as reported by `stackTrace`.
///
/// Real frames are identified by their depth. Pseudo frames get ids past
/// the real stack, so they never alias a real frame in `scopes`.
pub fn build_stack_trace(
    debuggee: &dyn Debuggee,
    call_stack: &[CallFrame],
    conventions: ClientConventions,
    start: usize,
    levels: usize,
) -> (Vec<StackFrame>, usize) {
    let real_budget = if levels == 0 {
        call_stack.len()
    } else {
        levels.saturating_sub(PSEUDO_FRAMES).max(1)
    };
    let end = call_stack.len().min(start.saturating_add(real_budget));
    let start = start.min(end);

    let mut frames: Vec<StackFrame> = call_stack[start..end]
        .iter()
        .enumerate()
        .map(|(i, frame)| real_frame(debuggee, frame, start + i, conventions))
        .collect();

    let mut pseudo_id = call_stack.len() as i64;
    let mut next_id = || {
        let id = pseudo_id;
        pseudo_id += 1;
        id
    };
    if end < call_stack.len() {
        frames.push(StackFrame::label(next_id(), "(...)"));
    }
    let coroutine = match debuggee.coroutine_name() {
        Some(name) => format!("({name})"),
        None => "(main coroutine)".to_string(),
    };
    frames.push(StackFrame::label(next_id(), coroutine));
    frames.push(StackFrame::label(next_id(), "(native)"));

    (frames, call_stack.len() + 2)
}

fn real_frame(
    debuggee: &dyn Debuggee,
    frame: &CallFrame,
    depth: usize,
    conventions: ClientConventions,
) -> StackFrame {
    let name = frame.name.clone().unwrap_or_else(|| "<unknown>".to_string());
    let Some(location) = &frame.location else {
        return StackFrame {
            presentation_hint: StackFrame::HINT_SUBTLE,
            ..StackFrame::label(depth as i64, name)
        };
    };

    if location.is_host {
        return StackFrame {
            line: conventions.line_to_client(location.from_line),
            column: location.from_col as i64,
            ..StackFrame::label(depth as i64, name)
        };
    }

    let file = debuggee.source_info(location.source).and_then(|s| s.file);
    let source = file.as_deref().map(|file| {
        let path = conventions.path_to_client(file);
        let name = Path::new(file)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| file.to_string());
        Source {
            name,
            path,
            source_reference: 0,
            presentation_hint: if depth == 0 { "emphasize" } else { "normal" },
        }
    });

    StackFrame {
        id: depth as i64,
        name,
        line: conventions.line_to_client(location.from_line),
        column: location.from_col as i64,
        end_line: Some(conventions.line_to_client(location.to_line)),
        end_column: Some(location.to_col as i64),
        presentation_hint: if source.is_some() {
            StackFrame::HINT_NORMAL
        } else {
            StackFrame::HINT_SUBTLE
        },
        source,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::debuggee::test_utils::FakeDebuggee;
    use itertools::Itertools;

    fn names(frames: &[StackFrame]) -> Vec<&str> {
        frames.iter().map(|f| f.name.as_str()).collect_vec()
    }

    #[test]
    fn test_shallow_stack() {
        let debuggee = FakeDebuggee::new(1)
            .with_source("/scripts/main.lua", 100)
            .with_stack(2);
        let stack = debuggee.call_stack();

        let (frames, total) =
            build_stack_trace(&debuggee, &stack, ClientConventions::default(), 0, 10);
        assert_eq!(names(&frames), vec!["fn0", "fn1", "(main coroutine)", "(native)"]);
        assert_eq!(total, 4);
        assert_eq!(frames.iter().map(|f| f.id).collect_vec(), vec![0, 1, 2, 3]);

        let top = &frames[0];
        assert_eq!(top.line, 10);
        let source = top.source.as_ref().unwrap();
        assert_eq!(source.name, "main.lua");
        assert_eq!(source.path, "/scripts/main.lua");
        assert_eq!(source.presentation_hint, "emphasize");
    }

    #[test]
    fn test_truncated_stack() {
        let debuggee = FakeDebuggee::new(1).with_stack(20);
        debuggee.state.lock().unwrap().coroutine = Some("worker".to_string());
        let stack = debuggee.call_stack();

        let (frames, total) =
            build_stack_trace(&debuggee, &stack, ClientConventions::default(), 0, 10);
        assert_eq!(frames.len(), 10);
        assert_eq!(total, 22);
        assert_eq!(
            names(&frames[7..]),
            vec!["(...)", "(worker)", "(native)"]
        );
        assert_eq!(frames[7].id, 20);

        let (frames, _) = build_stack_trace(&debuggee, &stack, ClientConventions::default(), 18, 10);
        assert_eq!(names(&frames), vec!["fn18", "fn19", "(worker)", "(native)"]);
    }

    #[test]
    fn test_frame_without_source_file() {
        let debuggee = FakeDebuggee::new(1).with_stack(1);
        let stack = debuggee.call_stack();

        let (frames, _) = build_stack_trace(&debuggee, &stack, ClientConventions::default(), 0, 10);
        assert!(frames[0].source.is_none());
        assert_eq!(frames[0].presentation_hint, StackFrame::HINT_SUBTLE);
    }

    #[test]
    fn test_conventions() {
        let zero_based = ClientConventions {
            lines_start_at_1: false,
            paths_are_uri: true,
        };
        assert_eq!(zero_based.line_to_client(5), 4);
        assert_eq!(zero_based.line_from_client(4), Some(5));
        assert_eq!(zero_based.line_from_client(i64::MAX), None);
        assert_eq!(zero_based.line_to_client(0), -1);
        assert_eq!(zero_based.path_to_client("/a/b.lua"), "file:///a/b.lua");
        assert_eq!(
            zero_based.path_from_client("file:///a/b.lua").as_deref(),
            Some("/a/b.lua")
        );
        assert_eq!(zero_based.path_from_client("not a uri"), None);

        let plain = ClientConventions::default();
        assert_eq!(plain.path_from_client("b.lua").as_deref(), Some("b.lua"));
    }
}
