//! Script values as the interpreter hands them to the adapter.

use itertools::Itertools;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Nil,
    /// Absence of a value (unassigned watch, missing tuple slot).
    Void,
    Boolean(bool),
    Number(f64),
    String(String),
    Function(FunctionInfo),
    HostFunction { name: Option<String> },
    Table(Table),
    UserData(UserData),
    Coroutine(CoroutineInfo),
    Tuple(Vec<Value>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionInfo {
    pub entry_point: u32,
    pub upvalues: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    /// Interpreter-wide reference id.
    pub id: u64,
    pub metatable: Option<u64>,
    /// Table not owned by any script (shared between script instances).
    pub prime: bool,
    pub length: usize,
    pub entries: Vec<(Value, Value)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UserData {
    pub descriptor: Option<String>,
    pub object: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CoroutineInfo {
    pub state: String,
    pub kind: String,
    pub auto_yield_counter: u64,
}

impl Value {
    /// Type tag reported in `type` fields of variables and evaluate results.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Void => "void",
            Value::Boolean(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Function(_) => "function",
            Value::HostFunction { .. } => "hostfunction",
            Value::Table(_) => "table",
            Value::UserData(_) => "userdata",
            Value::Coroutine(_) => "thread",
            Value::Tuple(_) => "tuple",
        }
    }

    /// Value has children a client may expand.
    pub fn is_structured(&self) -> bool {
        matches!(self, Value::Table(_) | Value::Tuple(_))
    }

    /// Short rendering used in variable rows, strings quoted.
    pub fn debug_string(&self) -> String {
        match self {
            Value::String(s) => format!("{s:?}"),
            Value::Tuple(items) => format!("({})", items.iter().map(Value::debug_string).join(", ")),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => f.write_str("nil"),
            Value::Void => f.write_str("void"),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => write!(f, "{}", *n as i64),
            Value::Number(n) => write!(f, "{n}"),
            Value::String(s) => f.write_str(s),
            Value::Function(func) => write!(f, "function: {:08X}", func.entry_point),
            Value::HostFunction { name } => {
                write!(f, "hostfunction: {}", name.as_deref().unwrap_or("(unnamed)"))
            }
            Value::Table(t) => write!(f, "table: #{}", t.id),
            Value::UserData(ud) => {
                write!(f, "userdata: {}", ud.descriptor.as_deref().unwrap_or("?"))
            }
            Value::Coroutine(co) => write!(f, "thread: {}", co.state),
            Value::Tuple(items) => write!(f, "({})", items.iter().join(", ")),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_debug_string() {
        struct TestCase {
            value: Value,
            expected: &'static str,
        }

        let cases = [
            TestCase {
                value: Value::Number(3.0),
                expected: "3",
            },
            TestCase {
                value: Value::Number(0.5),
                expected: "0.5",
            },
            TestCase {
                value: Value::String("a\"b".to_string()),
                expected: "\"a\\\"b\"",
            },
            TestCase {
                value: Value::Tuple(vec![Value::Nil, Value::String("x".to_string())]),
                expected: "(nil, \"x\")",
            },
            TestCase {
                value: Value::Function(FunctionInfo {
                    entry_point: 0x1f,
                    upvalues: 0,
                }),
                expected: "function: 0000001F",
            },
        ];

        for tc in cases {
            assert_eq!(tc.value.debug_string(), tc.expected);
        }
    }
}
