use crate::dap::protocol::Variable;
use crate::debuggee::value::{Table, Value};
use crate::debuggee::{ScopeKind, Watch};
use crate::session::var_ref::{VarRef, MAX_SLOT};
use itertools::Itertools;
use std::collections::HashMap;

/// Structured values handed out to the client, addressed by slot.
///
/// Slots come from a counter that survives [`ValueTable::clear`], so a handle
/// issued for one call stack never resolves to a value of the next one. The
/// counter never restarts: once the slot space is used up, values are no
/// longer registered for expansion in this session.
#[derive(Debug)]
pub struct ValueTable {
    values: HashMap<u32, Value>,
    next_slot: u32,
}

impl Default for ValueTable {
    fn default() -> Self {
        Self {
            values: HashMap::new(),
            next_slot: 1,
        }
    }
}

impl ValueTable {
    /// Store a value, `None` when the session ran out of slots.
    pub fn insert(&mut self, value: Value) -> Option<u32> {
        if self.next_slot > MAX_SLOT {
            return None;
        }
        let slot = self.next_slot;
        self.next_slot += 1;
        self.values.insert(slot, value);
        Some(slot)
    }

    pub fn get(&self, slot: u32) -> Option<&Value> {
        self.values.get(&slot)
    }

    /// Start a new generation.
    pub fn clear(&mut self) {
        self.values.clear();
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Render one named value, registering it for expansion if it has children.
pub fn into_variable(
    table: &mut ValueTable,
    scope: ScopeKind,
    frame: usize,
    name: &str,
    value: &Value,
) -> Variable {
    let mut var = Variable::leaf(name, value.debug_string(), Some(value.type_name()));
    if value.is_structured() {
        let handle = table
            .insert(value.clone())
            .and_then(|slot| VarRef::new(scope, frame, slot));
        match handle {
            Some(var_ref) => var.variables_reference = var_ref.encode(),
            None => log::warn!(target: "dap", "value table exhausted, `{name}` is not expandable"),
        }
    }
    var
}

pub fn watches_into_variables(
    table: &mut ValueTable,
    scope: ScopeKind,
    frame: usize,
    watches: &[Watch],
) -> Vec<Variable> {
    watches
        .iter()
        .map(|w| match &w.value {
            Some(value) => into_variable(table, scope, frame, &w.name, value),
            None => Variable::leaf(&w.name, "(undefined)", None),
        })
        .collect_vec()
}

/// Rows describing the content of a value.
pub fn expand(table: &mut ValueTable, scope: ScopeKind, frame: usize, value: &Value) -> Vec<Variable> {
    match value {
        Value::Table(t) => expand_table(table, scope, frame, t),
        Value::Tuple(items) => {
            let mut vars = vec![value_row(value)];
            vars.extend(
                items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| into_variable(table, scope, frame, &format!("[{i}]"), item)),
            );
            vars
        }
        _ => {
            let mut vars = vec![value_row(value)];
            vars.extend(detail_rows(value));
            vars
        }
    }
}

fn value_row(value: &Value) -> Variable {
    Variable::leaf("(value)", value.to_string(), Some(value.type_name()))
}

fn expand_table(table: &mut ValueTable, scope: ScopeKind, frame: usize, t: &Table) -> Vec<Variable> {
    let kind = match (t.metatable.is_some(), t.prime) {
        (true, true) => "prime table with metatable",
        (true, false) => "table with metatable",
        (false, true) => "prime table",
        (false, false) => "table",
    };

    let mut vars = vec![Variable::leaf("(table #id)", t.id.to_string(), Some(kind))];
    if let Some(meta) = t.metatable {
        vars.push(Variable::leaf("(metatable #id)", meta.to_string(), Some("table")));
    }
    vars.push(Variable::leaf("(length)", t.length.to_string(), Some("number")));

    for (key, value) in &t.entries {
        let name = format!("[{}]", key.debug_string());
        vars.push(into_variable(table, scope, frame, &name, value));
    }
    vars
}

fn detail_rows(value: &Value) -> Vec<Variable> {
    match value {
        Value::Function(func) => vec![
            Variable::leaf("(address)", format!("{:08X}", func.entry_point), None),
            Variable::leaf("(upvalues)", func.upvalues.to_string(), None),
        ],
        Value::HostFunction { name } => vec![Variable::leaf(
            "(name)",
            name.as_deref().unwrap_or("(unnamed)"),
            None,
        )],
        Value::UserData(ud) => vec![
            match &ud.descriptor {
                Some(d) => Variable::leaf("(descriptor)", d.as_str(), None),
                None => Variable::leaf("(descriptor)", "null!", Some("nil")),
            },
            Variable::leaf(
                "(native object)",
                ud.object.as_deref().unwrap_or("(null)"),
                None,
            ),
        ],
        Value::Coroutine(co) => vec![
            Variable::leaf("(coroutine state)", co.state.as_str(), None),
            Variable::leaf("(coroutine type)", co.kind.as_str(), None),
            Variable::leaf("(auto-yield counter)", co.auto_yield_counter.to_string(), None),
        ],
        _ => vec![],
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::debuggee::value::FunctionInfo;

    fn table(id: u64, entries: Vec<(Value, Value)>) -> Value {
        Value::Table(Table {
            id,
            metatable: None,
            prime: false,
            length: entries.len(),
            entries,
        })
    }

    #[test]
    fn test_slots_not_reused_across_generations() {
        let mut values = ValueTable::default();
        assert_eq!(values.insert(Value::Nil), Some(1));
        assert_eq!(values.insert(Value::Nil), Some(2));

        values.clear();
        assert!(values.is_empty());
        assert_eq!(values.get(1), None);
        assert_eq!(values.insert(Value::Boolean(true)), Some(3));
        assert_eq!(values.get(3), Some(&Value::Boolean(true)));
    }

    #[test]
    fn test_exhausted_table() {
        let mut values = ValueTable {
            values: HashMap::new(),
            next_slot: MAX_SLOT,
        };
        assert_eq!(values.insert(Value::Nil), Some(MAX_SLOT));
        assert_eq!(values.insert(Value::Nil), None);

        let var = into_variable(&mut values, ScopeKind::Local, 0, "t", &table(1, vec![]));
        assert_eq!(var.variables_reference, 0);

        // a new generation does not recycle handles of the old one
        values.clear();
        assert_eq!(values.insert(Value::Nil), None);
        assert_eq!(values.get(MAX_SLOT), None);
        assert_eq!(values.get(1), None);
    }

    #[test]
    fn test_scalar_is_leaf() {
        let mut values = ValueTable::default();
        let var = into_variable(&mut values, ScopeKind::Local, 2, "n", &Value::Number(42.0));
        assert_eq!(var.value, "42");
        assert_eq!(var.type_field.as_deref(), Some("number"));
        assert_eq!(var.variables_reference, 0);
        assert!(values.is_empty());
    }

    #[test]
    fn test_expand_nested_table() {
        let mut values = ValueTable::default();
        let inner = table(2, vec![]);
        let outer = table(
            1,
            vec![
                (Value::String("x".to_string()), Value::Number(1.0)),
                (Value::Number(1.0), inner.clone()),
            ],
        );

        let var = into_variable(&mut values, ScopeKind::Closure, 3, "outer", &outer);
        let var_ref = VarRef::decode(var.variables_reference).unwrap();
        assert_eq!(var_ref.scope, ScopeKind::Closure);
        assert_eq!(var_ref.frame, 3);

        let stored = values.get(var_ref.slot).unwrap().clone();
        let rows = expand(&mut values, var_ref.scope, var_ref.frame, &stored);
        let names = rows.iter().map(|v| v.name.as_str()).collect_vec();
        assert_eq!(names, vec!["(table #id)", "(length)", "[\"x\"]", "[1]"]);
        assert_eq!(rows[0].type_field.as_deref(), Some("table"));
        assert_eq!(rows[2].variables_reference, 0);

        let nested = VarRef::decode(rows[3].variables_reference).unwrap();
        assert_ne!(nested.slot, var_ref.slot);
        assert_eq!(values.get(nested.slot), Some(&inner));
    }

    #[test]
    fn test_expand_scalars() {
        struct TestCase {
            value: Value,
            names: Vec<&'static str>,
        }

        let cases = [
            TestCase {
                value: Value::Nil,
                names: vec!["(value)"],
            },
            TestCase {
                value: Value::Function(FunctionInfo {
                    entry_point: 16,
                    upvalues: 2,
                }),
                names: vec!["(value)", "(address)", "(upvalues)"],
            },
            TestCase {
                value: Value::HostFunction { name: None },
                names: vec!["(value)", "(name)"],
            },
            TestCase {
                value: Value::Tuple(vec![Value::Nil, Value::Boolean(false)]),
                names: vec!["(value)", "[0]", "[1]"],
            },
        ];

        for tc in cases {
            let mut values = ValueTable::default();
            let rows = expand(&mut values, ScopeKind::Global, 0, &tc.value);
            assert_eq!(rows.iter().map(|v| v.name.as_str()).collect_vec(), tc.names);
        }
    }
}
