// Variable and function bindings for the template engine.
//
// The registry maps (type tag, name) to a resolver. It is built once at
// startup and treated as read-only afterwards, so lookups need no locking.

use super::format_value::{FormatValue, TypeTag};
use rand::Rng;
use std::collections::HashMap;

/// Zero-argument accessor on a value of a given type.
pub type VariableFn = fn(&FormatValue) -> Option<FormatValue>;

/// Function call handler. Arguments arrive already parsed per the entry's
/// parameter spec; `None` means the call failed and the whole expression
/// degrades silently.
pub type FunctionFn = fn(&FormatValue, Vec<FormatValue>) -> Option<FormatValue>;

/// Expected type for a function parameter, used when parsing the raw
/// comma-separated argument text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgSpec {
    /// Any value; a whole-expression argument keeps its type, plain text
    /// stays text.
    Any,
    Text,
    Int,
    Float,
}

pub struct FunctionEntry {
    pub handler: FunctionFn,
    pub params: &'static [ArgSpec],
    /// When set, the last parameter absorbs any remaining unescaped commas
    /// verbatim instead of splitting on them.
    pub absorb_rest: bool,
}

pub struct FormatterRegistry {
    variables: HashMap<TypeTag, HashMap<&'static str, VariableFn>>,
    functions: HashMap<TypeTag, HashMap<&'static str, FunctionEntry>>,
}

impl FormatterRegistry {
    /// Registry with the standard variable and function set.
    pub fn standard() -> Self {
        let mut registry = Self {
            variables: HashMap::new(),
            functions: HashMap::new(),
        };

        registry.variable(TypeTag::User, "name", |v| match v {
            FormatValue::User(u) => Some(FormatValue::text(u.name.clone())),
            _ => None,
        });
        registry.variable(TypeTag::User, "tag", |v| match v {
            FormatValue::User(u) => Some(FormatValue::text(u.tag())),
            _ => None,
        });
        registry.variable(TypeTag::User, "mention", |v| match v {
            FormatValue::User(u) => Some(FormatValue::text(u.mention())),
            _ => None,
        });
        registry.variable(TypeTag::User, "id", |v| match v {
            FormatValue::User(u) => Some(FormatValue::text(u.id.to_string())),
            _ => None,
        });

        registry.variable(TypeTag::Channel, "name", |v| match v {
            FormatValue::Channel(c) => Some(FormatValue::text(c.name.clone())),
            _ => None,
        });
        registry.variable(TypeTag::Channel, "mention", |v| match v {
            FormatValue::Channel(c) => Some(FormatValue::text(c.mention())),
            _ => None,
        });
        registry.variable(TypeTag::Channel, "id", |v| match v {
            FormatValue::Channel(c) => Some(FormatValue::text(c.id.to_string())),
            _ => None,
        });

        registry.variable(TypeTag::Guild, "name", |v| match v {
            FormatValue::Guild(g) => Some(FormatValue::text(g.name.clone())),
            _ => None,
        });
        registry.variable(TypeTag::Guild, "id", |v| match v {
            FormatValue::Guild(g) => Some(FormatValue::text(g.id.to_string())),
            _ => None,
        });
        registry.variable(TypeTag::Guild, "members", |v| match v {
            FormatValue::Guild(g) => Some(FormatValue::Int(g.members as i64)),
            _ => None,
        });

        registry.variable(TypeTag::Text, "length", |v| match v {
            FormatValue::Text(s) => Some(FormatValue::Int(s.chars().count() as i64)),
            _ => None,
        });

        registry.function(
            TypeTag::Bool,
            "then",
            FunctionEntry {
                handler: then_fn,
                params: &[ArgSpec::Any],
                absorb_rest: true,
            },
        );
        registry.function(
            TypeTag::Condition,
            "else",
            FunctionEntry {
                handler: else_fn,
                params: &[ArgSpec::Any],
                absorb_rest: true,
            },
        );

        registry.function(
            TypeTag::Int,
            "equals",
            FunctionEntry {
                handler: equals_fn,
                params: &[ArgSpec::Int],
                absorb_rest: false,
            },
        );
        for tag in [TypeTag::Int, TypeTag::Float] {
            registry.function(
                tag,
                "gt",
                FunctionEntry {
                    handler: gt_fn,
                    params: &[ArgSpec::Float],
                    absorb_rest: false,
                },
            );
            registry.function(
                tag,
                "lt",
                FunctionEntry {
                    handler: lt_fn,
                    params: &[ArgSpec::Float],
                    absorb_rest: false,
                },
            );
        }

        registry.function(
            TypeTag::Text,
            "upper",
            FunctionEntry {
                handler: upper_fn,
                params: &[],
                absorb_rest: false,
            },
        );
        registry.function(
            TypeTag::Text,
            "lower",
            FunctionEntry {
                handler: lower_fn,
                params: &[],
                absorb_rest: false,
            },
        );
        registry.function(
            TypeTag::Text,
            "substring",
            FunctionEntry {
                handler: substring_fn,
                params: &[ArgSpec::Int, ArgSpec::Int],
                absorb_rest: false,
            },
        );

        registry.function(
            TypeTag::Random,
            "int",
            FunctionEntry {
                handler: random_int_fn,
                params: &[ArgSpec::Int],
                absorb_rest: false,
            },
        );

        registry
    }

    pub fn variable(&mut self, tag: TypeTag, name: &'static str, resolver: VariableFn) {
        self.variables.entry(tag).or_default().insert(name, resolver);
    }

    pub fn function(&mut self, tag: TypeTag, name: &'static str, entry: FunctionEntry) {
        self.functions.entry(tag).or_default().insert(name, entry);
    }

    pub fn get_variable(&self, tag: TypeTag, name: &str) -> Option<&VariableFn> {
        self.variables.get(&tag).and_then(|names| names.get(name))
    }

    pub fn get_function(&self, tag: TypeTag, name: &str) -> Option<&FunctionEntry> {
        self.functions.get(&tag).and_then(|names| names.get(name))
    }
}

fn then_fn(value: &FormatValue, mut args: Vec<FormatValue>) -> Option<FormatValue> {
    let FormatValue::Bool(test) = value else {
        return None;
    };
    let then = args.pop().unwrap_or_else(|| FormatValue::text(""));
    Some(FormatValue::Condition {
        test: *test,
        then: Box::new(then),
    })
}

fn else_fn(value: &FormatValue, mut args: Vec<FormatValue>) -> Option<FormatValue> {
    let FormatValue::Condition { test, then } = value else {
        return None;
    };
    let fallback = args.pop().unwrap_or_else(|| FormatValue::text(""));
    Some(if *test { (**then).clone() } else { fallback })
}

fn equals_fn(value: &FormatValue, args: Vec<FormatValue>) -> Option<FormatValue> {
    let FormatValue::Int(lhs) = value else {
        return None;
    };
    match args.first() {
        Some(FormatValue::Int(rhs)) => Some(FormatValue::Bool(lhs == rhs)),
        _ => None,
    }
}

fn gt_fn(value: &FormatValue, args: Vec<FormatValue>) -> Option<FormatValue> {
    let lhs = value.as_f64()?;
    let rhs = args.first()?.as_f64()?;
    Some(FormatValue::Bool(lhs > rhs))
}

fn lt_fn(value: &FormatValue, args: Vec<FormatValue>) -> Option<FormatValue> {
    let lhs = value.as_f64()?;
    let rhs = args.first()?.as_f64()?;
    Some(FormatValue::Bool(lhs < rhs))
}

fn upper_fn(value: &FormatValue, _args: Vec<FormatValue>) -> Option<FormatValue> {
    match value {
        FormatValue::Text(s) => Some(FormatValue::text(s.to_uppercase())),
        _ => None,
    }
}

fn lower_fn(value: &FormatValue, _args: Vec<FormatValue>) -> Option<FormatValue> {
    match value {
        FormatValue::Text(s) => Some(FormatValue::text(s.to_lowercase())),
        _ => None,
    }
}

/// Substring with negative indices counting from the end of the string.
fn substring_fn(value: &FormatValue, args: Vec<FormatValue>) -> Option<FormatValue> {
    let FormatValue::Text(s) = value else {
        return None;
    };
    let (FormatValue::Int(start), FormatValue::Int(end)) = (args.first()?, args.get(1)?) else {
        return None;
    };

    let chars: Vec<char> = s.chars().collect();
    let len = chars.len() as i64;
    let resolve = |index: i64| -> usize {
        let index = if index < 0 { len + index } else { index };
        index.clamp(0, len) as usize
    };

    let start = resolve(*start);
    let end = resolve(*end);
    if start >= end {
        return Some(FormatValue::text(""));
    }

    Some(FormatValue::text(chars[start..end].iter().collect::<String>()))
}

fn random_int_fn(value: &FormatValue, args: Vec<FormatValue>) -> Option<FormatValue> {
    if !matches!(value, FormatValue::Random) {
        return None;
    }
    match args.first() {
        Some(FormatValue::Int(limit)) if *limit >= 0 => {
            Some(FormatValue::Int(rand::thread_rng().gen_range(0..=*limit)))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookups_accept_runtime_names() {
        let registry = FormatterRegistry::standard();
        // Segment names come out of parsed template text, not literals
        let name = String::from("name");
        assert!(registry.get_variable(TypeTag::User, &name).is_some());
        assert!(registry.get_variable(TypeTag::User, "no such").is_none());

        let call = String::from("then");
        assert!(registry.get_function(TypeTag::Bool, &call).is_some());
        assert!(registry.get_function(TypeTag::Int, &call).is_none());
    }

    #[test]
    fn substring_supports_negative_indices() {
        let value = FormatValue::text("sentry");
        let out = substring_fn(&value, vec![FormatValue::Int(0), FormatValue::Int(-3)]).unwrap();
        assert_eq!(out, FormatValue::text("sen"));

        let out = substring_fn(&value, vec![FormatValue::Int(-3), FormatValue::Int(6)]).unwrap();
        assert_eq!(out, FormatValue::text("try"));
    }

    #[test]
    fn else_unwraps_condition() {
        let condition = FormatValue::Condition {
            test: false,
            then: Box::new(FormatValue::text("kept")),
        };
        let out = else_fn(&condition, vec![FormatValue::text("fallback")]).unwrap();
        assert_eq!(out, FormatValue::text("fallback"));
    }

    #[test]
    fn random_int_stays_in_range() {
        for _ in 0..50 {
            let out = random_int_fn(&FormatValue::Random, vec![FormatValue::Int(5)]).unwrap();
            let FormatValue::Int(v) = out else {
                panic!("expected int");
            };
            assert!((0..=5).contains(&v));
        }
    }
}
