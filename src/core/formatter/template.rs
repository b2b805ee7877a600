// Template rendering: `{path.to.value(args)}` expressions resolved against
// bound contexts.
//
// Failure semantics are deliberately silent: an unmatched brace or an
// unresolvable path leaves the original substring untouched and never
// surfaces an error to the caller. Moderation messages are operator-supplied,
// so a typo must degrade to literal text rather than break the pipeline.

use super::format_value::{
    ChannelContext, FormatValue, GuildContext, TypeTag, UserContext,
};
use super::registry::{ArgSpec, FormatterRegistry, FunctionEntry};
use std::collections::HashMap;

/// Builder over a template string and its root bindings.
pub struct Formatter<'r> {
    registry: &'r FormatterRegistry,
    template: String,
    bindings: HashMap<String, FormatValue>,
}

impl<'r> Formatter<'r> {
    pub fn new(registry: &'r FormatterRegistry, template: impl Into<String>) -> Self {
        let mut bindings = HashMap::new();
        bindings.insert("random".to_string(), FormatValue::Random);
        Self {
            registry,
            template: template.into(),
            bindings,
        }
    }

    pub fn bind(mut self, key: impl Into<String>, value: FormatValue) -> Self {
        self.bindings.insert(key.into(), value);
        self
    }

    pub fn user(self, user: UserContext) -> Self {
        self.bind("user", FormatValue::User(user))
    }

    pub fn channel(self, channel: ChannelContext) -> Self {
        self.bind("channel", FormatValue::Channel(channel))
    }

    pub fn guild(self, guild: GuildContext) -> Self {
        self.bind("server", FormatValue::Guild(guild))
    }

    pub fn format(&self) -> String {
        render(&self.template, &self.bindings, self.registry)
    }
}

/// Render a template against the given root bindings.
pub fn render(
    template: &str,
    bindings: &HashMap<String, FormatValue>,
    registry: &FormatterRegistry,
) -> String {
    let chars: Vec<char> = template.chars().collect();
    let mut out = String::with_capacity(template.len());
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        // `\{` and `\}` are literal braces; `\\` is a literal backslash.
        if c == '\\' && i + 1 < chars.len() && matches!(chars[i + 1], '{' | '}' | '\\') {
            out.push(chars[i + 1]);
            i += 2;
            continue;
        }

        if c == '{' {
            if let Some(close) = find_matching_brace(&chars, i) {
                let inner: String = chars[i + 1..close].iter().collect();
                match resolve_path(&inner, bindings, registry) {
                    Some(value) => out.push_str(&value.render()),
                    // Dead expression: keep the span verbatim, escapes intact
                    None => out.extend(&chars[i..=close]),
                }
                i = close + 1;
                continue;
            }
            // No matching close brace; fall through and emit literally
        }

        out.push(c);
        i += 1;
    }

    out
}

/// Parse a template fragment into a typed value.
///
/// A bare `{...}` spanning the whole input whose resolved type matches the
/// expectation is passed through as-is, which lets templated fields act as
/// typed arguments to other functions. Anything else is rendered to text and
/// parsed.
pub fn parse_typed(
    text: &str,
    expected: ArgSpec,
    bindings: &HashMap<String, FormatValue>,
    registry: &FormatterRegistry,
) -> Option<FormatValue> {
    if let Some(inner) = whole_expression(text) {
        if let Some(value) = resolve_path(inner, bindings, registry) {
            let matches = match expected {
                ArgSpec::Any => true,
                ArgSpec::Text => value.tag() == TypeTag::Text,
                ArgSpec::Int => value.tag() == TypeTag::Int,
                ArgSpec::Float => matches!(value.tag(), TypeTag::Int | TypeTag::Float),
            };
            if matches {
                return Some(value);
            }
        }
    }

    let rendered = render(text, bindings, registry);
    match expected {
        ArgSpec::Any | ArgSpec::Text => Some(FormatValue::Text(rendered)),
        ArgSpec::Int => rendered.trim().parse::<i64>().ok().map(FormatValue::Int),
        ArgSpec::Float => rendered.trim().parse::<f64>().ok().map(FormatValue::Float),
    }
}

/// Returns the inner expression when the whole input is a single `{...}` span.
fn whole_expression(text: &str) -> Option<&str> {
    let chars: Vec<char> = text.chars().collect();
    if chars.first() != Some(&'{') {
        return None;
    }
    let close = find_matching_brace(&chars, 0)?;
    if close + 1 != chars.len() {
        return None;
    }
    // Slice by byte offsets of the known ASCII braces
    Some(&text[1..text.len() - 1])
}

/// Index of the `}` closing the `{` at `open`, honoring escapes and nesting.
fn find_matching_brace(chars: &[char], open: usize) -> Option<usize> {
    let mut depth = 1;
    let mut j = open + 1;
    while j < chars.len() {
        match chars[j] {
            '\\' => j += 1,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(j);
                }
            }
            _ => {}
        }
        j += 1;
    }
    None
}

/// Walk a dot-separated path, resolving each segment against the current
/// value's type. Any unresolvable segment kills the whole expression.
fn resolve_path(
    expr: &str,
    bindings: &HashMap<String, FormatValue>,
    registry: &FormatterRegistry,
) -> Option<FormatValue> {
    let segments = split_unescaped(expr, '.');
    if segments.is_empty() {
        return None;
    }

    let mut value: Option<FormatValue> = None;
    for segment in segments {
        let next = match &value {
            None => resolve_root(&segment, bindings)?,
            Some(current) => resolve_segment(current, &segment, bindings, registry)?,
        };
        value = Some(next);
    }

    value
}

fn resolve_root(segment: &str, bindings: &HashMap<String, FormatValue>) -> Option<FormatValue> {
    // No function calls at the root; the first segment is always a binding
    let (name, args) = split_call(segment);
    if args.is_some() {
        return None;
    }
    bindings.get(&name).cloned()
}

fn resolve_segment(
    current: &FormatValue,
    segment: &str,
    bindings: &HashMap<String, FormatValue>,
    registry: &FormatterRegistry,
) -> Option<FormatValue> {
    let (name, args) = split_call(segment);

    match args {
        Some(raw_args) => {
            let entry = registry.get_function(current.tag(), &name)?;
            let parsed = parse_arguments(&raw_args, entry, bindings, registry)?;
            (entry.handler)(current, parsed)
        }
        None => {
            // Maps resolve any segment by key; other types go through the
            // registered accessors for their tag
            if let FormatValue::Map(map) = current {
                return map.get(&name).cloned();
            }
            let variable = registry.get_variable(current.tag(), &name)?;
            variable(current)
        }
    }
}

/// Split a segment into its name and, for calls, the raw argument text.
fn split_call(segment: &str) -> (String, Option<String>) {
    let chars: Vec<char> = segment.chars().collect();
    let mut open = None;
    let mut j = 0;
    while j < chars.len() {
        match chars[j] {
            '\\' => j += 1,
            '(' => {
                open = Some(j);
                break;
            }
            _ => {}
        }
        j += 1;
    }

    let Some(open) = open else {
        return (unescape(segment), None);
    };

    // The call must close at the end of the segment
    let mut close = None;
    let mut k = chars.len();
    while k > open {
        k -= 1;
        if chars[k] == ')' && (k == 0 || chars[k - 1] != '\\') {
            close = Some(k);
            break;
        }
    }

    let Some(close) = close else {
        return (unescape(segment), None);
    };

    let name: String = chars[..open].iter().collect();
    let args: String = chars[open + 1..close].iter().collect();
    (unescape(&name), Some(args))
}

fn parse_arguments(
    raw: &str,
    entry: &FunctionEntry,
    bindings: &HashMap<String, FormatValue>,
    registry: &FormatterRegistry,
) -> Option<Vec<FormatValue>> {
    if entry.params.is_empty() {
        return Some(Vec::new());
    }

    let slots = if entry.params.len() == 1 && entry.absorb_rest {
        vec![raw.to_string()]
    } else {
        let mut pieces = split_unescaped(raw, ',');
        if entry.absorb_rest {
            if pieces.len() < entry.params.len() {
                return None;
            }
            let rest = pieces.split_off(entry.params.len() - 1).join(",");
            pieces.push(rest);
            pieces
        } else {
            if pieces.len() != entry.params.len() {
                return None;
            }
            pieces
        }
    };

    let mut args = Vec::with_capacity(slots.len());
    for (slot, spec) in slots.iter().zip(entry.params) {
        args.push(parse_typed(&unescape_char(slot, ','), *spec, bindings, registry)?);
    }
    Some(args)
}

/// Split on an unescaped delimiter at zero paren/brace depth, keeping escape
/// sequences intact inside the pieces.
fn split_unescaped(input: &str, delimiter: char) -> Vec<String> {
    let chars: Vec<char> = input.chars().collect();
    let mut pieces = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\\' if i + 1 < chars.len() => {
                current.push(c);
                current.push(chars[i + 1]);
                i += 2;
                continue;
            }
            '(' | '{' => depth += 1,
            ')' | '}' => depth = depth.saturating_sub(1),
            _ => {}
        }

        if c == delimiter && depth == 0 {
            pieces.push(std::mem::take(&mut current));
        } else {
            current.push(c);
        }
        i += 1;
    }
    pieces.push(current);
    pieces
}

/// Remove every escape backslash.
fn unescape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Remove escapes for one specific character only, leaving the rest intact
/// for later (recursive) rendering.
fn unescape_char(input: &str, target: char) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len());
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == '\\' && i + 1 < chars.len() && chars[i + 1] == target {
            out.push(target);
            i += 2;
        } else {
            out.push(chars[i]);
            i += 1;
        }
    }
    out
}
