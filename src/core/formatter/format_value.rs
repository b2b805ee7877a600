// Typed values flowing through the template engine.
//
// The original idea is a `{path.to.value(args)}` language resolved against
// "whatever type the previous value turned out to be". We model that with a
// closed enum plus a `TypeTag` so variable/function lookup can switch on the
// current value's tag instead of real dynamic dispatch.

use std::collections::HashMap;

/// Discriminant used as the registry key for variables and functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeTag {
    Text,
    Int,
    Float,
    Bool,
    Colour,
    Map,
    Condition,
    Random,
    User,
    Channel,
    Guild,
}

/// A user bound into a template (e.g. the offending message author).
#[derive(Debug, Clone, PartialEq)]
pub struct UserContext {
    pub id: u64,
    pub name: String,
    /// Legacy discriminator, `None` for migrated accounts.
    pub discriminator: Option<u16>,
}

impl UserContext {
    pub fn tag(&self) -> String {
        match self.discriminator {
            Some(d) => format!("{}#{:04}", self.name, d),
            None => self.name.clone(),
        }
    }

    pub fn mention(&self) -> String {
        format!("<@{}>", self.id)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelContext {
    pub id: u64,
    pub name: String,
}

impl ChannelContext {
    pub fn mention(&self) -> String {
        format!("<#{}>", self.id)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GuildContext {
    pub id: u64,
    pub name: String,
    pub members: u64,
}

/// A value produced while walking a template path.
#[derive(Debug, Clone, PartialEq)]
pub enum FormatValue {
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    /// 24-bit RGB colour, rendered as hex.
    Colour(u32),
    /// Ad-hoc nested bindings such as the `regex.*` table.
    Map(HashMap<String, FormatValue>),
    /// Produced by `bool.then(x)`; unwrapped by a trailing `.else(y)`.
    Condition { test: bool, then: Box<FormatValue> },
    /// RNG handle backing `random.int(n)`.
    Random,
    User(UserContext),
    Channel(ChannelContext),
    Guild(GuildContext),
}

impl FormatValue {
    pub fn text(value: impl Into<String>) -> Self {
        FormatValue::Text(value.into())
    }

    pub fn tag(&self) -> TypeTag {
        match self {
            FormatValue::Text(_) => TypeTag::Text,
            FormatValue::Int(_) => TypeTag::Int,
            FormatValue::Float(_) => TypeTag::Float,
            FormatValue::Bool(_) => TypeTag::Bool,
            FormatValue::Colour(_) => TypeTag::Colour,
            FormatValue::Map(_) => TypeTag::Map,
            FormatValue::Condition { .. } => TypeTag::Condition,
            FormatValue::Random => TypeTag::Random,
            FormatValue::User(_) => TypeTag::User,
            FormatValue::Channel(_) => TypeTag::Channel,
            FormatValue::Guild(_) => TypeTag::Guild,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FormatValue::Int(v) => Some(*v as f64),
            FormatValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Natural string form used when a resolved value is substituted back
    /// into the surrounding text.
    pub fn render(&self) -> String {
        match self {
            FormatValue::Text(s) => s.clone(),
            FormatValue::Int(v) => v.to_string(),
            FormatValue::Float(v) => {
                // Mathematically integral floats render bare, no trailing .0
                if v.fract() == 0.0 && v.is_finite() {
                    format!("{}", *v as i64)
                } else {
                    v.to_string()
                }
            }
            FormatValue::Bool(b) => b.to_string(),
            FormatValue::Colour(c) => format!("#{:06x}", c & 0xff_ff_ff),
            FormatValue::Map(_) => String::new(),
            FormatValue::Condition { test, then } => {
                if *test {
                    then.render()
                } else {
                    String::new()
                }
            }
            FormatValue::Random => String::new(),
            FormatValue::User(u) => u.mention(),
            FormatValue::Channel(c) => c.mention(),
            FormatValue::Guild(g) => g.name.clone(),
        }
    }
}
