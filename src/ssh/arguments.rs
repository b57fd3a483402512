//! Script arguments and their rendering into a single command line.

use serde::Deserialize;

use super::{ArgumentStyle, NullArgumentPolicy};

/// Ordered argument map. Keys are unique; the one entry without a key is the
/// positional argument, always rendered last.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "Vec<(Option<String>, Option<serde_json::Value>)>")]
pub struct ScriptArguments {
    entries: Vec<(Option<String>, Option<String>)>,
}

impl ScriptArguments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `key` to `value`, keeping the original position if the key exists.
    pub fn insert(&mut self, key: Option<String>, value: Option<String>) {
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    /// Named argument with a value.
    pub fn arg(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(Some(key.into()), Some(value.into()));
        self
    }

    /// Named argument without a value.
    pub fn flag(mut self, key: impl Into<String>) -> Self {
        self.insert(Some(key.into()), None);
        self
    }

    /// The key-less trailing argument.
    pub fn positional(mut self, value: impl Into<String>) -> Self {
        self.insert(None, Some(value.into()));
        self
    }

    pub fn get(&self, key: Option<&str>) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.as_deref() == key)
            .and_then(|(_, v)| v.as_deref())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn named(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.entries
            .iter()
            .filter_map(|(k, v)| k.as_deref().map(|k| (k, v.as_deref())))
    }

    fn positional_value(&self) -> Option<&str> {
        self.get(None)
    }
}

impl From<Vec<(Option<String>, Option<serde_json::Value>)>> for ScriptArguments {
    fn from(pairs: Vec<(Option<String>, Option<serde_json::Value>)>) -> Self {
        let mut args = ScriptArguments::new();
        for (key, value) in pairs {
            let text = match value {
                None | Some(serde_json::Value::Null) => None,
                Some(serde_json::Value::String(s)) => Some(s),
                Some(other) => Some(other.to_string()),
            };
            args.insert(key, text);
        }
        args
    }
}

/// One script invocation.
#[derive(Clone, Debug, Deserialize)]
pub struct ScriptRequest {
    /// Informational only, e.g. `bash` or `powershell`.
    #[serde(default)]
    pub language: String,
    pub script: String,
    #[serde(default)]
    pub arguments: Option<ScriptArguments>,
}

impl ScriptRequest {
    pub fn new(language: impl Into<String>, script: impl Into<String>) -> Self {
        Self {
            language: language.into(),
            script: script.into(),
            arguments: None,
        }
    }

    pub fn with_arguments(mut self, arguments: ScriptArguments) -> Self {
        self.arguments = Some(arguments);
        self
    }
}

/// How a style lays out named arguments.
enum Rendering {
    /// ` <prefix><key>[ <value>]` after the command.
    Flags { prefix: &'static str },
    /// `<sigil><key><operator>'<value>'; ` before the command.
    Assignments {
        sigil: &'static str,
        operator: &'static str,
    },
}

impl ArgumentStyle {
    fn rendering(self) -> Rendering {
        match self {
            ArgumentStyle::Dash => Rendering::Flags { prefix: "-" },
            ArgumentStyle::Slash => Rendering::Flags { prefix: "/" },
            ArgumentStyle::VariablesBash => Rendering::Assignments {
                sigil: "",
                operator: "=",
            },
            ArgumentStyle::VariablesPowerShell => Rendering::Assignments {
                sigil: "$",
                operator: " = ",
            },
        }
    }
}

/// Render `template` and `arguments` as one command line.
///
/// Without arguments the template is returned as is. A named argument with no
/// value is a bare flag in the flag styles; in the assignment styles
/// `null_policy` decides between `name=''` and leaving it out.
pub fn encode(
    template: &str,
    arguments: Option<&ScriptArguments>,
    style: ArgumentStyle,
    null_policy: NullArgumentPolicy,
) -> String {
    let arguments = match arguments {
        Some(a) => a,
        None => return template.to_string(),
    };

    let mut line = String::with_capacity(template.len() + 16 * arguments.len());

    match style.rendering() {
        Rendering::Flags { prefix } => {
            line.push_str(template);
            for (key, value) in arguments.named() {
                line.push(' ');
                line.push_str(prefix);
                line.push_str(key);
                if let Some(value) = value {
                    line.push(' ');
                    line.push_str(value);
                }
            }
        }
        Rendering::Assignments { sigil, operator } => {
            for (key, value) in arguments.named() {
                let quoted = match (value, null_policy) {
                    (Some(value), _) => quote_single(value),
                    (None, NullArgumentPolicy::AsEmptyString) => quote_single(""),
                    (None, NullArgumentPolicy::AsOmitted) => continue,
                };
                line.push_str(sigil);
                line.push_str(key);
                line.push_str(operator);
                line.push_str(&quoted);
                line.push_str("; ");
            }
            line.push_str(template);
        }
    }

    if let Some(positional) = arguments.positional_value() {
        line.push(' ');
        line.push_str(positional);
    }

    line
}

/// `'value'` with embedded quotes doubled.
fn quote_single(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
