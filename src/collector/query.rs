//! Declarative counter specifications and counter path strings.
//!
//! A [`QuerySpec`] names one performance object, the instances to read and the
//! counters to register. Counter paths follow the native syntax:
//! `\Object\Counter` or `\Object(Instance)\Counter`.

use std::collections::HashMap;
use std::fmt;

/// Placeholder instance for objects without instances.
pub const INSTANCE_EMPTY: &str = "------";
/// Aggregate instance reported by multi-instance objects.
pub const INSTANCE_TOTAL: &str = "_Total";
/// Wildcard selecting every instance.
pub const INSTANCE_ALL: &str = "*";

/// Suffix of a field tag routing the native second value into the field.
const SECOND_VALUE_TAG: &str = "secondvalue";

/// One counter to register.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterSpec {
    pub name: String,
    pub second_value: bool,
    /// Counter only exists from this OS build on; "not found" below it is expected.
    pub min_build: Option<u32>,
}

impl CounterSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            second_value: false,
            min_build: None,
        }
    }

    pub fn with_second_value(mut self) -> Self {
        self.second_value = true;
        self
    }

    pub fn since_build(mut self, build: u32) -> Self {
        self.min_build = Some(build);
        self
    }

    /// Parses a field tag of the form `"<Counter Name>[,secondvalue]"`.
    pub fn from_tag(tag: &str) -> Result<Self, SpecError> {
        let mut parts = tag.split(',');
        let name = parts.next().unwrap_or_default().trim();
        if name.is_empty() {
            return Err(SpecError::new(format!("empty counter name in tag {:?}", tag)));
        }

        let mut spec = CounterSpec::new(name);
        for option in parts {
            match option.trim() {
                SECOND_VALUE_TAG => spec.second_value = true,
                other => {
                    return Err(SpecError::new(format!(
                        "unknown option {:?} in tag {:?}",
                        other, tag
                    )));
                }
            }
        }
        Ok(spec)
    }
}

/// What to collect for one performance object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuerySpec {
    pub object: String,
    pub instances: Vec<String>,
    pub counters: Vec<CounterSpec>,
}

impl QuerySpec {
    pub fn new(object: impl Into<String>) -> Self {
        Self {
            object: object.into(),
            instances: Vec::new(),
            counters: Vec::new(),
        }
    }

    pub fn instance(mut self, instance: impl Into<String>) -> Self {
        self.instances.push(instance.into());
        self
    }

    pub fn counter(mut self, counter: CounterSpec) -> Self {
        self.add_counter(counter);
        self
    }

    /// Adds a counter, merging it with an existing spec of the same name.
    ///
    /// The merged spec requests the second value if either does. It keeps a minimum
    /// build only when both declare one, taking the higher; an untagged spec
    /// always reports a missing counter.
    pub fn add_counter(&mut self, counter: CounterSpec) {
        match self.counters.iter_mut().find(|c| c.name == counter.name) {
            Some(existing) => {
                existing.second_value |= counter.second_value;
                existing.min_build = match (existing.min_build, counter.min_build) {
                    (Some(a), Some(b)) => Some(a.max(b)),
                    _ => None,
                };
            }
            None => self.counters.push(counter),
        }
    }

    /// Instances to register; the empty selector means "no instance".
    pub fn effective_instances(&self) -> Vec<String> {
        if self.instances.is_empty() {
            vec![INSTANCE_EMPTY.to_string()]
        } else {
            self.instances.clone()
        }
    }

    /// `true` when the caller explicitly asked for the `_Total` instance.
    pub fn total_requested(&self) -> bool {
        self.instances.iter().any(|i| i == INSTANCE_TOTAL)
    }

    /// `true` when the selector accepts the given instance name.
    pub fn selects(&self, instance: &str) -> bool {
        self.instances.is_empty()
            || self
                .instances
                .iter()
                .any(|i| i == INSTANCE_ALL || i == INSTANCE_EMPTY || i == instance)
    }
}

/// Builds a native counter path.
pub fn format_counter_path(object: &str, instance: &str, counter: &str) -> String {
    if instance == INSTANCE_EMPTY {
        format!("\\{}\\{}", object, counter)
    } else {
        format!("\\{}({})\\{}", object, instance, counter)
    }
}

/// Maps a native instance name to the reported one. Unnamed instances and a literal
/// wildcard become [`INSTANCE_EMPTY`].
pub fn normalize_instance(name: &str) -> &str {
    if name.is_empty() || name == INSTANCE_ALL {
        INSTANCE_EMPTY
    } else {
        name
    }
}

/// Disambiguates repeated instance names within one array as `name#1`, `name#2`, ...
#[derive(Debug, Default)]
pub struct InstanceNames {
    seen: HashMap<String, usize>,
}

impl InstanceNames {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unique(&mut self, name: &str) -> String {
        let count = self.seen.entry(name.to_string()).or_insert(0);
        let unique = if *count == 0 {
            name.to_string()
        } else {
            format!("{}#{}", name, count)
        };
        *count += 1;
        unique
    }
}

/// A parsed counter path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterPath {
    pub object: String,
    pub instance: Option<String>,
    pub counter: String,
}

impl CounterPath {
    /// Parses `\Object\Counter` or `\Object(Instance)\Counter`.
    ///
    /// The leading backslash is optional. Instance names may contain parentheses;
    /// the object name ends at the first `(`.
    pub fn parse(path: &str) -> Result<Self, SpecError> {
        let trimmed = path.trim();
        let trimmed = trimmed.strip_prefix('\\').unwrap_or(trimmed);

        let (object_part, counter) = trimmed
            .rsplit_once('\\')
            .ok_or_else(|| SpecError::new(format!("missing counter name in {:?}", path)))?;

        if counter.is_empty() {
            return Err(SpecError::new(format!("empty counter name in {:?}", path)));
        }

        let (object, instance) = match object_part.find('(') {
            Some(open) => {
                let inner = object_part[open + 1..]
                    .strip_suffix(')')
                    .ok_or_else(|| SpecError::new(format!("unclosed instance in {:?}", path)))?;
                (&object_part[..open], Some(inner.to_string()))
            }
            None => (object_part, None),
        };

        if object.is_empty() {
            return Err(SpecError::new(format!("empty object name in {:?}", path)));
        }

        Ok(Self {
            object: object.to_string(),
            instance,
            counter: counter.to_string(),
        })
    }
}

impl fmt::Display for CounterPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let instance = self.instance.as_deref().unwrap_or(INSTANCE_EMPTY);
        f.write_str(&format_counter_path(&self.object, instance, &self.counter))
    }
}

/// Groups parsed paths into one [`QuerySpec`] per object, in first-seen order.
pub fn group_paths(paths: &[CounterPath]) -> Vec<QuerySpec> {
    let mut specs: Vec<QuerySpec> = Vec::new();
    for path in paths {
        let index = match specs.iter().position(|s| s.object == path.object) {
            Some(index) => index,
            None => {
                specs.push(QuerySpec::new(path.object.clone()));
                specs.len() - 1
            }
        };
        let spec = &mut specs[index];
        if let Some(instance) = &path.instance
            && !spec.instances.contains(instance)
        {
            spec.instances.push(instance.clone());
        }
        spec.add_counter(CounterSpec::new(path.counter.clone()));
    }
    specs
}

/// Malformed counter path or field tag.
#[derive(Debug, Clone, PartialEq)]
pub struct SpecError {
    pub message: String,
}

impl SpecError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self {
            message: msg.into(),
        }
    }
}

impl fmt::Display for SpecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid counter spec: {}", self.message)
    }
}

impl std::error::Error for SpecError {}
