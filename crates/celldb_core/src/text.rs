//! Names, cell names, views and variable values.
//!
//! Names of nodes, arcs, exports, cells and libraries are ordered in
//! natural order: runs of ASCII digits compare by numeric value, other
//! characters compare case-insensitively. Ties fall back to byte order so
//! that only identical strings compare equal.

use crate::error::{CoreError, CoreResult};
use std::cmp::Ordering;
use std::fmt;
use std::iter::Peekable;
use std::str::Chars;
use std::sync::Arc;

/// Compares two names in natural order (`n2 < n10`, `A < b`).
#[must_use]
pub fn compare_names(a: &str, b: &str) -> Ordering {
    let mut ac = a.chars().peekable();
    let mut bc = b.chars().peekable();
    loop {
        let (x, y) = match (ac.peek(), bc.peek()) {
            (None, None) => return a.cmp(b),
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(&x), Some(&y)) => (x, y),
        };
        if x.is_ascii_digit() && y.is_ascii_digit() {
            let da = digit_run(&mut ac);
            let db = digit_run(&mut bc);
            let ord = compare_digit_runs(&da, &db);
            if ord != Ordering::Equal {
                return ord;
            }
            continue;
        }
        let ord = x.to_ascii_lowercase().cmp(&y.to_ascii_lowercase());
        if ord != Ordering::Equal {
            return ord;
        }
        ac.next();
        bc.next();
    }
}

fn digit_run(chars: &mut Peekable<Chars<'_>>) -> String {
    let mut run = String::new();
    while let Some(&c) = chars.peek() {
        if !c.is_ascii_digit() {
            break;
        }
        run.push(c);
        chars.next();
    }
    run
}

fn compare_digit_runs(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

/// A string ordered by [`compare_names`], for use as an ordered map key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NaturalName(pub String);

impl NaturalName {
    /// Wraps a name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the wrapped name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Ord for NaturalName {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_names(&self.0, &other.0)
    }
}

impl PartialOrd for NaturalName {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Checks that an object name is usable for a node, arc or export.
pub(crate) fn check_object_name(name: &str) -> CoreResult<()> {
    if name.is_empty() {
        return Err(CoreError::invalid_name(name, "empty name"));
    }
    if name.chars().any(char::is_whitespace) {
        return Err(CoreError::invalid_name(name, "contains whitespace"));
    }
    Ok(())
}

/// The view of a cell, written in braces after the cell name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum View {
    /// No view given.
    Unknown,
    /// Mask layout (`lay`).
    Layout,
    /// Schematic (`sch`).
    Schematic,
    /// Icon (`ic`). Icons may not contain subcells.
    Icon,
    /// Documentation text (`doc`).
    Documentation,
    /// Any other view, by abbreviation.
    Other(String),
}

impl View {
    /// Returns the abbreviation used in cell names.
    #[must_use]
    pub fn abbreviation(&self) -> &str {
        match self {
            Self::Unknown => "",
            Self::Layout => "lay",
            Self::Schematic => "sch",
            Self::Icon => "ic",
            Self::Documentation => "doc",
            Self::Other(abbr) => abbr,
        }
    }

    /// Resolves an abbreviation.
    #[must_use]
    pub fn from_abbreviation(abbr: &str) -> Self {
        match abbr {
            "" => Self::Unknown,
            "lay" => Self::Layout,
            "sch" => Self::Schematic,
            "ic" => Self::Icon,
            "doc" => Self::Documentation,
            other => Self::Other(other.to_string()),
        }
    }
}

/// Name of a cell within its library: `name;version{view}`.
///
/// A version of zero means "no version given" and is not printed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CellName {
    name: String,
    version: u32,
    view: View,
}

impl CellName {
    /// Creates a cell name from its parts.
    pub fn new(name: impl Into<String>, view: View, version: u32) -> CoreResult<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(CoreError::invalid_name(name, "empty cell name"));
        }
        if let Some(c) = name
            .chars()
            .find(|c| c.is_whitespace() || matches!(c, ':' | ';' | '{' | '}'))
        {
            return Err(CoreError::invalid_name(
                name.clone(),
                format!("illegal character {c:?}"),
            ));
        }
        if let View::Other(abbr) = &view {
            if abbr.is_empty() || abbr.contains(['{', '}']) {
                return Err(CoreError::invalid_name(abbr.clone(), "illegal view"));
            }
        }
        Ok(Self {
            name,
            version,
            view,
        })
    }

    /// Parses `name`, `name{view}`, `name;version` or `name;version{view}`.
    pub fn parse(text: &str) -> CoreResult<Self> {
        let (rest, view) = match text.find('{') {
            Some(open) => {
                let Some(abbr) = text[open + 1..].strip_suffix('}') else {
                    return Err(CoreError::invalid_name(text, "unterminated view"));
                };
                (&text[..open], View::from_abbreviation(abbr))
            }
            None => (text, View::Unknown),
        };
        let (name, version) = match rest.split_once(';') {
            Some((name, version)) => {
                let version = version
                    .parse::<u32>()
                    .ok()
                    .filter(|&v| v > 0)
                    .ok_or_else(|| CoreError::invalid_name(text, "bad version"))?;
                (name, version)
            }
            None => (rest, 0),
        };
        Self::new(name, view, version)
    }

    /// Returns the base name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the version, zero when none was given.
    #[must_use]
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Returns the view.
    #[must_use]
    pub fn view(&self) -> &View {
        &self.view
    }

    /// Returns true for icon cells.
    #[must_use]
    pub fn is_icon(&self) -> bool {
        self.view == View::Icon
    }
}

impl fmt::Display for CellName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if self.version > 0 {
            write!(f, ";{}", self.version)?;
        }
        if self.view != View::Unknown {
            write!(f, "{{{}}}", self.view.abbreviation())?;
        }
        Ok(())
    }
}

/// Key of an attached variable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarKey(Arc<str>);

impl VarKey {
    /// Creates a key, rejecting empty names.
    pub fn new(name: &str) -> CoreResult<Self> {
        if name.is_empty() {
            return Err(CoreError::invalid_name(name, "empty variable key"));
        }
        Ok(Self(Arc::from(name)))
    }

    /// Returns the key name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.0
    }

    /// Returns true for parameter/attribute keys (`ATTR_` prefix).
    #[must_use]
    pub fn is_attribute(&self) -> bool {
        self.0.starts_with("ATTR_")
    }
}

impl fmt::Display for VarKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Value of an attached variable.
#[derive(Debug, Clone, PartialEq)]
pub enum VarValue {
    /// 32-bit integer.
    Int(i32),
    /// 64-bit integer.
    Long(i64),
    /// Double precision float.
    Double(f64),
    /// Boolean.
    Bool(bool),
    /// String.
    Str(String),
    /// Array of integers.
    Ints(Vec<i32>),
    /// Array of strings.
    Strs(Vec<String>),
}

/// Display attributes of a piece of text.
///
/// Stored as an opaque bit word plus a color index; only the display flag
/// is interpreted by the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TextDescriptor {
    bits: u64,
    color: i32,
}

impl TextDescriptor {
    /// Bit set when the text is displayed.
    pub const DISPLAY: u64 = 1;

    /// Descriptor with no bits set: hidden text.
    pub const EMPTY: Self = Self { bits: 0, color: 0 };

    /// Displayed text with default attributes.
    pub const DISPLAYED: Self = Self {
        bits: Self::DISPLAY,
        color: 0,
    };

    /// Creates a descriptor from raw parts.
    #[must_use]
    pub const fn new(bits: u64, color: i32) -> Self {
        Self { bits, color }
    }

    /// Returns the raw bit word.
    #[must_use]
    pub const fn bits(self) -> u64 {
        self.bits
    }

    /// Returns the color index.
    #[must_use]
    pub const fn color(self) -> i32 {
        self.color
    }

    /// Returns true when the text is displayed.
    #[must_use]
    pub const fn is_displayed(self) -> bool {
        self.bits & Self::DISPLAY != 0
    }

    /// Returns a copy with the display flag set or cleared.
    #[must_use]
    pub const fn with_displayed(self, displayed: bool) -> Self {
        let bits = if displayed {
            self.bits | Self::DISPLAY
        } else {
            self.bits & !Self::DISPLAY
        };
        Self { bits, ..self }
    }
}

/// A named value attached to a library, cell, node, arc, port or export.
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    key: VarKey,
    value: VarValue,
    descriptor: TextDescriptor,
}

impl Variable {
    /// Creates a hidden variable.
    pub fn new(key: VarKey, value: VarValue) -> Self {
        Self {
            key,
            value,
            descriptor: TextDescriptor::EMPTY,
        }
    }

    /// Returns a copy with another text descriptor.
    #[must_use]
    pub fn with_descriptor(mut self, descriptor: TextDescriptor) -> Self {
        self.descriptor = descriptor;
        self
    }

    /// Returns the key.
    #[must_use]
    pub fn key(&self) -> &VarKey {
        &self.key
    }

    /// Returns the value.
    #[must_use]
    pub fn value(&self) -> &VarValue {
        &self.value
    }

    /// Returns the text descriptor.
    #[must_use]
    pub fn descriptor(&self) -> TextDescriptor {
        self.descriptor
    }
}
