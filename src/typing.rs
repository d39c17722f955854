// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use core::fmt;
use core::str::FromStr;

use anyhow::{bail, Result};
use bitflags::bitflags;

bitflags! {
    /// Type taxonomy shared by expression nodes and evaluator signatures.
    ///
    /// The low bits are value categories, the high bits are modifiers that
    /// describe how a node takes part in a call rather than what it yields.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ValueTypeFlags: u32 {
        const BOOLEAN      = 1 << 0;
        const NUMBER       = 1 << 1;
        const TEXT         = 1 << 2;
        const SELECTOR     = 1 << 3;
        const KEYWORD      = 1 << 4;
        const SET          = 1 << 5;
        const FUNCTION     = 1 << 6;
        const QUERY_STRING = 1 << 7;

        const OPTIONAL     = 1 << 16;
        const VARIADIC     = 1 << 17;
        const EXPANDABLE   = 1 << 18;
        const GROUP        = 1 << 19;

        const LITERAL = Self::BOOLEAN.bits() | Self::NUMBER.bits() | Self::TEXT.bits();
        const ITERABLE = Self::SET.bits() | Self::FUNCTION.bits() | Self::QUERY_STRING.bits();
        const ANY_VALUE = Self::LITERAL.bits() | Self::SELECTOR.bits() | Self::KEYWORD.bits();
        const ANY_EXPRESSION = Self::ANY_VALUE.bits() | Self::ITERABLE.bits();
    }
}

const CATEGORY_NAMES: &[(ValueTypeFlags, &str)] = &[
    (ValueTypeFlags::BOOLEAN, "Boolean"),
    (ValueTypeFlags::NUMBER, "Number"),
    (ValueTypeFlags::TEXT, "Text"),
    (ValueTypeFlags::SELECTOR, "Selector"),
    (ValueTypeFlags::KEYWORD, "Keyword"),
    (ValueTypeFlags::SET, "Set"),
    (ValueTypeFlags::FUNCTION, "Function"),
    (ValueTypeFlags::QUERY_STRING, "QueryString"),
];

const UNION_NAMES: &[(ValueTypeFlags, &str)] = &[
    (ValueTypeFlags::LITERAL, "Literal"),
    (ValueTypeFlags::ITERABLE, "Iterable"),
    (ValueTypeFlags::ANY_VALUE, "AnyValue"),
    (ValueTypeFlags::ANY_EXPRESSION, "AnyExpression"),
];

impl ValueTypeFlags {
    /// Membership test used by signature checks.
    ///
    /// Two empty sets match each other; otherwise the sets must intersect.
    pub fn matches(self, other: ValueTypeFlags) -> bool {
        if self.is_empty() && other.is_empty() {
            return true;
        }
        self.intersects(other)
    }

    /// Value categories only, modifiers stripped.
    pub fn kinds(self) -> ValueTypeFlags {
        self & ValueTypeFlags::ANY_EXPRESSION
    }

    pub fn is_expandable(self) -> bool {
        self.contains(ValueTypeFlags::EXPANDABLE)
    }
}

impl fmt::Display for ValueTypeFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kinds = self.kinds();
        if kinds.is_empty() {
            return f.write_str("None");
        }
        // Prefer the widest named union that describes the set exactly.
        for (flag, name) in UNION_NAMES.iter().rev() {
            if kinds == *flag {
                return f.write_str(name);
            }
        }
        let names: Vec<&str> = CATEGORY_NAMES
            .iter()
            .filter(|(flag, _)| kinds.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        f.write_str(&names.join("|"))
    }
}

impl FromStr for ValueTypeFlags {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut flags = ValueTypeFlags::empty();
        for part in s.split('|') {
            let part = part.trim();
            let found = CATEGORY_NAMES
                .iter()
                .chain(UNION_NAMES.iter())
                .find(|(_, name)| name.eq_ignore_ascii_case(part));
            match found {
                Some((flag, _)) => flags |= *flag,
                None => bail!("unknown type `{part}`"),
            }
        }
        Ok(flags)
    }
}

/// Bare words understood as keyword literals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    None,
    Asc,
    Desc,
    Any,
    All,
    Keep,
    Sort,
}

impl Keyword {
    pub fn as_str(&self) -> &'static str {
        match self {
            Keyword::None => "none",
            Keyword::Asc => "asc",
            Keyword::Desc => "desc",
            Keyword::Any => "any",
            Keyword::All => "all",
            Keyword::Keep => "keep",
            Keyword::Sort => "sort",
        }
    }
}

impl FromStr for Keyword {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "none" => Keyword::None,
            "asc" => Keyword::Asc,
            "desc" => Keyword::Desc,
            "any" => Keyword::Any,
            "all" => Keyword::All,
            "keep" => Keyword::Keep,
            "sort" => Keyword::Sort,
            _ => bail!("`{s}` is not a keyword"),
        })
    }
}

/// One positional parameter of an evaluator signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Argument {
    pub types: ValueTypeFlags,
    pub variadic: bool,
    pub optional: bool,
}

impl Argument {
    pub const fn new(types: ValueTypeFlags) -> Self {
        Self {
            types,
            variadic: false,
            optional: false,
        }
    }

    pub const fn optional(types: ValueTypeFlags) -> Self {
        Self {
            types,
            variadic: false,
            optional: true,
        }
    }

    pub const fn variadic(types: ValueTypeFlags) -> Self {
        Self {
            types,
            variadic: true,
            optional: false,
        }
    }
}

impl fmt::Display for Argument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.types)?;
        if self.optional {
            f.write_str("?")?;
        }
        if self.variadic {
            f.write_str("...")?;
        }
        Ok(())
    }
}

/// An ordered argument list accepted by an evaluator.
///
/// Structural rules (single trailing variadic, optional suffix, every
/// argument typed as an expression) are enforced at registration by
/// [`crate::type_checker::validate_signature`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Signature {
    args: Vec<Argument>,
}

impl Signature {
    pub fn new(args: Vec<Argument>) -> Self {
        Self { args }
    }

    pub fn arguments(&self) -> &[Argument] {
        &self.args
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    pub fn mandatory_argument_count(&self) -> usize {
        self.args.iter().filter(|a| !a.optional).count()
    }

    /// True when the last argument absorbs any overflow positions.
    pub fn is_variadic(&self) -> bool {
        self.args.last().map(|a| a.variadic).unwrap_or(false)
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let args: Vec<String> = self.args.iter().map(|a| a.to_string()).collect();
        f.write_str(&args.join(", "))
    }
}

/// Parses the text form `Number, Text?` / `Iterable...`.
impl FromStr for Signature {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(Signature::default());
        }
        let mut args = vec![];
        for part in s.split(',') {
            let mut part = part.trim();
            let mut arg = Argument::new(ValueTypeFlags::empty());
            if let Some(p) = part.strip_suffix("...") {
                arg.variadic = true;
                part = p.trim_end();
            }
            if let Some(p) = part.strip_suffix('?') {
                arg.optional = true;
                part = p.trim_end();
            }
            if part.is_empty() {
                bail!("missing argument type in signature `{s}`");
            }
            arg.types = part.parse()?;
            args.push(arg);
        }
        Ok(Signature { args })
    }
}
