//! Composite type name parsing.
//!
//! Names handed to [`crate::metadata::typesystem::TypeRegistry::resolve`] may wrap a base name
//! in array markers (`T[]`, `T[,]`), by-reference markers (`T&`) and generic argument lists
//! (`T<A,B>`), nested arbitrarily, optionally followed by `, Scope` naming the module expected
//! to define the base type. Parsing strips the outermost marker first, which is what lets the
//! registry resolve the base before wrapping it.

use crate::{Error, Result};

/// A parsed composite type name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeName {
    /// A plain full name
    Simple {
        /// Full name, `Namespace.Name`
        name: String,
        /// Module expected to define the type
        scope: Option<String>,
    },
    /// A generic instantiation
    Generic {
        /// Open definition
        definition: Box<TypeName>,
        /// Actual arguments
        args: Vec<TypeName>,
    },
    /// An array of the given rank
    Array {
        /// Element type
        element: Box<TypeName>,
        /// Number of dimensions
        rank: u8,
    },
    /// A by-reference wrapper
    ByRef(Box<TypeName>),
}

impl TypeName {
    /// Parses a composite name.
    ///
    /// # Errors
    /// Returns [`Error::TypeNotFound`] carrying the input if it is not a well-formed name.
    pub fn parse(input: &str) -> Result<TypeName> {
        let invalid = || Error::TypeNotFound(input.to_string());
        let trimmed = input.trim();

        let (body, scope) = match split_top_level(trimmed, ',').as_slice() {
            [body] => (*body, None),
            [body, scope] if !scope.trim().is_empty() => (*body, Some(scope.trim())),
            _ => return Err(invalid()),
        };

        let mut parsed = parse_body(body.trim()).ok_or_else(invalid)?;
        if let Some(scope) = scope {
            parsed.set_scope(scope);
        }
        Ok(parsed)
    }

    /// Canonical spelling without scope, the key under which the registry interns descriptors
    #[must_use]
    pub fn canonical(&self) -> String {
        match self {
            TypeName::Simple { name, .. } => name.clone(),
            TypeName::Generic { definition, args } => {
                let args: Vec<String> = args.iter().map(TypeName::canonical).collect();
                format!("{}<{}>", definition.canonical(), args.join(","))
            }
            TypeName::Array { element, rank } => {
                format!("{}{}", element.canonical(), array_suffix(*rank))
            }
            TypeName::ByRef(inner) => format!("{}&", inner.canonical()),
        }
    }

    /// Returns true if this is a plain name without markers
    #[must_use]
    pub fn is_simple(&self) -> bool {
        matches!(self, TypeName::Simple { .. })
    }

    fn set_scope(&mut self, new_scope: &str) {
        match self {
            TypeName::Simple { scope, .. } => *scope = Some(new_scope.to_string()),
            TypeName::Generic { definition, .. } => definition.set_scope(new_scope),
            TypeName::Array { element, .. } => element.set_scope(new_scope),
            TypeName::ByRef(inner) => inner.set_scope(new_scope),
        }
    }
}

/// Suffix appended to an element name for an array of `rank` dimensions
#[must_use]
pub fn array_suffix(rank: u8) -> String {
    let mut suffix = String::from("[");
    for _ in 1..rank.max(1) {
        suffix.push(',');
    }
    suffix.push(']');
    suffix
}

/// Splits on `separator` where it occurs outside of `<>` and `[]` nesting.
fn split_top_level(input: &str, separator: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    for (i, c) in input.char_indices() {
        match c {
            '<' | '[' => depth += 1,
            '>' | ']' => depth -= 1,
            c if c == separator && depth == 0 => {
                parts.push(&input[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&input[start..]);
    parts
}

/// Finds the index of the opening bracket matching the closing bracket at the end of `input`.
fn matching_open(input: &str, open: char, close: char) -> Option<usize> {
    let mut depth = 0i32;
    for (i, c) in input.char_indices().rev() {
        if c == close {
            depth += 1;
        } else if c == open {
            depth -= 1;
            if depth == 0 {
                return Some(i);
            }
        }
    }
    None
}

fn parse_body(body: &str) -> Option<TypeName> {
    if let Some(inner) = body.strip_suffix('&') {
        return Some(TypeName::ByRef(Box::new(parse_body(inner.trim_end())?)));
    }

    if body.ends_with(']') {
        let open = matching_open(body, '[', ']')?;
        let dims = &body[open + 1..body.len() - 1];
        if !dims.chars().all(|c| c == ',' || c.is_whitespace()) {
            return None;
        }
        let rank = u8::try_from(dims.chars().filter(|c| *c == ',').count() + 1).ok()?;
        let element = parse_body(body[..open].trim_end())?;
        return Some(TypeName::Array {
            element: Box::new(element),
            rank,
        });
    }

    if body.ends_with('>') {
        let open = matching_open(body, '<', '>')?;
        let definition = parse_body(body[..open].trim_end())?;
        if !definition.is_simple() {
            return None;
        }
        let args = split_top_level(&body[open + 1..body.len() - 1], ',')
            .into_iter()
            .map(|arg| parse_body(arg.trim()))
            .collect::<Option<Vec<_>>>()?;
        return Some(TypeName::Generic {
            definition: Box::new(definition),
            args,
        });
    }

    if body.is_empty() || body.contains(['<', '>', '[', ']', '&', ',']) {
        return None;
    }
    Some(TypeName::Simple {
        name: body.to_string(),
        scope: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn simple(name: &str) -> TypeName {
        TypeName::Simple {
            name: name.to_string(),
            scope: None,
        }
    }

    #[test]
    fn parse_simple_and_scoped() {
        assert_eq!(TypeName::parse("Sample.Foo").unwrap(), simple("Sample.Foo"));
        assert_eq!(
            TypeName::parse("Sample.Foo, Sample").unwrap(),
            TypeName::Simple {
                name: "Sample.Foo".to_string(),
                scope: Some("Sample".to_string())
            }
        );
    }

    #[test]
    fn parse_wrappers_outermost_first() {
        let parsed = TypeName::parse("Sample.Foo[]&").unwrap();
        assert_eq!(
            parsed,
            TypeName::ByRef(Box::new(TypeName::Array {
                element: Box::new(simple("Sample.Foo")),
                rank: 1
            }))
        );

        let grid = TypeName::parse("System.Int32[,,]").unwrap();
        assert!(matches!(grid, TypeName::Array { rank: 3, .. }));
    }

    #[test]
    fn parse_nested_generics() {
        let parsed = TypeName::parse("Host.Map<System.String, Host.List<System.Int32[]>>[]").unwrap();
        assert_eq!(
            parsed.canonical(),
            "Host.Map<System.String,Host.List<System.Int32[]>>[]"
        );
        match parsed {
            TypeName::Array { element, .. } => match *element {
                TypeName::Generic { args, .. } => assert_eq!(args.len(), 2),
                other => panic!("unexpected {:?}", other),
            },
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn scope_attaches_to_base() {
        let parsed = TypeName::parse("Sample.Foo[], Sample").unwrap();
        match parsed {
            TypeName::Array { element, .. } => assert_eq!(
                *element,
                TypeName::Simple {
                    name: "Sample.Foo".to_string(),
                    scope: Some("Sample".to_string())
                }
            ),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn reject_malformed() {
        for input in ["", "Foo<", "Foo>", "Foo[x]", "<A>", "Foo<A>[]<B>", "A, B, C", "Foo&[", "Foo,", "[]"] {
            assert!(
                matches!(TypeName::parse(input), Err(Error::TypeNotFound(_))),
                "accepted {:?}",
                input
            );
        }
    }
}
