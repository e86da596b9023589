//! The macro table: object-like and function-like macro definitions, plus built-ins.

use crate::token::Token;
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub enum MacroBody {
    /// A user `#define`d macro: its replacement-list tokens, as written.
    Tokens(Vec<Token>),
    /// A built-in whose expansion is computed at the use site (`__LINE__`, `__COUNTER__`, ...).
    Builtin(Builtin),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    File,
    Line,
    Counter,
    Timestamp,
    BaseFile,
    StdcVersion,
    HasAttribute,
    HasBuiltin,
    HasInclude,
}

#[derive(Debug, Clone)]
pub struct MacroDef {
    pub name: String,
    pub is_function_like: bool,
    pub params: Vec<String>,
    pub variadic_name: Option<String>,
    pub body: MacroBody,
}

pub struct MacroTable {
    macros: HashMap<String, MacroDef>,
    pub counter: u64,
}

impl MacroTable {
    /// Seed the predefined object macros (LP64 sizes, `__x86_64__`, etc.) and the
    /// built-in handlers.
    pub fn with_predefined() -> Self {
        let mut t = MacroTable { macros: HashMap::new(), counter: 0 };
        let predef = [
            ("__x86_64__", "1"),
            ("__LP64__", "1"),
            ("__SIZEOF_INT__", "4"),
            ("__SIZEOF_LONG__", "8"),
            ("__SIZEOF_POINTER__", "8"),
            ("__STDC__", "1"),
            ("__STDC_HOSTED__", "1"),
        ];
        for (name, val) in &predef {
            t.define_object_text(name, val);
        }
        for (name, b) in [
            ("__FILE__", Builtin::File),
            ("__LINE__", Builtin::Line),
            ("__COUNTER__", Builtin::Counter),
            ("__TIMESTAMP__", Builtin::Timestamp),
            ("__BASE_FILE__", Builtin::BaseFile),
            ("__STDC_VERSION__", Builtin::StdcVersion),
            ("__has_attribute", Builtin::HasAttribute),
            ("__has_builtin", Builtin::HasBuiltin),
            ("__has_include", Builtin::HasInclude),
        ] {
            t.macros.insert(
                name.to_string(),
                MacroDef {
                    name: name.to_string(),
                    is_function_like: matches!(b, Builtin::HasAttribute | Builtin::HasBuiltin | Builtin::HasInclude),
                    params: Vec::new(),
                    variadic_name: None,
                    body: MacroBody::Builtin(b),
                },
            );
        }
        t
    }

    fn define_object_text(&mut self, name: &str, text: &str) {
        use crate::diagnostics::Location;
        use crate::token::TokenKind;
        let tok = Token::new(TokenKind::PpNumber, Location::synthetic(), text);
        self.macros.insert(
            name.to_string(),
            MacroDef {
                name: name.to_string(),
                is_function_like: false,
                params: Vec::new(),
                variadic_name: None,
                body: MacroBody::Tokens(vec![tok]),
            },
        );
    }

    pub fn define(&mut self, def: MacroDef) {
        self.macros.insert(def.name.clone(), def);
    }

    pub fn undef(&mut self, name: &str) {
        self.macros.remove(name);
    }

    pub fn get(&self, name: &str) -> Option<&MacroDef> {
        self.macros.get(name)
    }

    pub fn is_defined(&self, name: &str) -> bool {
        self.macros.contains_key(name)
    }
}

impl Default for MacroTable {
    fn default() -> Self {
        Self::with_predefined()
    }
}
