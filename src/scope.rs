//! `ScopedHashMap`-backed variable and tag scopes.
//!
//! Entering a block or function body pushes a new scope level; anything inserted at that
//! level becomes invisible again once the level is popped. Variable names and tag names
//! (`struct`/`union`/`enum` tags) are tracked in two independent scoped maps, matching
//! tag scopes and variable scopes as independent hash maps.
//!
//! The depth-tracking trick (`Val { depth, next_key }` forming a per-key undo chain)
//! is reduced here to the two operations this compiler actually needs
//! (`enter`/`insert`/`lookup`).

use crate::ast::ObjRef;
use crate::types::TypeRef;
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub enum VarScope {
    Obj(ObjRef),
    Typedef(TypeRef),
    Enumerator(i64, TypeRef),
}

struct Entry<V> {
    value: V,
    depth: usize,
    shadowed: Option<Box<Entry<V>>>,
}

/// A hash map whose entries can be rolled back to an earlier depth in O(inserted keys).
struct ScopedHashMap<V> {
    map: HashMap<String, Entry<V>>,
    depth: usize,
}

impl<V> ScopedHashMap<V> {
    fn new() -> Self {
        ScopedHashMap { map: HashMap::new(), depth: 0 }
    }

    fn enter(&mut self) {
        self.depth += 1;
    }

    fn exit(&mut self) {
        debug_assert!(self.depth > 0, "exit without matching enter");
        let keys: Vec<String> = self
            .map
            .iter()
            .filter(|(_, e)| e.depth == self.depth)
            .map(|(k, _)| k.clone())
            .collect();
        for k in keys {
            let entry = self.map.remove(&k).expect("key just observed present");
            if let Some(shadowed) = entry.shadowed {
                self.map.insert(k, *shadowed);
            }
        }
        self.depth -= 1;
    }

    fn insert(&mut self, key: String, value: V) {
        let depth = self.depth;
        let shadowed = self.map.remove(&key).map(Box::new);
        self.map.insert(key, Entry { value, depth, shadowed });
    }

    fn get(&self, key: &str) -> Option<&V> {
        self.map.get(key).map(|e| &e.value)
    }

    /// Lookup restricted to the current (innermost) depth only, used to diagnose
    /// redeclaration within the same block.
    fn get_current_depth(&self, key: &str) -> Option<&V> {
        self.map.get(key).filter(|e| e.depth == self.depth)
    }
}

/// A scope chain: one `Scope` per nested block/function body, holding its own variable
/// and tag maps layered over the enclosing scope's.
pub struct Scope {
    vars: ScopedHashMap<VarScope>,
    tags: ScopedHashMap<TypeRef>,
    /// True for scopes introduced purely to hold a compound literal in expression
    /// context; such scopes are skipped when choosing the innermost scope that should
    /// own a new local.
    temp_depth: usize,
}

impl Scope {
    pub fn new() -> Self {
        Scope { vars: ScopedHashMap::new(), tags: ScopedHashMap::new(), temp_depth: 0 }
    }

    pub fn enter_block(&mut self) {
        self.vars.enter();
        self.tags.enter();
    }

    pub fn exit_block(&mut self) {
        self.vars.exit();
        self.tags.exit();
    }

    /// Enter a temporary scope (around a compound literal evaluated in expression
    /// context). Mirrors `enter_block` but is tracked separately so callers can tell
    /// whether the *current* scope is one to avoid anchoring locals in.
    pub fn enter_temp(&mut self) {
        self.enter_block();
        self.temp_depth += 1;
    }

    pub fn exit_temp(&mut self) {
        self.temp_depth -= 1;
        self.exit_block();
    }

    pub fn in_temp_scope(&self) -> bool {
        self.temp_depth > 0
    }

    pub fn declare_var(&mut self, name: impl Into<String>, v: VarScope) {
        self.vars.insert(name.into(), v);
    }

    pub fn declare_var_unique(&mut self, name: impl Into<String>, v: VarScope) -> Result<(), String> {
        let name = name.into();
        if self.vars.get_current_depth(&name).is_some() {
            return Err(format!("redefinition of '{}'", name));
        }
        self.vars.insert(name, v);
        Ok(())
    }

    pub fn lookup_var(&self, name: &str) -> Option<&VarScope> {
        self.vars.get(name)
    }

    pub fn declare_tag(&mut self, name: impl Into<String>, ty: TypeRef) {
        self.tags.insert(name.into(), ty);
    }

    pub fn lookup_tag(&self, name: &str) -> Option<TypeRef> {
        self.tags.get(name).copied()
    }
}

impl Default for Scope {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard returned by `Scope::push`; leaving scope on every exit path (including an
/// early `?` return from the construct being parsed) is exactly the "scoped resource
/// release" pattern.
pub struct ScopeGuard<'a> {
    scope: &'a mut Scope,
    is_temp: bool,
}

impl Scope {
    pub fn push<'a>(&'a mut self) -> ScopeGuard<'a> {
        self.enter_block();
        ScopeGuard { scope: self, is_temp: false }
    }

    pub fn push_temp<'a>(&'a mut self) -> ScopeGuard<'a> {
        self.enter_temp();
        ScopeGuard { scope: self, is_temp: true }
    }
}

impl<'a> std::ops::Deref for ScopeGuard<'a> {
    type Target = Scope;
    fn deref(&self) -> &Scope {
        self.scope
    }
}

impl<'a> std::ops::DerefMut for ScopeGuard<'a> {
    fn deref_mut(&mut self) -> &mut Scope {
        self.scope
    }
}

impl<'a> Drop for ScopeGuard<'a> {
    fn drop(&mut self) {
        if self.is_temp {
            self.scope.exit_temp();
        } else {
            self.scope.exit_block();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TypeArena;

    #[test]
    fn shadowing_is_undone_on_exit() {
        let arena = TypeArena::new();
        let int_ty = arena.well_known("int");
        let mut scope = Scope::new();
        scope.declare_tag("x", int_ty);
        {
            let mut inner = scope.push();
            inner.declare_tag("x", arena.well_known("char"));
            assert_eq!(inner.lookup_tag("x"), Some(arena.well_known("char")));
        }
        assert_eq!(scope.lookup_tag("x"), Some(int_ty));
    }

    #[test]
    fn redeclaration_in_same_block_is_rejected() {
        let arena = TypeArena::new();
        let mut scope = Scope::new();
        scope.declare_var_unique("n", VarScope::Typedef(arena.well_known("int"))).unwrap();
        assert!(scope.declare_var_unique("n", VarScope::Typedef(arena.well_known("int"))).is_err());
    }
}
