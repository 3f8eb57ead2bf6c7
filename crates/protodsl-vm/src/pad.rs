//! The lexical pad: the VM's variable environment (§4.4 "Lexical pad
//! (scoped variable init/get/set): maintain per-continuation variable
//! environment"). Scoping is two-level: a call's own local bindings
//! (`LexicalPadInitialize`) and one shared global pad reachable from any
//! depth (`LexicalPadInitializeGlobal`), matching `008-lexicalpad.cpp` and
//! `009-recursive-factorial.cpp` in the original interpreter, where a
//! recursive call's locals (`i`) are isolated per call but the function
//! binding itself (`factorial`) is visible from every recursion depth.

use std::sync::{Arc, Mutex};

use crate::value::Value;

#[derive(Debug)]
pub struct Pad {
    bindings: Mutex<Vec<(String, Value)>>,
    parent: Option<Arc<Pad>>,
}

impl Pad {
    /// A fresh pad with no parent — used once, as the Continuation's
    /// global scope.
    pub fn root() -> Arc<Pad> {
        Arc::new(Pad {
            bindings: Mutex::new(Vec::new()),
            parent: None,
        })
    }

    /// A new local scope (one per `FunctionCall` invocation) whose
    /// unresolved lookups fall through to `parent`.
    pub fn child_of(parent: &Arc<Pad>) -> Arc<Pad> {
        Arc::new(Pad {
            bindings: Mutex::new(Vec::new()),
            parent: Some(Arc::clone(parent)),
        })
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        if let Some(v) = self
            .bindings
            .lock()
            .expect("pad mutex poisoned")
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.clone())
        {
            return Some(v);
        }
        self.parent.as_ref().and_then(|p| p.get(name))
    }

    /// `LexicalPadInitialize`: declare/overwrite `name` in this pad's own
    /// scope, regardless of whether an outer scope already declares it.
    pub fn initialize_local(&self, name: impl Into<String>, value: Value) {
        let name = name.into();
        let mut bindings = self.bindings.lock().expect("pad mutex poisoned");
        if let Some(slot) = bindings.iter_mut().find(|(n, _)| *n == name) {
            slot.1 = value;
        } else {
            bindings.push((name, value));
        }
    }

    /// `LexicalPadInitializeGlobal`: walk to the outermost ancestor and
    /// declare/overwrite `name` there.
    pub fn initialize_global(self: &Arc<Self>, name: impl Into<String>, value: Value) {
        let mut current = Arc::clone(self);
        while let Some(parent) = current.parent.clone() {
            current = parent;
        }
        current.initialize_local(name, value);
    }

    /// `LexicalPadSet`: overwrite an existing binding, searching this pad
    /// then its ancestors. Returns `false` if `name` is bound nowhere.
    pub fn set(&self, name: &str, value: Value) -> bool {
        let mut bindings = self.bindings.lock().expect("pad mutex poisoned");
        if let Some(slot) = bindings.iter_mut().find(|(n, _)| n == name) {
            slot.1 = value;
            return true;
        }
        drop(bindings);
        match &self.parent {
            Some(parent) => parent.set(name, value),
            None => false,
        }
    }
}
