//! Symbol table and type registry
//!
//! Variables live in a stack of scopes (innermost on top); at least one
//! scope always exists and `exit_scope` at depth 1 is a no-op. Types are
//! module-global: a flat registry with no shadowing.
//!
//! User-defined types are built in two phases: `try_declare_type` installs
//! the symbol (so recursive references bind), then `finalize_type` attaches
//! fields/variants exactly once. After finalization the entry is immutable.

use crate::ast::TypeDeclKind;
use std::collections::HashMap;
use std::fmt;

/// A resolved type. Primitives are a closed set; user-defined types are
/// referenced by name into the registry, which keeps the enum cheap to
/// clone and free of reference cycles.
#[derive(Debug, Clone, PartialEq)]
pub enum Type {
    Int,
    Float,
    Bool,
    String,
    Char,
    Unit,
    /// Poison type: produced wherever checking failed, silences follow-on
    /// errors.
    Error,
    /// In-scope generic type parameter of a user-defined type.
    GenericParam { name: String, position: usize },
    /// Fully bound user-defined, non-generic type.
    Named(String),
    /// Generic instantiation `Name<arg, …>`.
    Constructed { name: String, args: Vec<Type> },
}

impl Type {
    pub fn is_numeric(&self) -> bool {
        matches!(self, Type::Int | Type::Float | Type::Char)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Type::Error)
    }

    /// Look up a primitive by its source-level name.
    pub fn primitive(name: &str) -> Option<Type> {
        match name {
            "int" => Some(Type::Int),
            "float" => Some(Type::Float),
            "bool" => Some(Type::Bool),
            "string" => Some(Type::String),
            "char" => Some(Type::Char),
            "unit" => Some(Type::Unit),
            "error" => Some(Type::Error),
            _ => None,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Int => write!(f, "int"),
            Type::Float => write!(f, "float"),
            Type::Bool => write!(f, "bool"),
            Type::String => write!(f, "string"),
            Type::Char => write!(f, "char"),
            Type::Unit => write!(f, "unit"),
            Type::Error => write!(f, "error"),
            Type::GenericParam { name, .. } => write!(f, "{}", name),
            Type::Named(name) => write!(f, "{}", name),
            Type::Constructed { name, args } => {
                write!(f, "{}<", name)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                write!(f, ">")
            }
        }
    }
}

/// A variable binding. Mutable iff declared with `flux`.
#[derive(Debug, Clone, PartialEq)]
pub struct VariableSymbol {
    pub name: String,
    pub ty: Type,
    pub is_mutable: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldSymbol {
    pub name: String,
    pub ty: Type,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VariantSymbol {
    pub name: String,
    pub payload: Option<Type>,
}

/// Fields/variants attached by `finalize_type`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TypeBody {
    pub fields: Vec<FieldSymbol>,
    pub variants: Vec<VariantSymbol>,
}

/// Registry entry for a user-defined type.
#[derive(Debug, Clone, PartialEq)]
pub struct UserTypeDef {
    pub name: String,
    pub kind: TypeDeclKind,
    pub type_params: Vec<String>,
    /// None between declaration and finalization.
    pub body: Option<TypeBody>,
}

impl UserTypeDef {
    pub fn is_generic(&self) -> bool {
        !self.type_params.is_empty()
    }
}

/// Registry entry: primitive or user-defined.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeDef {
    Primitive(Type),
    User(UserTypeDef),
}

#[derive(Debug, Clone)]
pub struct SymbolTable {
    scopes: Vec<HashMap<String, VariableSymbol>>,
    types: HashMap<String, TypeDef>,
}

impl SymbolTable {
    /// A fresh table with the root scope and the built-in primitive types
    /// preloaded.
    pub fn new() -> Self {
        let mut table = SymbolTable {
            scopes: vec![HashMap::new()],
            types: HashMap::new(),
        };
        table.register_built_in_types();
        table
    }

    fn register_built_in_types(&mut self) {
        for name in ["int", "float", "bool", "string", "char", "unit", "error"] {
            let ty = Type::primitive(name).unwrap_or(Type::Error);
            self.types.insert(name.to_string(), TypeDef::Primitive(ty));
        }
    }

    // ------------------------------------------------------------------
    // Variable scopes
    // ------------------------------------------------------------------

    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    pub fn enter_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    /// No-op at depth 1: the root scope persists.
    pub fn exit_scope(&mut self) {
        if self.scopes.len() > 1 {
            self.scopes.pop();
        }
    }

    /// Declare in the current scope. Fails iff the name already exists in
    /// the top scope (shadowing an outer scope is allowed).
    pub fn try_declare(&mut self, symbol: VariableSymbol) -> bool {
        let Some(top) = self.scopes.last_mut() else {
            return false;
        };
        if top.contains_key(&symbol.name) {
            return false;
        }
        top.insert(symbol.name.clone(), symbol);
        true
    }

    /// Innermost binding for `name`, traversing outward.
    pub fn try_lookup(&self, name: &str) -> Option<&VariableSymbol> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name))
    }

    /// Like `try_lookup`, but also returns the absolute depth (1 = root) of
    /// the scope holding the binding.
    pub fn try_lookup_with_scope_depth(&self, name: &str) -> Option<(&VariableSymbol, usize)> {
        for (index, scope) in self.scopes.iter().enumerate().rev() {
            if let Some(symbol) = scope.get(name) {
                return Some((symbol, index + 1));
            }
        }
        None
    }

    /// Inspects only the top scope.
    pub fn is_declared_in_current_scope(&self, name: &str) -> bool {
        self.scopes
            .last()
            .is_some_and(|scope| scope.contains_key(name))
    }

    // ------------------------------------------------------------------
    // Type registry
    // ------------------------------------------------------------------

    /// Register a user-defined type. Fails iff the name is taken (primitive
    /// or user); there is no shadowing for types.
    pub fn try_declare_type(&mut self, def: UserTypeDef) -> bool {
        if self.types.contains_key(&def.name) {
            return false;
        }
        self.types.insert(def.name.clone(), TypeDef::User(def));
        true
    }

    /// Attach fields/variants to a declared type, exactly once.
    pub fn finalize_type(&mut self, name: &str, body: TypeBody) -> Result<(), String> {
        match self.types.get_mut(name) {
            Some(TypeDef::User(def)) => {
                if def.body.is_some() {
                    return Err(format!("type '{}' is already finalized", name));
                }
                def.body = Some(body);
                Ok(())
            }
            Some(TypeDef::Primitive(_)) => {
                Err(format!("cannot finalize primitive type '{}'", name))
            }
            None => Err(format!("unknown type '{}'", name)),
        }
    }

    pub fn lookup_type(&self, name: &str) -> Option<&TypeDef> {
        self.types.get(name)
    }

    pub fn lookup_user_type(&self, name: &str) -> Option<&UserTypeDef> {
        match self.types.get(name) {
            Some(TypeDef::User(def)) => Some(def),
            _ => None,
        }
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var(name: &str, ty: Type) -> VariableSymbol {
        VariableSymbol {
            name: name.to_string(),
            ty,
            is_mutable: false,
        }
    }

    #[test]
    fn test_balanced_scopes_return_to_depth_one() {
        let mut table = SymbolTable::new();
        assert_eq!(table.depth(), 1);
        table.enter_scope();
        table.enter_scope();
        table.exit_scope();
        table.exit_scope();
        assert_eq!(table.depth(), 1);
        // Root persists even on extra exits.
        table.exit_scope();
        assert_eq!(table.depth(), 1);
    }

    #[test]
    fn test_declare_fails_in_same_scope_only() {
        let mut table = SymbolTable::new();
        assert!(table.try_declare(var("x", Type::Int)));
        assert!(!table.try_declare(var("x", Type::Float)));
        table.enter_scope();
        // Shadowing an outer binding is fine.
        assert!(table.try_declare(var("x", Type::Float)));
    }

    #[test]
    fn test_lookup_returns_innermost() {
        let mut table = SymbolTable::new();
        table.try_declare(var("x", Type::Int));
        table.enter_scope();
        table.try_declare(var("x", Type::Float));
        assert_eq!(table.try_lookup("x").map(|s| s.ty.clone()), Some(Type::Float));
        let (_, depth) = table.try_lookup_with_scope_depth("x").unwrap();
        assert_eq!(depth, 2);
        table.exit_scope();
        assert_eq!(table.try_lookup("x").map(|s| s.ty.clone()), Some(Type::Int));
    }

    #[test]
    fn test_current_scope_check_is_top_only() {
        let mut table = SymbolTable::new();
        table.try_declare(var("outer", Type::Int));
        table.enter_scope();
        assert!(!table.is_declared_in_current_scope("outer"));
        assert!(table.try_lookup("outer").is_some());
    }

    #[test]
    fn test_primitive_types_are_preloaded() {
        let table = SymbolTable::new();
        for name in ["int", "float", "bool", "string", "char", "unit", "error"] {
            assert!(table.lookup_type(name).is_some(), "missing {}", name);
        }
    }

    #[test]
    fn test_type_names_cannot_be_redeclared() {
        let mut table = SymbolTable::new();
        let def = UserTypeDef {
            name: "Box".to_string(),
            kind: TypeDeclKind::Struct,
            type_params: vec!["T".to_string()],
            body: None,
        };
        assert!(table.try_declare_type(def.clone()));
        assert!(!table.try_declare_type(def));
        // Primitives are taken too.
        assert!(!table.try_declare_type(UserTypeDef {
            name: "int".to_string(),
            kind: TypeDeclKind::Struct,
            type_params: vec![],
            body: None,
        }));
    }

    #[test]
    fn test_two_phase_finalization() {
        let mut table = SymbolTable::new();
        table.try_declare_type(UserTypeDef {
            name: "Point".to_string(),
            kind: TypeDeclKind::Struct,
            type_params: vec![],
            body: None,
        });
        let body = TypeBody {
            fields: vec![FieldSymbol {
                name: "x".to_string(),
                ty: Type::Int,
            }],
            variants: vec![],
        };
        assert!(table.finalize_type("Point", body.clone()).is_ok());
        // Second finalization is rejected: the symbol is immutable now.
        assert!(table.finalize_type("Point", body).is_err());
    }

    #[test]
    fn test_constructed_type_display() {
        let ty = Type::Constructed {
            name: "Box".to_string(),
            args: vec![Type::Int, Type::Float],
        };
        assert_eq!(ty.to_string(), "Box<int, float>");
    }
}
