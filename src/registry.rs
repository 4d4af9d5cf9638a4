//! Generator registry: the binding from shapes to generators.
//!
//! The registry is mutated only during setup (registration, overrides) and
//! through [`TypeRegistry::scoped`] guards; a run holds an immutable
//! [`RegistrySnapshot`]. Resolution order is registered exact match, then
//! the path-position or standard builtin for primitives, then structural
//! synthesis over the shape. Synthesis fails with `UnsupportedType` only
//! when it reaches a leaf nothing can construct.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::RwLock;

use rand_chacha::ChaCha8Rng;
use thiserror::Error;

use crate::generate::BoolGen;
use crate::generate::BytesGen;
use crate::generate::DateGen;
use crate::generate::DateTimeGen;
use crate::generate::Draw;
use crate::generate::DrawTree;
use crate::generate::EnumGen;
use crate::generate::FloatGen;
use crate::generate::GenContext;
use crate::generate::GenError;
use crate::generate::IntGen;
use crate::generate::MapGen;
use crate::generate::OneOfGen;
use crate::generate::OptionalGen;
use crate::generate::RecordGen;
use crate::generate::SeqGen;
use crate::generate::StrGen;
use crate::generate::UuidGen;
use crate::generate::RecordField;
use crate::generate::ValueGenerator;
use crate::schema::Primitive;
use crate::schema::SchemaTable;
use crate::schema::TypeRef;
use crate::value::Value;

/// Default `Ref` expansion depth before the recursion guard engages.
pub const DEFAULT_REF_DEPTH: usize = 5;

/// Registry binding key: a structural shape or a registered name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RegistryKey {
    Type(TypeRef),
    Name(String),
}

impl RegistryKey {
    fn describe(&self) -> String {
        match self {
            RegistryKey::Type(ty) => ty.describe(),
            RegistryKey::Name(name) => format!("'{name}'"),
        }
    }
}

impl From<TypeRef> for RegistryKey {
    fn from(ty: TypeRef) -> Self {
        RegistryKey::Type(ty)
    }
}

impl From<&str> for RegistryKey {
    fn from(name: &str) -> Self {
        RegistryKey::Name(name.to_string())
    }
}

impl fmt::Display for RegistryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.describe())
    }
}

/// Errors from registration and resolution.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("a generator is already registered for {key}; pass override to replace it")]
    AlreadyRegistered { key: String },

    #[error("no generator available for type: {type_name}")]
    UnsupportedType { type_name: String },
}

/// Mutable setup-time registry. See the module docs for the resolution
/// order; [`snapshot`](TypeRegistry::snapshot) freezes the current state
/// for a run.
pub struct TypeRegistry {
    user: RwLock<HashMap<RegistryKey, Arc<dyn ValueGenerator>>>,
    builtins: HashMap<Primitive, Arc<dyn ValueGenerator>>,
    path_builtins: HashMap<Primitive, Arc<dyn ValueGenerator>>,
    schemas: RwLock<SchemaTable>,
    max_ref_depth: usize,
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeRegistry {
    /// Construct with all built-in primitive generators installed.
    pub fn new() -> Self {
        let mut builtins: HashMap<Primitive, Arc<dyn ValueGenerator>> = HashMap::new();
        builtins.insert(Primitive::Str, Arc::new(StrGen::text()));
        builtins.insert(Primitive::Int, Arc::new(IntGen::default()));
        builtins.insert(Primitive::Float, Arc::new(FloatGen::default()));
        builtins.insert(Primitive::Bool, Arc::new(BoolGen));
        builtins.insert(Primitive::Bytes, Arc::new(BytesGen::default()));
        builtins.insert(Primitive::Uuid, Arc::new(UuidGen));
        builtins.insert(Primitive::DateTime, Arc::new(DateTimeGen));
        builtins.insert(Primitive::Date, Arc::new(DateGen));

        // Path positions swap in URL-safe string generation; every other
        // primitive already renders URL-safe.
        let mut path_builtins = builtins.clone();
        path_builtins.insert(Primitive::Str, Arc::new(StrGen::path_safe()));

        Self {
            user: RwLock::new(HashMap::new()),
            builtins,
            path_builtins,
            schemas: RwLock::new(SchemaTable::new()),
            max_ref_depth: DEFAULT_REF_DEPTH,
        }
    }

    /// Override the `Ref` recursion guard depth.
    pub fn with_max_ref_depth(mut self, depth: usize) -> Self {
        self.max_ref_depth = depth;
        self
    }

    /// Register a generator for a key.
    ///
    /// Fails with `AlreadyRegistered` unless `overwrite` is set.
    pub fn register(
        &self,
        key: impl Into<RegistryKey>,
        generator: Arc<dyn ValueGenerator>,
        overwrite: bool,
    ) -> Result<(), RegistryError> {
        let key = key.into();
        let mut user = self.user.write().unwrap_or_else(|e| e.into_inner());
        if !overwrite && user.contains_key(&key) {
            return Err(RegistryError::AlreadyRegistered { key: key.describe() });
        }
        user.insert(key, generator);
        Ok(())
    }

    /// Register a batch atomically: if any key is already bound and
    /// `overwrite` is unset, nothing is inserted.
    pub fn register_many(
        &self,
        mapping: Vec<(RegistryKey, Arc<dyn ValueGenerator>)>,
        overwrite: bool,
    ) -> Result<(), RegistryError> {
        let mut user = self.user.write().unwrap_or_else(|e| e.into_inner());
        if !overwrite {
            for (key, _) in &mapping {
                if user.contains_key(key) {
                    return Err(RegistryError::AlreadyRegistered { key: key.describe() });
                }
            }
        }
        for (key, generator) in mapping {
            user.insert(key, generator);
        }
        Ok(())
    }

    /// Remove a binding; returns whether one existed.
    pub fn unregister(&self, key: impl Into<RegistryKey>) -> bool {
        let key = key.into();
        self.user.write().unwrap_or_else(|e| e.into_inner()).remove(&key).is_some()
    }

    /// Push a scoped override, restored when the returned guard releases.
    ///
    /// Scopes nest LIFO; the guard restores the previous binding on every
    /// exit path, including unwinding, and release is idempotent.
    pub fn scoped(
        &self,
        key: impl Into<RegistryKey>,
        generator: Arc<dyn ValueGenerator>,
    ) -> ScopedOverride<'_> {
        let key = key.into();
        let prev = {
            let mut user = self.user.write().unwrap_or_else(|e| e.into_inner());
            user.insert(key.clone(), generator)
        };
        ScopedOverride { registry: self, key, prev, released: false }
    }

    /// Add a named schema body for `Ref` resolution.
    pub fn register_schema(&self, name: impl Into<String>, ty: TypeRef) {
        self.schemas.write().unwrap_or_else(|e| e.into_inner()).insert(name, ty);
    }

    /// Merge a route's schema table into this registry's.
    pub fn absorb_schemas(&self, table: &SchemaTable) {
        let mut schemas = self.schemas.write().unwrap_or_else(|e| e.into_inner());
        for name in table.names() {
            if let Some(ty) = table.get(name) {
                schemas.insert(name, ty.clone());
            }
        }
    }

    /// Keys with user registrations, for introspection.
    pub fn registered_keys(&self) -> Vec<RegistryKey> {
        self.user.read().unwrap_or_else(|e| e.into_inner()).keys().cloned().collect()
    }

    /// Freeze the current bindings into an immutable run snapshot.
    pub fn snapshot(&self) -> RegistrySnapshot {
        let user = self.user.read().unwrap_or_else(|e| e.into_inner()).clone();
        let schemas = self.schemas.read().unwrap_or_else(|e| e.into_inner()).clone();
        RegistrySnapshot {
            env: Arc::new(GenEnv {
                user,
                builtins: self.builtins.clone(),
                path_builtins: self.path_builtins.clone(),
                schemas,
                max_ref_depth: self.max_ref_depth,
            }),
        }
    }
}

/// RAII guard for a scoped override.
pub struct ScopedOverride<'a> {
    registry: &'a TypeRegistry,
    key: RegistryKey,
    prev: Option<Arc<dyn ValueGenerator>>,
    released: bool,
}

impl ScopedOverride<'_> {
    /// Restore the previous binding. Safe to call more than once.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        let mut user = self.registry.user.write().unwrap_or_else(|e| e.into_inner());
        match self.prev.take() {
            Some(prev) => {
                user.insert(self.key.clone(), prev);
            }
            None => {
                user.remove(&self.key);
            }
        }
    }
}

impl Drop for ScopedOverride<'_> {
    fn drop(&mut self) {
        self.release();
    }
}

/// Immutable resolution environment shared by a run.
struct GenEnv {
    user: HashMap<RegistryKey, Arc<dyn ValueGenerator>>,
    builtins: HashMap<Primitive, Arc<dyn ValueGenerator>>,
    path_builtins: HashMap<Primitive, Arc<dyn ValueGenerator>>,
    schemas: SchemaTable,
    max_ref_depth: usize,
}

/// Read-only view of the registry taken once per run. Cheap to clone and
/// safe to share across concurrent route tasks.
#[derive(Clone)]
pub struct RegistrySnapshot {
    env: Arc<GenEnv>,
}

/// Whether a shape is being generated for a path segment or elsewhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    Path,
    Body,
}

impl RegistrySnapshot {
    /// Root generation context carrying the recursion guard depth.
    pub fn context(&self) -> GenContext {
        GenContext::root(self.env.max_ref_depth)
    }

    /// Resolve a generator for a body/query/header shape.
    pub fn resolve(&self, ty: &TypeRef) -> Result<Arc<dyn ValueGenerator>, RegistryError> {
        build_generator(ty, &self.env, Position::Body)
    }

    /// Resolve a generator for a path-segment shape (URL-safe strings).
    pub fn resolve_path_param(
        &self,
        ty: &TypeRef,
    ) -> Result<Arc<dyn ValueGenerator>, RegistryError> {
        build_generator(ty, &self.env, Position::Path)
    }

    /// Named schema bodies visible to this snapshot.
    pub fn schemas(&self) -> &SchemaTable {
        &self.env.schemas
    }
}

fn build_generator(
    ty: &TypeRef,
    env: &Arc<GenEnv>,
    position: Position,
) -> Result<Arc<dyn ValueGenerator>, RegistryError> {
    if let Some(generator) = env.user.get(&RegistryKey::Type(ty.clone())) {
        return Ok(Arc::clone(generator));
    }

    match ty {
        TypeRef::Primitive(p) => {
            let table = match position {
                Position::Path => &env.path_builtins,
                Position::Body => &env.builtins,
            };
            table
                .get(p)
                .cloned()
                .ok_or_else(|| RegistryError::UnsupportedType { type_name: p.name().to_string() })
        }
        TypeRef::Optional(inner) => {
            Ok(Arc::new(OptionalGen::new(build_generator(inner, env, position)?)))
        }
        TypeRef::Seq { item, min, max } => {
            Ok(Arc::new(SeqGen::new(build_generator(item, env, position)?, *min, *max)))
        }
        TypeRef::Map { key, value, min, max } => Ok(Arc::new(MapGen::new(
            build_generator(key, env, position)?,
            build_generator(value, env, position)?,
            *min,
            *max,
        ))),
        TypeRef::Enum(values) => Ok(Arc::new(EnumGen::new(values.clone()))),
        TypeRef::Record(fields) => {
            let mut built = Vec::with_capacity(fields.len());
            for field in fields {
                built.push(RecordField {
                    name: field.name.clone(),
                    generator: build_generator(&field.ty, env, position)?,
                    required: field.required,
                });
            }
            Ok(Arc::new(RecordGen::new(built)))
        }
        TypeRef::OneOf(variants) => {
            let mut built = Vec::with_capacity(variants.len());
            for variant in variants {
                built.push(build_generator(variant, env, position)?);
            }
            Ok(Arc::new(OneOfGen::new(built)))
        }
        TypeRef::Ref(name) => {
            let known = env.user.contains_key(&RegistryKey::Name(name.clone()))
                || env.schemas.contains(name);
            if !known {
                return Err(RegistryError::UnsupportedType {
                    type_name: format!("unresolved reference '{name}'"),
                });
            }
            Ok(Arc::new(RefGen { name: name.clone(), env: Arc::clone(env), position }))
        }
    }
}

/// Lazy named-reference generator.
///
/// Resolution happens at draw/replay time so that mutually recursive
/// schemas need no cyclic ownership; the recursion guard lives in the
/// context's depth counter, which only this generator advances.
struct RefGen {
    name: String,
    env: Arc<GenEnv>,
    position: Position,
}

impl RefGen {
    fn resolve(&self) -> Result<Arc<dyn ValueGenerator>, GenError> {
        if let Some(generator) = self.env.user.get(&RegistryKey::Name(self.name.clone())) {
            return Ok(Arc::clone(generator));
        }
        let body = self
            .env
            .schemas
            .get(&self.name)
            .ok_or_else(|| GenError::UnresolvedRef { name: self.name.clone() })?;
        build_generator(body, &self.env, self.position)
            .map_err(|e| GenError::Unsupported { type_name: e.to_string() })
    }
}

impl ValueGenerator for RefGen {
    fn draw(&self, rng: &mut ChaCha8Rng, cx: GenContext) -> Result<Draw, GenError> {
        // Same threshold as the Optional/OneOf escape valves, so
        // `max_ref_depth` permits the same expansion count no matter which
        // guard intercepts the recursion.
        if cx.at_limit() {
            return Err(GenError::RecursionLimit {
                name: self.name.clone(),
                limit: cx.max_depth,
            });
        }
        self.resolve()?.draw(rng, cx.descend())
    }

    fn replay(&self, tree: &DrawTree, cx: GenContext) -> Result<Value, GenError> {
        if cx.at_limit() {
            return Err(GenError::RecursionLimit {
                name: self.name.clone(),
                limit: cx.max_depth,
            });
        }
        self.resolve()?.replay(tree, cx.descend())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generate::trial_rng;
    use crate::schema::Field;

    #[test]
    fn double_registration_without_override_fails() {
        let registry = TypeRegistry::new();
        registry
            .register(TypeRef::int(), Arc::new(IntGen::new(0, 5)), false)
            .expect("first registration");
        let err = registry
            .register(TypeRef::int(), Arc::new(IntGen::new(0, 9)), false)
            .expect_err("duplicate");
        assert!(matches!(err, RegistryError::AlreadyRegistered { .. }));
        registry
            .register(TypeRef::int(), Arc::new(IntGen::new(0, 9)), true)
            .expect("override allowed");
    }

    #[test]
    fn register_many_is_atomic() {
        let registry = TypeRegistry::new();
        registry
            .register(TypeRef::bool(), Arc::new(BoolGen), false)
            .expect("seed registration");
        let err = registry
            .register_many(
                vec![
                    (TypeRef::int().into(), Arc::new(IntGen::new(0, 1)) as Arc<dyn ValueGenerator>),
                    (TypeRef::bool().into(), Arc::new(BoolGen) as Arc<dyn ValueGenerator>),
                ],
                false,
            )
            .expect_err("duplicate in batch");
        assert!(matches!(err, RegistryError::AlreadyRegistered { .. }));
        // The non-conflicting entry must not have been inserted either.
        assert!(!registry.registered_keys().contains(&RegistryKey::Type(TypeRef::int())));
    }

    #[test]
    fn scoped_override_restores_in_lifo_order() {
        let registry = TypeRegistry::new();
        let narrow: Arc<dyn ValueGenerator> = Arc::new(IntGen::new(0, 1));
        let narrower: Arc<dyn ValueGenerator> = Arc::new(IntGen::new(0, 0));
        {
            let _outer = registry.scoped(TypeRef::int(), Arc::clone(&narrow));
            {
                let _inner = registry.scoped(TypeRef::int(), Arc::clone(&narrower));
                let snapshot = registry.snapshot();
                let g = snapshot.resolve(&TypeRef::int()).expect("resolve");
                let mut rng = trial_rng(1, 0, 0);
                let draw = g.draw(&mut rng, snapshot.context()).expect("draw");
                assert_eq!(draw.value, Value::Int(0));
            }
        }
        // Both scopes released; resolution falls back to the builtin range.
        let snapshot = registry.snapshot();
        let g = snapshot.resolve(&TypeRef::int()).expect("resolve");
        let mut rng = trial_rng(9, 0, 3);
        let Draw { value: Value::Int(v), .. } =
            g.draw(&mut rng, snapshot.context()).expect("draw")
        else {
            panic!("expected int");
        };
        assert!((-1000..=1000).contains(&v));
    }

    #[test]
    fn scoped_release_is_idempotent() {
        let registry = TypeRegistry::new();
        let mut guard = registry.scoped(TypeRef::int(), Arc::new(IntGen::new(7, 7)));
        guard.release();
        guard.release();
        drop(guard);
        assert!(registry.registered_keys().is_empty());
    }

    #[test]
    fn unresolved_ref_is_unsupported() {
        let registry = TypeRegistry::new();
        let snapshot = registry.snapshot();
        let err = snapshot.resolve(&TypeRef::reference("ghost")).expect_err("unresolved");
        assert!(matches!(err, RegistryError::UnsupportedType { .. }));
    }

    #[test]
    fn recursive_schema_terminates_via_guard() {
        let registry = TypeRegistry::new();
        registry.register_schema(
            "node",
            TypeRef::record(vec![
                Field::required("label", TypeRef::str()),
                Field::required("next", TypeRef::optional(TypeRef::reference("node"))),
            ]),
        );
        let snapshot = registry.snapshot();
        let g = snapshot.resolve(&TypeRef::reference("node")).expect("resolve");
        for trial in 0..20 {
            let mut rng = trial_rng(4, 0, trial);
            let draw = g.draw(&mut rng, snapshot.context()).expect("draw terminates");
            let replayed = g.replay(&draw.tree, snapshot.context()).expect("replay");
            assert_eq!(draw.value, replayed);
        }
    }

    #[test]
    fn unguarded_self_reference_errors_at_the_expansion_limit() {
        use std::sync::atomic::AtomicUsize;
        use std::sync::atomic::Ordering;

        struct CountingLeaf {
            calls: Arc<AtomicUsize>,
        }

        impl ValueGenerator for CountingLeaf {
            fn draw(&self, _rng: &mut ChaCha8Rng, _cx: GenContext) -> Result<Draw, GenError> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                Ok(Draw { value: Value::Str("x".to_string()), tree: DrawTree::unit() })
            }

            fn replay(&self, tree: &DrawTree, _cx: GenContext) -> Result<Value, GenError> {
                match tree {
                    DrawTree::Product { children } if children.is_empty() => {
                        Ok(Value::Str("x".to_string()))
                    }
                    other => Err(GenError::mismatch("unit product", other)),
                }
            }
        }

        // A self-reference with no Optional or OneOf escape can never
        // terminate; the guard must cut it off, and with the same permitted
        // expansion count an escape-valve schema gets.
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = TypeRegistry::new().with_max_ref_depth(3);
        registry
            .register(TypeRef::str(), Arc::new(CountingLeaf { calls: Arc::clone(&calls) }), false)
            .expect("register");
        registry.register_schema(
            "node",
            TypeRef::record(vec![
                Field::required("label", TypeRef::str()),
                Field::required("next", TypeRef::reference("node")),
            ]),
        );
        let snapshot = registry.snapshot();
        let g = snapshot.resolve(&TypeRef::reference("node")).expect("resolve");
        let mut rng = trial_rng(6, 0, 0);
        let err = g.draw(&mut rng, snapshot.context()).expect_err("recursion limit");
        assert_eq!(err, GenError::RecursionLimit { name: "node".to_string(), limit: 3 });
        // One record body per permitted expansion was drawn before the cut.
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn path_position_strings_are_url_safe() {
        let registry = TypeRegistry::new();
        let snapshot = registry.snapshot();
        let g = snapshot.resolve_path_param(&TypeRef::str()).expect("resolve");
        for trial in 0..30 {
            let mut rng = trial_rng(8, 1, trial);
            let draw = g.draw(&mut rng, snapshot.context()).expect("draw");
            let Value::Str(s) = draw.value else { panic!("expected string") };
            assert!(s.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        }
    }
}
