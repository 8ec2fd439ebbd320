//! Named operations that may run against the root state.
//!
//! The journal records operations by name. At replay time each name is
//! looked up here to find the code to run, so every operation that was ever
//! journaled must stay registered (or be aliased after a rename).
//!
//! ## Usage
//!
//! ```
//! use prevail_core::{OperationRegistry, Value};
//!
//! let mut registry = OperationRegistry::<i64>::new();
//! registry
//!     .register("credit", |balance: &mut i64, args: &[Value]| {
//!         let amount = prevail_core::registry::integer_arg(args, 0)?;
//!         *balance += amount;
//!         Ok(Value::Integer(*balance))
//!     })
//!     .unwrap();
//! registry.alias("deposit", "credit").unwrap();
//!
//! let (name, _) = registry.resolve("deposit").unwrap();
//! assert_eq!(name, "credit");
//! ```

use crate::error::{CoreError, CoreResult, OperationError};
use prevail_codec::{is_valid_symbol, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Signature of an operation.
///
/// An operation mutates the state it is given and returns a result value.
/// If it returns an error, every mutation it made is discarded.
pub type OperationFn<S> =
    Arc<dyn Fn(&mut S, &[Value]) -> Result<Value, OperationError> + Send + Sync>;

/// Registry of operations by name.
pub struct OperationRegistry<S> {
    operations: BTreeMap<String, OperationFn<S>>,
    aliases: BTreeMap<String, String>,
    version: u64,
}

impl<S> OperationRegistry<S> {
    /// Creates an empty registry with version 1.
    #[must_use]
    pub fn new() -> Self {
        Self {
            operations: BTreeMap::new(),
            aliases: BTreeMap::new(),
            version: 1,
        }
    }

    /// Sets the registry version, reported when recovery starts.
    #[must_use]
    pub fn with_version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    /// Returns the registry version.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Registers an operation.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Config`] if `name` is not a valid symbol, or
    /// [`CoreError::DuplicateOperation`] if it is already taken.
    pub fn register<F>(&mut self, name: &str, operation: F) -> CoreResult<&mut Self>
    where
        F: Fn(&mut S, &[Value]) -> Result<Value, OperationError> + Send + Sync + 'static,
    {
        self.check_new_name(name)?;
        self.operations.insert(name.to_string(), Arc::new(operation));
        Ok(self)
    }

    /// Makes `old` resolve to the already registered operation `target`.
    ///
    /// Journals written before an operation was renamed keep replaying.
    /// New transactions through the alias are journaled under `target`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownOperation`] if `target` is not
    /// registered, or the same errors as [`register`](Self::register) for
    /// `old`.
    pub fn alias(&mut self, old: &str, target: &str) -> CoreResult<&mut Self> {
        if !self.operations.contains_key(target) {
            return Err(CoreError::UnknownOperation {
                name: target.to_string(),
            });
        }
        self.check_new_name(old)?;
        self.aliases.insert(old.to_string(), target.to_string());
        Ok(self)
    }

    /// Looks up an operation by name or alias, returning its canonical name.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownOperation`] if nothing is registered
    /// under `name`.
    pub fn resolve(&self, name: &str) -> CoreResult<(&str, &OperationFn<S>)> {
        let canonical = self.aliases.get(name).map_or(name, String::as_str);
        self.operations
            .get_key_value(canonical)
            .map(|(name, operation)| (name.as_str(), operation))
            .ok_or_else(|| CoreError::UnknownOperation {
                name: name.to_string(),
            })
    }

    /// Returns true if `name` is a registered operation or alias.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.operations.contains_key(name) || self.aliases.contains_key(name)
    }

    /// Returns the registered operation names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.operations.keys().map(String::as_str)
    }

    /// Returns the number of registered operations, not counting aliases.
    #[must_use]
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Returns true if no operation is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    fn check_new_name(&self, name: &str) -> CoreResult<()> {
        if !is_valid_symbol(name) {
            return Err(CoreError::config(format!(
                "invalid operation name: {name:?}"
            )));
        }
        if self.contains(name) {
            return Err(CoreError::DuplicateOperation {
                name: name.to_string(),
            });
        }
        Ok(())
    }
}

impl<S> Default for OperationRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> fmt::Debug for OperationRegistry<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationRegistry")
            .field("operations", &self.operations.keys().collect::<Vec<_>>())
            .field("aliases", &self.aliases)
            .field("version", &self.version)
            .finish()
    }
}

fn arg(args: &[Value], index: usize) -> Result<&Value, OperationError> {
    args.get(index)
        .ok_or_else(|| OperationError::invalid_argument(index, "a value", "nothing"))
}

/// Returns argument `index` as an integer.
///
/// # Errors
///
/// Returns an [`OperationError`] if the argument is missing or not an
/// integer.
pub fn integer_arg(args: &[Value], index: usize) -> Result<i64, OperationError> {
    let value = arg(args, index)?;
    value
        .as_integer()
        .ok_or_else(|| OperationError::invalid_argument(index, "integer", value.type_name()))
}

/// Returns argument `index` as text.
///
/// # Errors
///
/// Returns an [`OperationError`] if the argument is missing or not text.
pub fn text_arg(args: &[Value], index: usize) -> Result<&str, OperationError> {
    let value = arg(args, index)?;
    value
        .as_text()
        .ok_or_else(|| OperationError::invalid_argument(index, "text", value.type_name()))
}

/// Returns argument `index` as a boolean.
///
/// # Errors
///
/// Returns an [`OperationError`] if the argument is missing or not a
/// boolean.
pub fn bool_arg(args: &[Value], index: usize) -> Result<bool, OperationError> {
    let value = arg(args, index)?;
    value
        .as_bool()
        .ok_or_else(|| OperationError::invalid_argument(index, "bool", value.type_name()))
}

/// Fails unless exactly `expected` arguments were given.
///
/// # Errors
///
/// Returns an [`OperationError`] describing the mismatch.
pub fn expect_arity(args: &[Value], expected: usize) -> Result<(), OperationError> {
    if args.len() == expected {
        Ok(())
    } else {
        Err(OperationError::new(format!(
            "expected {expected} arguments, got {}",
            args.len()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credit(balance: &mut i64, args: &[Value]) -> Result<Value, OperationError> {
        *balance += integer_arg(args, 0)?;
        Ok(Value::Integer(*balance))
    }

    #[test]
    fn register_and_resolve() {
        let mut registry = OperationRegistry::<i64>::new();
        registry.register("credit", credit).unwrap();

        let (name, operation) = registry.resolve("credit").unwrap();
        assert_eq!(name, "credit");

        let mut balance = 5;
        let result = operation(&mut balance, &[Value::Integer(10)]).unwrap();
        assert_eq!(result, Value::Integer(15));
        assert_eq!(balance, 15);
    }

    #[test]
    fn unknown_name() {
        let registry = OperationRegistry::<i64>::new();
        assert!(matches!(
            registry.resolve("credit"),
            Err(CoreError::UnknownOperation { .. })
        ));
    }

    #[test]
    fn duplicate_name_rejected() {
        let mut registry = OperationRegistry::<i64>::new();
        registry.register("credit", credit).unwrap();
        assert!(matches!(
            registry.register("credit", credit),
            Err(CoreError::DuplicateOperation { .. })
        ));
    }

    #[test]
    fn invalid_names_rejected() {
        let mut registry = OperationRegistry::<i64>::new();
        for name in ["", "two words", "9lives", "nil", "a(b)"] {
            assert!(
                matches!(registry.register(name, credit), Err(CoreError::Config { .. })),
                "{name:?}"
            );
        }
    }

    #[test]
    fn alias_resolves_to_canonical_name() {
        let mut registry = OperationRegistry::<i64>::new();
        registry.register("account/credit", credit).unwrap();
        registry.alias("credit", "account/credit").unwrap();

        assert_eq!(registry.resolve("credit").unwrap().0, "account/credit");
        assert_eq!(registry.len(), 1);
        assert!(registry.contains("credit"));
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["account/credit"]);
    }

    #[test]
    fn alias_requires_registered_target() {
        let mut registry = OperationRegistry::<i64>::new();
        assert!(matches!(
            registry.alias("credit", "missing"),
            Err(CoreError::UnknownOperation { .. })
        ));
    }

    #[test]
    fn alias_cannot_shadow_operation() {
        let mut registry = OperationRegistry::<i64>::new();
        registry.register("credit", credit).unwrap();
        registry.register("debit", credit).unwrap();
        assert!(matches!(
            registry.alias("debit", "credit"),
            Err(CoreError::DuplicateOperation { .. })
        ));
    }

    #[test]
    fn argument_helpers() {
        let args = vec![Value::Integer(3), Value::from("x"), Value::Bool(true)];
        assert_eq!(integer_arg(&args, 0).unwrap(), 3);
        assert_eq!(text_arg(&args, 1).unwrap(), "x");
        assert!(bool_arg(&args, 2).unwrap());
        assert!(expect_arity(&args, 3).is_ok());

        let err = integer_arg(&args, 1).unwrap_err();
        assert_eq!(err.message(), "argument 1: expected integer, found text");
        assert!(integer_arg(&args, 5).is_err());
        assert!(expect_arity(&args, 1).is_err());
    }

    #[test]
    fn version_defaults_to_one() {
        let registry = OperationRegistry::<i64>::new();
        assert_eq!(registry.version(), 1);
        assert_eq!(registry.with_version(4).version(), 4);
    }
}
