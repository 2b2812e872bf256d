//! # Operation Registry
//!
//! Maps operation names to handlers. Every handler runs against a
//! [`StoreView`] and returns the inverse operation that exactly undoes it.

use crate::errors::OperationError;
use crate::operations;
use crate::position::PositionMapping;
use crate::store::StoreView;
use folio_common::Node;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;

/// Wire form of an operation: `{"type": "set-text", "payload": {...}}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    #[serde(rename = "type")]
    pub op_type: String,

    #[serde(default)]
    pub payload: Value,
}

impl Operation {
    pub fn new(op_type: impl Into<String>, payload: Value) -> Self {
        Self {
            op_type: op_type.into(),
            payload,
        }
    }

    /// Encode a typed payload. A payload that cannot be encoded becomes
    /// `null` and is rejected when executed.
    pub fn typed<T: TypedOperation>(payload: &T::Payload) -> Self {
        Self::new(
            T::NAME,
            serde_json::to_value(payload).unwrap_or(Value::Null),
        )
    }
}

/// What a successful operation produced
#[derive(Debug, Clone, PartialEq)]
pub struct OperationOutcome {
    /// Resulting node, for operations that produce one
    pub data: Option<Node>,

    /// Operation that restores every node this one touched
    pub inverse: Operation,

    pub mapping: PositionMapping,
}

impl OperationOutcome {
    pub fn new(inverse: Operation) -> Self {
        Self {
            data: None,
            inverse,
            mapping: PositionMapping::new(),
        }
    }

    pub fn with_data(mut self, node: Option<Node>) -> Self {
        self.data = node;
        self
    }

    pub fn with_mapping(mut self, mapping: PositionMapping) -> Self {
        self.mapping = mapping;
        self
    }
}

/// Trait for operation handlers
///
/// Each handler must:
/// - Read and write only through the view
/// - Validate the nodes it changed before returning
/// - Return an inverse that restores them exactly
pub trait OperationHandler: Send + Sync {
    fn name(&self) -> &str;

    fn execute(
        &self,
        payload: &Value,
        view: &mut StoreView<'_>,
    ) -> Result<OperationOutcome, OperationError>;
}

/// Operation with a typed, serde-decoded payload
pub trait TypedOperation: Send + Sync + 'static {
    const NAME: &'static str;

    type Payload: Serialize + DeserializeOwned;

    fn apply(
        payload: Self::Payload,
        view: &mut StoreView<'_>,
    ) -> Result<OperationOutcome, OperationError>;
}

struct Typed<T>(PhantomData<fn() -> T>);

impl<T: TypedOperation> OperationHandler for Typed<T> {
    fn name(&self) -> &str {
        T::NAME
    }

    fn execute(
        &self,
        payload: &Value,
        view: &mut StoreView<'_>,
    ) -> Result<OperationOutcome, OperationError> {
        let payload = T::Payload::deserialize(payload).map_err(|e| {
            OperationError::InvalidPayload {
                op: T::NAME.to_string(),
                reason: e.to_string(),
            }
        })?;
        T::apply(payload, view)
    }
}

pub struct OperationRegistry {
    handlers: HashMap<String, Box<dyn OperationHandler>>,
}

impl OperationRegistry {
    /// Registry without any operations
    pub fn empty() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Registry with every built-in operation
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register_typed::<operations::CreateNode>();
        registry.register_typed::<operations::DeleteNode>();
        registry.register_typed::<operations::SetText>();
        registry.register_typed::<operations::InsertText>();
        registry.register_typed::<operations::DeleteText>();
        registry.register_typed::<operations::SetAttrs>();
        registry.register_typed::<operations::SetAttr>();
        registry.register_typed::<operations::ApplyMark>();
        registry.register_typed::<operations::RemoveMark>();
        registry.register_typed::<operations::ToggleMark>();
        registry.register_typed::<operations::MoveNode>();
        registry
    }

    /// Add a handler, replacing any handler of the same name
    pub fn register<H>(&mut self, handler: H) -> Option<Box<dyn OperationHandler>>
    where
        H: OperationHandler + 'static,
    {
        let name = handler.name().to_string();
        tracing::debug!(operation = %name, "[OperationRegistry] register");
        self.handlers.insert(name, Box::new(handler))
    }

    pub fn register_typed<T: TypedOperation>(&mut self) {
        self.register(Typed::<T>(PhantomData));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn execute(
        &self,
        op: &Operation,
        view: &mut StoreView<'_>,
    ) -> Result<OperationOutcome, OperationError> {
        let handler = self
            .handlers
            .get(&op.op_type)
            .ok_or_else(|| OperationError::UnknownOperation(op.op_type.clone()))?;
        handler.execute(&op.payload, view)
    }
}

impl Default for OperationRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl fmt::Debug for OperationRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationRegistry")
            .field("operations", &self.names())
            .finish()
    }
}
