//! The set of operations and resources one server publishes.

use crate::operation::{
    Arguments, InvocationResult, OperationDescriptor, OperationError, OperationHandler,
};
use crate::resource::ResourceTemplate;
use crate::schema::{InputSchema, ValidationError};
use indexmap::IndexMap;
use serde_json::{Map, Value};
use std::future::Future;
use std::sync::Arc;

use crate::operation::handler_fn;

struct Operation {
    descriptor: OperationDescriptor,
    handler: Arc<dyn OperationHandler>,
}

struct Resource {
    template: ResourceTemplate,
    handler: Arc<dyn OperationHandler>,
}

/// Holds the named operations a server exposes, in registration order.
///
/// Built once at startup and then shared read-only; there is no internal
/// locking, so registration and invocation must not overlap.
pub struct OperationRegistry {
    operations: IndexMap<String, Operation>,
    resources: IndexMap<String, Resource>,
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self {
            operations: IndexMap::new(),
            resources: IndexMap::new(),
        }
    }

    /// Register an operation. Returns error if name already registered.
    pub fn register(
        &mut self,
        descriptor: OperationDescriptor,
        handler: impl OperationHandler + 'static,
    ) -> Result<(), RegistryError> {
        if self.operations.contains_key(&descriptor.name) {
            return Err(RegistryError::DuplicateName(descriptor.name));
        }
        tracing::debug!(operation = %descriptor.name, "Registered operation");
        self.operations.insert(
            descriptor.name.clone(),
            Operation {
                descriptor,
                handler: Arc::new(handler),
            },
        );
        Ok(())
    }

    /// Register an async closure as an operation.
    pub fn register_fn<F, Fut>(
        &mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: InputSchema,
        f: F,
    ) -> Result<(), RegistryError>
    where
        F: Fn(Arguments) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, OperationError>> + Send + 'static,
    {
        self.register(
            OperationDescriptor::new(name, description, input_schema),
            handler_fn(f),
        )
    }

    /// Look up an operation's descriptor by name.
    pub fn get(&self, name: &str) -> Option<&OperationDescriptor> {
        self.operations.get(name).map(|op| &op.descriptor)
    }

    /// All descriptors, in registration order.
    pub fn list(&self) -> Vec<OperationDescriptor> {
        self.operations
            .values()
            .map(|op| op.descriptor.clone())
            .collect()
    }

    /// Validate `arguments` and run the named operation.
    ///
    /// Handler errors come back as `Ok(InvocationResult::Failure)`; only an
    /// unknown name or invalid arguments produce `Err`.
    pub async fn invoke(
        &self,
        name: &str,
        arguments: Map<String, Value>,
    ) -> Result<InvocationResult, RegistryError> {
        let op = self
            .operations
            .get(name)
            .ok_or_else(|| RegistryError::UnknownOperation(name.to_string()))?;

        op.descriptor
            .input_schema
            .validate(&arguments)
            .map_err(|source| RegistryError::InvalidArguments {
                operation: name.to_string(),
                source,
            })?;

        match op.handler.call(Arguments::new(arguments)).await {
            Ok(value) => Ok(InvocationResult::Success { value }),
            Err(e) => {
                tracing::debug!(operation = %name, error = %e, "Operation failed");
                Ok(InvocationResult::Failure {
                    message: e.to_string(),
                })
            }
        }
    }

    /// Register a resource template. The handler receives the URI's
    /// variable bindings as string arguments.
    pub fn register_resource(
        &mut self,
        template: ResourceTemplate,
        handler: impl OperationHandler + 'static,
    ) -> Result<(), RegistryError> {
        if self.resources.contains_key(&template.uri_template) {
            return Err(RegistryError::DuplicateResource(template.uri_template));
        }
        tracing::debug!(uri_template = %template.uri_template, "Registered resource");
        self.resources.insert(
            template.uri_template.clone(),
            Resource {
                template,
                handler: Arc::new(handler),
            },
        );
        Ok(())
    }

    /// Register an async closure as a resource.
    pub fn register_resource_fn<F, Fut>(
        &mut self,
        template: ResourceTemplate,
        f: F,
    ) -> Result<(), RegistryError>
    where
        F: Fn(Arguments) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, OperationError>> + Send + 'static,
    {
        self.register_resource(template, handler_fn(f))
    }

    /// All resource templates, in registration order.
    pub fn resource_templates(&self) -> Vec<ResourceTemplate> {
        self.resources
            .values()
            .map(|r| r.template.clone())
            .collect()
    }

    /// Read the resource at `uri` through the first template that matches it.
    ///
    /// As with [`invoke`](Self::invoke), handler errors come back as
    /// `Ok(InvocationResult::Failure)`.
    pub async fn read_resource(&self, uri: &str) -> Result<InvocationResult, RegistryError> {
        let (resource, bindings) = self
            .resources
            .values()
            .find_map(|r| r.template.match_uri(uri).map(|b| (r, b)))
            .ok_or_else(|| RegistryError::UnknownResource(uri.to_string()))?;

        match resource.handler.call(Arguments::new(bindings)).await {
            Ok(value) => Ok(InvocationResult::Success { value }),
            Err(e) => {
                tracing::debug!(uri = %uri, error = %e, "Resource read failed");
                Ok(InvocationResult::Failure {
                    message: e.to_string(),
                })
            }
        }
    }

    /// Number of registered operations.
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

impl Default for OperationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Operation with name '{0}' is already registered")]
    DuplicateName(String),
    #[error("Unknown operation: {0}")]
    UnknownOperation(String),
    #[error("Resource template '{0}' is already registered")]
    DuplicateResource(String),
    #[error("Unknown resource: {0}")]
    UnknownResource(String),
    #[error("Invalid arguments for '{operation}': {source}")]
    InvalidArguments {
        operation: String,
        #[source]
        source: ValidationError,
    },
}
