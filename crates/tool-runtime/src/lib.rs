pub mod schema;
pub mod operation;
pub mod registry;
pub mod resource;
pub mod tool;

pub use schema::{InputSchema, ParamKind, ParamSpec, SchemaError, ValidationError};
pub use operation::{
    handler_fn, Arguments, InvocationResult, OperationDescriptor, OperationError,
    OperationHandler,
};
pub use registry::{OperationRegistry, RegistryError};
pub use resource::ResourceTemplate;
pub use tool::{Tool, ToolDefinition, ToolError, ToolResult};
