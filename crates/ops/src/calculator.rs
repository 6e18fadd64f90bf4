//! Arithmetic operations over two floats, plus the `calculator://square/{number}`
//! resource.

use serde::Deserialize;
use serde_json::{json, Value};

use toolbridge_tool_runtime::{
    Arguments, InputSchema, OperationError, OperationRegistry, ParamKind, ParamSpec,
    RegistryError, ResourceTemplate,
};

/// URI template of the square resource.
pub const SQUARE_URI_TEMPLATE: &str = "calculator://square/{number}";

#[derive(Debug, Deserialize)]
struct Operands {
    a: f64,
    b: f64,
}

type BinaryOp = fn(f64, f64) -> Result<f64, OperationError>;

const OPERATIONS: &[(&str, &str, BinaryOp)] = &[
    ("add", "Add two numbers.", |a, b| Ok(a + b)),
    ("subtract", "Subtract the second number from the first.", |a, b| Ok(a - b)),
    ("multiply", "Multiply two numbers.", |a, b| Ok(a * b)),
    ("divide", "Divide the first number by the second.", divide),
    ("power", "Raise the first number to the power of the second.", |a, b| Ok(a.powf(b))),
];

fn divide(a: f64, b: f64) -> Result<f64, OperationError> {
    if b == 0.0 {
        return Err(OperationError::Failed("Cannot divide by zero.".to_string()));
    }
    Ok(a / b)
}

fn operands_schema() -> InputSchema {
    InputSchema::new()
        .param("a", ParamSpec::required(ParamKind::Float).describe("First operand"))
        .param("b", ParamSpec::required(ParamKind::Float).describe("Second operand"))
}

async fn apply(op: BinaryOp, args: Arguments) -> Result<Value, OperationError> {
    let Operands { a, b } = args.parse()?;
    let result = op(a, b)?;
    if !result.is_finite() {
        return Err(OperationError::Failed(format!(
            "Result of {a} and {b} is not a finite number."
        )));
    }
    Ok(json!(result))
}

async fn square(args: Arguments) -> Result<Value, OperationError> {
    let raw = args.get("number").and_then(Value::as_str).unwrap_or_default();
    let number: f64 = raw
        .parse()
        .map_err(|_| OperationError::InvalidInput(format!("'{raw}' is not a number")))?;
    let result = number * number;
    if !result.is_finite() {
        return Err(OperationError::Failed(format!(
            "Square of {number} is not a finite number."
        )));
    }
    Ok(json!(result))
}

/// Register `add`, `subtract`, `multiply`, `divide` and `power`, and the
/// square resource.
pub fn register(registry: &mut OperationRegistry) -> Result<(), RegistryError> {
    for &(name, description, op) in OPERATIONS {
        registry.register_fn(name, description, operands_schema(), move |args| apply(op, args))?;
    }
    registry.register_resource_fn(
        ResourceTemplate::new(SQUARE_URI_TEMPLATE, "square", "Square of a number.")
            .with_mime_type("text/plain"),
        square,
    )?;
    Ok(())
}

/// A registry holding only the calculator operations.
pub fn registry() -> Result<OperationRegistry, RegistryError> {
    let mut registry = OperationRegistry::new();
    register(&mut registry)?;
    Ok(registry)
}
