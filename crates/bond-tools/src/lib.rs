//! Local tool registry and built-in tools for Bond.

mod calculator;
mod function;
mod registry;

pub use calculator::{CalculatorTool, evaluate};
pub use function::FunctionTool;
pub use registry::ToolRegistry;
