//! DSP module
//!
//! Built-in signal generators. Currently just the parameter generator;
//! concrete voices bring their own `RenderNode` implementations.

pub mod param;

pub use param::{ParamChange, ParamCurve, ParamHandle, ParamNode, ParamSpec};
