//! Attaches caller parameters to a [`Command`].

use crate::types::{Command, OutputSpec, Parameter, Params};

/// Appends one input parameter per entry, in insertion order.
/// Absent values arrive here as `SqlValue::Null`; names are not deduplicated.
pub fn bind_parameters(command: &mut Command, params: &Params) {
    command.parameters.extend(
        params
            .iter()
            .map(|(name, value)| Parameter::input(name, value.clone())),
    );
}

/// Appends one output-direction parameter per declared output.
pub fn bind_output_parameters(command: &mut Command, outputs: &OutputSpec) {
    command.parameters.extend(
        outputs
            .iter()
            .map(|(name, sql_type)| Parameter::output(name, sql_type)),
    );
}
