//! Custom filters for configuration templates
//!
//! - `with_port`: Append a port to every address in a list
//! - `pybool`: Render a boolean the way Python ini parsers expect
//! - `required`: Fail if value is undefined or empty

use minijinja::value::ViaDeserialize;
use minijinja::{Error, ErrorKind, Value};

/// Append `:port` to every address
///
/// Usage: `{{ deps.zookeeper.addresses | with_port(2181) | join(",") }}`
pub fn with_port(addresses: ViaDeserialize<Vec<String>>, port: u16) -> Vec<String> {
    addresses
        .0
        .iter()
        .map(|address| format!("{address}:{port}"))
        .collect()
}

/// Python-style boolean
///
/// Usage: `{{ params.start_rpc | pybool }}`
pub fn pybool(value: bool) -> &'static str {
    if value {
        "True"
    } else {
        "False"
    }
}

/// Required filter - fails if value is undefined, none or an empty string
///
/// Usage: `{{ creds.password | required }}`
pub fn required(value: Value) -> Result<Value, Error> {
    if value.is_undefined() || value.is_none() {
        return Err(Error::new(
            ErrorKind::UndefinedError,
            "required value is undefined",
        ));
    }
    if value.as_str().is_some_and(str::is_empty) {
        return Err(Error::new(
            ErrorKind::InvalidOperation,
            "required value is empty",
        ));
    }
    Ok(value)
}
