//! Init process description.

use serde::{Deserialize, Serialize};

use crate::error::{ContainerError, Result};

/// The command a jail runs as its init process.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitSpec {
    /// Program and arguments, resolved inside the jail.
    pub args: Vec<String>,
}

impl InitSpec {
    /// Creates an init spec from program arguments.
    pub fn new<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Validates the init spec.
    ///
    /// # Errors
    ///
    /// Returns an error if no program is given.
    pub fn validate(&self) -> Result<()> {
        match self.args.first() {
            Some(program) if !program.is_empty() => Ok(()),
            _ => Err(ContainerError::ConfigInvalid(
                "init process args must not be empty".to_string(),
            )),
        }
    }
}
