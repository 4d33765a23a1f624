//! Configuration types for the obfuscator.

use serde::{Deserialize, Serialize};

/// The fixed mutation recipe applied to every code object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipeConfig {
    /// Sequence index of the node the payload is spliced after
    pub anchor_index: usize,
    /// How many copies of the payload are inserted
    pub repetitions: usize,
    /// Simulate the payload on a symbolic stack before inserting it
    pub verify_payload: bool,
}

impl Default for RecipeConfig {
    fn default() -> Self {
        Self {
            anchor_index: 1,
            repetitions: 2,
            verify_payload: true,
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArmorConfig {
    pub recipe: RecipeConfig,
    /// Prefix prepended to the input file name to form the output name
    pub output_prefix: String,
}

impl Default for ArmorConfig {
    fn default() -> Self {
        Self {
            recipe: RecipeConfig::default(),
            output_prefix: "NEW-".to_string(),
        }
    }
}

impl ArmorConfig {
    pub fn from_json(json: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Output file name for a given input file name
    pub fn output_name(&self, input_name: &str) -> String {
        format!("{}{}", self.output_prefix, input_name)
    }
}
