// Free-form record document used by the CLI

use docsaga_core::Document;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A JSON object stored in the `records` collection
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Record {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    /// Integer field value; a missing field counts as zero
    pub fn int_field(&self, field: &str) -> Option<i64> {
        match self.fields.get(field) {
            None => Some(0),
            Some(value) => value.as_i64(),
        }
    }
}

impl Document for Record {
    const COLLECTION: &'static str = "records";
}
