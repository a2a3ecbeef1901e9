use schemars::schema::RootSchema;
use schemars::schema_for;

use crate::model::Config;

/// Emit the JSON Schema for generation configs.
pub fn config_json_schema() -> RootSchema {
    schema_for!(Config)
}
