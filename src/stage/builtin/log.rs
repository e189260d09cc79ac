//! Logging stage: record the current data value and pass it through.

use crate::stage::StageDefinition;
use std::sync::Arc;
use tracing::info;

pub fn definition() -> StageDefinition {
    StageDefinition::new(
        "log",
        Arc::new(|_args, data, _view| {
            Box::pin(async move {
                let rendered =
                    serde_json::to_string_pretty(&data).unwrap_or_else(|_| data.to_string());
                info!(data = %rendered, "pipeline data");
                Ok(data)
            })
        }),
    )
}
