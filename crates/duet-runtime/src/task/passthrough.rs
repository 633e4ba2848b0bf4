use async_trait::async_trait;
use serde_json::Value;

use crate::error::TaskError;
use crate::registry::{TaskContext, TaskHandler};

/// Returns its merged input unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughTask;

#[async_trait]
impl TaskHandler for PassthroughTask {
    async fn call(&self, ctx: TaskContext, input: Value) -> Result<Value, TaskError> {
        ctx.report_progress(ctx.progress_weight()).await;
        Ok(input)
    }
}

#[cfg(test)]
mod tests {
    use duet_nats::job::JobId;
    use serde_json::{Map, json};

    use super::*;
    use crate::graph::NodeId;

    #[tokio::test]
    async fn echoes_input() {
        let ctx = TaskContext::new(JobId::new(), NodeId::from("p"), Map::new(), 0.1);
        let output = PassthroughTask.call(ctx, json!({ "a": 1 })).await.unwrap();
        assert_eq!(output, json!({ "a": 1 }));
    }
}
