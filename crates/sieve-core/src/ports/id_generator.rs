//! IdGenerator port - ID 生成の抽象化

use std::sync::Arc;

use crate::domain::ids::{JobId, TaskId};
use crate::ports::Clock;
use ulid::Ulid;

pub trait IdGenerator: Send + Sync {
    fn generate_job_id(&self) -> JobId;

    fn generate_task_id(&self) -> TaskId;
}

/// UlidGenerator はタイムスタンプ部分を注入された Clock から取る
pub struct UlidGenerator {
    clock: Arc<dyn Clock>,
}

impl UlidGenerator {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    fn next(&self) -> Ulid {
        let timestamp_ms = self.clock.now().timestamp_millis().max(0) as u64;
        Ulid::from_parts(timestamp_ms, rand::random())
    }
}

impl IdGenerator for UlidGenerator {
    fn generate_job_id(&self) -> JobId {
        JobId::from(self.next())
    }

    fn generate_task_id(&self) -> TaskId {
        TaskId::from(self.next())
    }
}
