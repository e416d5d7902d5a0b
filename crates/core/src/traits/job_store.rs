use std::path::Path;

use async_trait::async_trait;

use crate::errors::AggregatorResult;
use crate::models::{Job, JobOutput};

/// 任务存储/队列抽象接口
///
/// 提交、执行与轮询之间的所有协调都经由该接口完成；后端实现
/// （内存、SQLite）可以互换而不影响Worker与状态解析器。
///
/// 注意：当前没有可见性超时机制——Worker在持有已出队任务时崩溃，
/// 该任务不会被重新入队。是否重试属于产品决策，这里不做假设。
#[async_trait]
pub trait JobStore: Send + Sync {
    /// 提交一个新任务，入队为QUEUED状态并返回完整的任务记录。
    ///
    /// 提交时即校验输入文件可读（fail-fast），校验失败任务不会被创建。
    async fn enqueue(&self, input_path: &Path) -> AggregatorResult<Job>;

    /// 按FIFO提交顺序取出下一个QUEUED任务，无任务时挂起等待。
    ///
    /// 出队即租约：同一个任务绝不会被交付给两个消费者。
    async fn dequeue(&self) -> AggregatorResult<Job>;

    /// 读取任务快照，不存在时返回None。只读操作，并发安全，从不阻塞。
    async fn get_job(&self, job_id: &str) -> AggregatorResult<Option<Job>>;

    /// QUEUED → ACTIVE
    async fn mark_active(&self, job_id: &str) -> AggregatorResult<()>;

    /// ACTIVE → COMPLETED，写入输出位置与指标
    async fn mark_completed(&self, job_id: &str, output: JobOutput) -> AggregatorResult<()>;

    /// ACTIVE → FAILED，写入错误描述
    async fn mark_failed(&self, job_id: &str, error: String) -> AggregatorResult<()>;

    /// 为已完成任务认领输入清理权，整个生命周期内恰好返回一次true。
    ///
    /// 并发轮询（或api/worker分进程部署）下的恰好一次语义由存储层的
    /// 原子比较交换保证，而不是解析器本地状态。
    async fn claim_input_cleanup(&self, job_id: &str) -> AggregatorResult<bool>;

    /// 回收已出租但从未交付的任务（出队被取消、或上次进程退出时
    /// 在途的租约），使其重新可被出队，返回回收数量。
    ///
    /// 只应在本进程所有消费者停止后调用；多Worker进程共享同一存储
    /// 时，由最后退出的进程负责回收。
    async fn recover_undelivered(&self) -> AggregatorResult<u32>;

    /// 当前排队中的任务数量
    async fn queue_depth(&self) -> AggregatorResult<u32>;
}
