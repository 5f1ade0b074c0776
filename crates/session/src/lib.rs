//! # Session
//!
//! 日志流会话管理。
//!
//! 负责：
//! - 每个容器日志流一个消费任务：解码 → 持久化 → 批量投递
//! - 会话状态机 (Created → Running → Draining → Closed)
//! - 会话注册表 (handle / 容器 id 双索引，同一 handle 至多一个会话)
//! - Tail 回放：将持久化记录重新编码为帧输出
//!
//! ## 使用示例
//!
//! ```ignore
//! use session::SessionRegistry;
//!
//! let registry = SessionRegistry::new(store_root, pipeline);
//! let session = registry.start(handle.clone(), &info, session_config).await?;
//!
//! // later
//! registry.stop(&handle).await;
//! session.wait_closed().await;
//! ```

mod accumulator;
mod error;
mod registry;
mod replay;
mod session;
mod stats;

pub use accumulator::{BatchAccumulator, FlushReason};
pub use error::{Result, SessionError};
pub use registry::SessionRegistry;
pub use replay::{write_replay, TailReplay};
pub use session::{Session, SessionState};
pub use stats::{SessionStats, SessionStatsSnapshot};
