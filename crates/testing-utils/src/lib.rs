//! # Scheduler Testing Utils
//!
//! 调度引擎各 crate 共享的测试工具：
//!
//! - **Mock Repositories**: 仓储接口的内存实现，可注入存储故障
//! - **Test Handlers**: 记录调用、失败、panic、阻塞等行为各异的处理器
//! - **Test Data Builders**: 带合理默认值的实体构建器
//! - **Helpers**: 等待异步状态变化的轮询工具
//!
//! ```toml
//! [dev-dependencies]
//! scheduler-testing-utils = { path = "../testing-utils" }
//! ```

pub mod builders;
pub mod handlers;
pub mod helpers;
pub mod mocks;

pub use builders::*;
pub use handlers::*;
pub use helpers::*;
pub use mocks::*;
