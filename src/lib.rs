//! Tutor - AI 辅导会话编排服务
//!
//! 模块划分：
//! - **api**: HTTP 接口层（axum 路由与 DTO）
//! - **completion**: 完成标记检测与剥离
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **error**: 领域错误与 HTTP 状态码映射
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / Mock）
//! - **prompt**: 个性化 System 提示组装
//! - **retry**: 确定性指数退避重试执行器
//! - **session**: 会话状态机、消息存储（SQLite / 内存）与编排器
//! - **upstream**: 进度后端网关（带重试的类型化调用）

pub mod api;
pub mod completion;
pub mod config;
pub mod error;
pub mod llm;
pub mod prompt;
pub mod retry;
pub mod session;
pub mod upstream;
