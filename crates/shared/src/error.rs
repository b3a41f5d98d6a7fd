//! 统一错误处理模块
//!
//! 定义奖励核心所有共享的错误类型，使用 thiserror 提供良好的错误信息。

use thiserror::Error;

/// 系统错误类型
#[derive(Debug, Error)]
pub enum QuestError {
    // ==================== 事件总线错误 ====================
    #[error("无效的处理器: {name}")]
    InvalidHandler { name: String },

    #[error("事件格式错误: {0}")]
    MalformedEvent(String),

    #[error("处理器执行超时: {handler}")]
    HandlerTimeout { handler: String },

    // ==================== 规则引擎错误 ====================
    #[error("用户状态不可用: user_id={user_id}")]
    UserStateUnavailable { user_id: String },

    #[error("徽章条件解析失败: {0}")]
    RequirementParse(String),

    #[error("徽章条件评估失败: {0}")]
    RequirementEvaluation(String),

    // ==================== 存储协作方错误 ====================
    #[error("存储访问失败: {0}")]
    Repository(String),

    // ==================== 配置错误 ====================
    #[error("配置错误: {0}")]
    Config(String),

    // ==================== 通用错误 ====================
    #[error("JSON 序列化错误: {0}")]
    Json(#[from] serde_json::Error),

    #[error("内部错误: {0}")]
    Internal(String),
}

/// 错误结果类型别名
pub type Result<T> = std::result::Result<T, QuestError>;

impl QuestError {
    /// 获取错误码
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidHandler { .. } => "INVALID_HANDLER",
            Self::MalformedEvent(_) => "MALFORMED_EVENT",
            Self::HandlerTimeout { .. } => "HANDLER_TIMEOUT",
            Self::UserStateUnavailable { .. } => "USER_STATE_UNAVAILABLE",
            Self::RequirementParse(_) => "REQUIREMENT_PARSE_FAILED",
            Self::RequirementEvaluation(_) => "REQUIREMENT_EVALUATION_FAILED",
            Self::Repository(_) => "REPOSITORY_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Json(_) => "JSON_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// 是否为可重试错误
    ///
    /// 存储协作方的瞬时故障可以重试；配置、格式类错误重试无意义。
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Repository(_) | Self::UserStateUnavailable { .. } | Self::HandlerTimeout { .. }
        )
    }
}
