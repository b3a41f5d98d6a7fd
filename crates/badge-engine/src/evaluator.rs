//! 条件评估器
//!
//! 实现目录条件各操作符的评估逻辑，支持数值、字符串、数组等
//! 多种 JSON 数据类型的比较。

use serde_json::Value;

use quest_shared::error::{QuestError, Result};

use crate::catalog::Operator;

/// 条件评估器
pub struct ConditionEvaluator;

impl ConditionEvaluator {
    /// 评估单条条件
    ///
    /// # Arguments
    /// * `field_value` - 从评估上下文中取到的字段值
    /// * `operator` - 操作符
    /// * `expected_value` - 目录中声明的期望值
    ///
    /// 字段不存在时条件不成立（返回 false 而非报错）：
    /// 缺字段意味着该事件/用户状态还没有达到条件关心的阶段。
    pub fn evaluate(
        field_value: Option<&Value>,
        operator: Operator,
        expected_value: &Value,
    ) -> Result<bool> {
        let field_value = match field_value {
            Some(v) => v,
            None => return Ok(false),
        };

        match operator {
            Operator::Eq => Self::eq(field_value, expected_value),
            Operator::Neq => Self::eq(field_value, expected_value).map(|r| !r),
            Operator::Gt => Self::compare(field_value, expected_value, |a, b| a > b),
            Operator::Gte => Self::compare(field_value, expected_value, |a, b| a >= b),
            Operator::Lt => Self::compare(field_value, expected_value, |a, b| a < b),
            Operator::Lte => Self::compare(field_value, expected_value, |a, b| a <= b),
            Operator::In => Self::in_list(field_value, expected_value),
            Operator::Contains => Self::contains(field_value, expected_value),
        }
    }

    /// 相等比较
    fn eq(field: &Value, expected: &Value) -> Result<bool> {
        // 数值比较统一转为浮点数，避免整数和浮点数比较失败（如 100 == 100.0）
        if let (Some(f1), Some(f2)) = (Self::as_f64(field), Self::as_f64(expected)) {
            return Ok((f1 - f2).abs() < f64::EPSILON);
        }

        Ok(field == expected)
    }

    /// 数值比较
    fn compare<F>(field: &Value, expected: &Value, cmp: F) -> Result<bool>
    where
        F: Fn(f64, f64) -> bool,
    {
        let field_num = Self::as_f64(field).ok_or_else(|| Self::type_mismatch("number", field))?;
        let expected_num =
            Self::as_f64(expected).ok_or_else(|| Self::type_mismatch("number", expected))?;

        Ok(cmp(field_num, expected_num))
    }

    /// 列表包含检查 (in)
    fn in_list(field: &Value, expected: &Value) -> Result<bool> {
        let arr = expected
            .as_array()
            .ok_or_else(|| Self::type_mismatch("array", expected))?;

        for item in arr {
            if Self::eq(field, item)? {
                return Ok(true);
            }
        }

        Ok(false)
    }

    /// 字符串/数组包含检查
    fn contains(field: &Value, expected: &Value) -> Result<bool> {
        match field {
            Value::String(s) => {
                let substr = expected
                    .as_str()
                    .ok_or_else(|| Self::type_mismatch("string", expected))?;
                Ok(s.contains(substr))
            }
            Value::Array(arr) => {
                for item in arr {
                    if Self::eq(item, expected)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            _ => Err(Self::type_mismatch("string or array", field)),
        }
    }

    /// 尝试将 Value 转换为 f64
    fn as_f64(value: &Value) -> Option<f64> {
        match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    fn type_mismatch(expected: &str, actual: &Value) -> QuestError {
        QuestError::RequirementEvaluation(format!(
            "类型不匹配: 期望 {expected}, 实际 {}",
            Self::type_name(actual)
        ))
    }

    /// 获取值的类型名称
    fn type_name(value: &Value) -> &'static str {
        match value {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        }
    }
}
