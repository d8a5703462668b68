use serde::{Deserialize, Serialize};

use crate::validation::{ConfigValidator, ValidationUtils};

/// 调度评分策略，全部为可调整的业务参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringPolicy {
    pub base_score: f64,
    /// 每完成一单扣除的分数（负载均衡）
    pub delivery_load_penalty: f64,
    /// 超过该重量（千克）视为重货
    pub heavy_weight_threshold_kg: f64,
    /// 区域内有重货且快递员开汽车
    pub heavy_car_bonus: f64,
    /// 区域内没有重货且快递员骑摩托车
    pub light_motorcycle_bonus: f64,
    pub rating_multiplier: f64,
    /// 快递员没有评分时使用
    pub default_rating: f64,
    pub busy_penalty: f64,
    /// 用于区域分组的地址前缀长度
    pub area_prefix_chars: usize,
    pub km_per_delivery: f64,
    pub minutes_per_delivery: u32,
}

impl Default for ScoringPolicy {
    fn default() -> Self {
        Self {
            base_score: 100.0,
            delivery_load_penalty: 2.0,
            heavy_weight_threshold_kg: 5.0,
            heavy_car_bonus: 20.0,
            light_motorcycle_bonus: 15.0,
            rating_multiplier: 5.0,
            default_rating: 5.0,
            busy_penalty: 50.0,
            area_prefix_chars: 6,
            km_per_delivery: 3.5,
            minutes_per_delivery: 25,
        }
    }
}

impl ConfigValidator for ScoringPolicy {
    fn validate(&self) -> crate::ConfigResult<()> {
        for (value, field) in [
            (self.delivery_load_penalty, "dispatcher.scoring.delivery_load_penalty"),
            (self.heavy_weight_threshold_kg, "dispatcher.scoring.heavy_weight_threshold_kg"),
            (self.heavy_car_bonus, "dispatcher.scoring.heavy_car_bonus"),
            (self.light_motorcycle_bonus, "dispatcher.scoring.light_motorcycle_bonus"),
            (self.rating_multiplier, "dispatcher.scoring.rating_multiplier"),
            (self.default_rating, "dispatcher.scoring.default_rating"),
            (self.busy_penalty, "dispatcher.scoring.busy_penalty"),
            (self.km_per_delivery, "dispatcher.scoring.km_per_delivery"),
        ] {
            ValidationUtils::validate_non_negative(value, field)?;
        }

        if !self.base_score.is_finite() {
            return Err(crate::ConfigError::Validation(
                "dispatcher.scoring.base_score 必须是有限数值".to_string(),
            ));
        }
        if self.area_prefix_chars == 0 {
            return Err(crate::ConfigError::Validation(
                "dispatcher.scoring.area_prefix_chars 必须大于0".to_string(),
            ));
        }
        Ok(())
    }
}
