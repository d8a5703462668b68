use lastmile_domain::{AlertSink, AssignmentAlert};
use tracing::info;

/// 没有震动马达和语音引擎的环境下，把提醒写入日志
#[derive(Debug, Clone, Default)]
pub struct TracingAlertSink;

impl AlertSink for TracingAlertSink {
    fn alert(&self, alert: &AssignmentAlert) {
        info!(
            delivery_id = %alert.delivery_id,
            vibration = ?alert.vibration_pattern_ms,
            locale = %alert.speech_locale,
            "{}",
            alert.spoken_text
        );
    }
}
