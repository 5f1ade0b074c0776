//! 日志管道指标收集模块
//!
//! 指标名称统一以 `logchain_` 为前缀。

use metrics::{counter, gauge, histogram};

/// 记录成功解码的帧
pub fn record_frame_decoded() {
    counter!("logchain_frames_decoded_total").increment(1);
}

/// 记录解码器重同步 (坏帧 / 超长帧)
pub fn record_decode_resync(kind: &'static str) {
    counter!("logchain_decode_resync_total", "kind" => kind).increment(1);
}

/// 记录写入本地持久化存储的记录
pub fn record_durable_record() {
    counter!("logchain_durable_records_total").increment(1);
}

/// 记录一次批量投递
///
/// `lines` 为该批次合并的行数。
pub fn record_batch_delivered(sink_name: &str, lines: usize) {
    counter!(
        "logchain_batches_delivered_total",
        "sink" => sink_name.to_string()
    )
    .increment(1);
    histogram!("logchain_batch_lines").record(lines as f64);
}

/// 记录单个 sink 的投递结果
///
/// `status`: success / failure / dropped / timeout
pub fn record_delivery(sink_name: &str, status: &'static str) {
    counter!(
        "logchain_delivery_total",
        "sink" => sink_name.to_string(),
        "status" => status
    )
    .increment(1);
}

/// 记录未能投递而被放弃的遥测行
///
/// `reason`: rejected / retries_exhausted / retained_bytes / closed
pub fn record_lines_dropped(reason: &'static str, lines: usize) {
    counter!("logchain_telemetry_lines_dropped_total", "reason" => reason)
        .increment(lines as u64);
}

/// 当前活跃会话数
pub fn set_active_sessions(count: usize) {
    gauge!("logchain_active_sessions").set(count as f64);
}

/// 记录回放输出的记录数
pub fn record_replay_records(count: u64) {
    counter!("logchain_replay_records_total").increment(count);
}

/// 统计摘要
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StatsSummary {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
}

impl From<&RunningStats> for StatsSummary {
    fn from(stats: &RunningStats) -> Self {
        Self {
            count: stats.count,
            min: stats.min,
            max: stats.max,
            mean: stats.mean(),
        }
    }
}

impl std::fmt::Display for StatsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.count == 0 {
            write!(f, "N/A")
        } else {
            write!(
                f,
                "min={:.1}, max={:.1}, mean={:.2} (n={})",
                self.min, self.max, self.mean, self.count
            )
        }
    }
}

/// 在线统计 (计数 / 最小 / 最大 / 均值)
#[derive(Debug, Clone, Default)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    min: f64,
    max: f64,
}

impl RunningStats {
    /// 添加新值
    pub fn push(&mut self, value: f64) {
        self.count += 1;

        if self.count == 1 {
            self.min = value;
            self.max = value;
            self.mean = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
            self.mean += (value - self.mean) / self.count as f64;
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.mean
        }
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    pub fn summary(&self) -> StatsSummary {
        StatsSummary::from(self)
    }
}
