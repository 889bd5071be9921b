//! 会话 / 服务配置模型
//!
//! 每种采集模式对应一个配置结构体，公共字段以组合方式嵌入：
//!
//! ```text
//! CommonFields   (sensors, sweep_rate)
//! ServiceFields  (gain, range_start, range_length, experimental_stitching)
//! DenseFields    (running_average_factor)           ← 仅 envelope / iq
//! ```
//!
//! 所有写入在赋值时立即校验，失败的写入不会改变任何可观察状态。
//! 共享的校验逻辑通过 [`ServiceSettings`] / [`DenseSettings`] 的默认方法提供。

use num_enum::{IntoPrimitive, TryFromPrimitive};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// ============================================================================
// 错误类型
// ============================================================================

/// 配置错误（本地校验，永远不会到达设备）
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// 字段名不属于该模式的配置（或为只读字段）
    #[error("{mode} config has no setting '{field}'")]
    InvalidField { mode: Mode, field: String },

    /// 字段值不满足自身约束（范围/类型/枚举）
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    /// 违反跨字段约束
    #[error("Invalid combination: {0}")]
    InvalidCombination(String),

    /// 序列化时必需字段未设置
    #[error("Required setting '{0}' is not set")]
    MissingField(&'static str),
}

impl ConfigError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            field,
            reason: reason.into(),
        }
    }
}

// ============================================================================
// 模式与枚举
// ============================================================================

/// 采集模式
///
/// 判别值即 `MODE_SELECTION` 寄存器的取值。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "snake_case")
)]
#[repr(u32)]
pub enum Mode {
    PowerBin = 0x01,
    Envelope = 0x02,
    Iq = 0x03,
    Sparse = 0x04,
    DistancePeakFixThreshold = 0x100,
}

impl Mode {
    pub const ALL: [Mode; 5] = [
        Mode::PowerBin,
        Mode::Envelope,
        Mode::Iq,
        Mode::Sparse,
        Mode::DistancePeakFixThreshold,
    ];

    /// 协议中使用的模式名
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::PowerBin => "power_bin",
            Mode::Envelope => "envelope",
            Mode::Iq => "iq",
            Mode::Sparse => "sparse",
            Mode::DistancePeakFixThreshold => "distance_peak_fix_threshold",
        }
    }

    /// 该模式的帧是否为 [传感器 × 采样点] 网格
    pub fn is_grid(self) -> bool {
        !matches!(self, Mode::DistancePeakFixThreshold)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Mode::ALL
            .into_iter()
            .find(|mode| mode.as_str() == s)
            .ok_or_else(|| ConfigError::invalid("mode", format!("unknown mode '{}'", s)))
    }
}

/// 包络模式的会话配置档
///
/// 判别值即 `PROFILE_SELECTION` 寄存器的取值。
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, IntoPrimitive, TryFromPrimitive,
)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "SCREAMING_SNAKE_CASE")
)]
#[repr(u32)]
pub enum SessionProfile {
    /// 最高深度分辨率
    MaxDepthResolution = 0,
    /// 最高信噪比（默认）
    #[default]
    MaxSnr = 1,
    /// 直接泄漏测量，允许负的测距起点
    DirectLeakage = 2,
}

impl fmt::Display for SessionProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionProfile::MaxDepthResolution => "MAX_DEPTH_RESOLUTION",
            SessionProfile::MaxSnr => "MAX_SNR",
            SessionProfile::DirectLeakage => "DIRECT_LEAKAGE",
        };
        f.write_str(name)
    }
}

// ============================================================================
// 动态字段值
// ============================================================================

/// 按字段名读写时使用的值
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Sensors(Vec<u32>),
    Interval([f64; 2]),
    Profile(SessionProfile),
    Mode(Mode),
}

impl ConfigValue {
    fn as_f64(&self, field: &'static str) -> Result<f64, ConfigError> {
        match *self {
            ConfigValue::Float(v) => Ok(v),
            ConfigValue::Int(v) => Ok(v as f64),
            _ => Err(ConfigError::invalid(field, format!("expected a number, got {}", self))),
        }
    }

    fn as_u32(&self, field: &'static str) -> Result<u32, ConfigError> {
        match *self {
            // 负数在这里统一报告为超出范围，具体下限由各字段校验
            ConfigValue::Int(v) if v <= 0 => Ok(0),
            ConfigValue::Int(v) => u32::try_from(v)
                .map_err(|_| ConfigError::invalid(field, format!("{} is too large", v))),
            _ => Err(ConfigError::invalid(field, format!("expected an integer, got {}", self))),
        }
    }

    fn as_bool(&self, field: &'static str) -> Result<bool, ConfigError> {
        match *self {
            ConfigValue::Bool(v) => Ok(v),
            _ => Err(ConfigError::invalid(field, format!("expected a boolean, got {}", self))),
        }
    }

    fn as_sensors(&self, field: &'static str) -> Result<SensorSelection, ConfigError> {
        match self {
            ConfigValue::Sensors(ids) => Ok(SensorSelection(ids.clone())),
            ConfigValue::Int(v) => u32::try_from(*v)
                .map(SensorSelection::from)
                .map_err(|_| ConfigError::invalid(field, format!("{} is not a sensor id", v))),
            _ => Err(ConfigError::invalid(
                field,
                "given sensor(s) must be either an int or a list of ints",
            )),
        }
    }

    fn as_interval(&self, field: &'static str) -> Result<[f64; 2], ConfigError> {
        match *self {
            ConfigValue::Interval(v) => Ok(v),
            _ => Err(ConfigError::invalid(field, format!("expected [start, end], got {}", self))),
        }
    }

    fn as_profile(&self, field: &'static str) -> Result<SessionProfile, ConfigError> {
        match *self {
            ConfigValue::Profile(p) => Ok(p),
            ConfigValue::Int(v) => u32::try_from(v)
                .ok()
                .and_then(|v| SessionProfile::try_from(v).ok())
                .ok_or_else(|| ConfigError::invalid(field, "invalid profile")),
            _ => Err(ConfigError::invalid(field, "invalid profile")),
        }
    }
}

impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigValue::Bool(v) => write!(f, "{}", v),
            ConfigValue::Int(v) => write!(f, "{}", v),
            ConfigValue::Float(v) => write!(f, "{}", v),
            ConfigValue::Sensors(v) => write!(f, "{:?}", v),
            ConfigValue::Interval([a, b]) => write!(f, "[{}, {}]", a, b),
            ConfigValue::Profile(p) => write!(f, "{}", p),
            ConfigValue::Mode(m) => write!(f, "{}", m),
        }
    }
}

impl From<bool> for ConfigValue {
    fn from(v: bool) -> Self {
        ConfigValue::Bool(v)
    }
}

impl From<i32> for ConfigValue {
    fn from(v: i32) -> Self {
        ConfigValue::Int(v as i64)
    }
}

impl From<i64> for ConfigValue {
    fn from(v: i64) -> Self {
        ConfigValue::Int(v)
    }
}

impl From<u32> for ConfigValue {
    fn from(v: u32) -> Self {
        ConfigValue::Int(v as i64)
    }
}

impl From<f64> for ConfigValue {
    fn from(v: f64) -> Self {
        ConfigValue::Float(v)
    }
}

impl From<Vec<u32>> for ConfigValue {
    fn from(v: Vec<u32>) -> Self {
        ConfigValue::Sensors(v)
    }
}

impl From<[f64; 2]> for ConfigValue {
    fn from(v: [f64; 2]) -> Self {
        ConfigValue::Interval(v)
    }
}

impl From<SessionProfile> for ConfigValue {
    fn from(v: SessionProfile) -> Self {
        ConfigValue::Profile(v)
    }
}

// ============================================================================
// 传感器选择
// ============================================================================

/// 传感器 ID 列表（可由单个 ID 或列表构造）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorSelection(pub Vec<u32>);

impl From<u32> for SensorSelection {
    fn from(id: u32) -> Self {
        SensorSelection(vec![id])
    }
}

impl From<Vec<u32>> for SensorSelection {
    fn from(ids: Vec<u32>) -> Self {
        SensorSelection(ids)
    }
}

impl From<&[u32]> for SensorSelection {
    fn from(ids: &[u32]) -> Self {
        SensorSelection(ids.to_vec())
    }
}

impl<const N: usize> From<[u32; N]> for SensorSelection {
    fn from(ids: [u32; N]) -> Self {
        SensorSelection(ids.to_vec())
    }
}

// ============================================================================
// 字段校验（自由函数）
// ============================================================================

fn validate_sensors(ids: Vec<u32>) -> Result<Vec<u32>, ConfigError> {
    if ids.is_empty() {
        return Err(ConfigError::invalid("sensors", "at least one sensor is required"));
    }
    if ids.contains(&0) {
        return Err(ConfigError::invalid("sensors", "sensor ids must be positive"));
    }
    Ok(ids)
}

fn validate_sweep_rate(rate: f64) -> Result<f64, ConfigError> {
    // `!(x >= 1.0)` 同时拒绝 NaN
    if !(rate >= 1.0) || !rate.is_finite() {
        return Err(ConfigError::invalid("sweep_rate", "sweep rate must be >= 1"));
    }
    Ok(rate)
}

fn validate_gain(gain: f64) -> Result<f64, ConfigError> {
    if !(0.0..=1.0).contains(&gain) {
        return Err(ConfigError::invalid("gain", "gain must be between 0 and 1"));
    }
    Ok(gain)
}

fn validate_range_length(length: f64) -> Result<f64, ConfigError> {
    if !(length >= 0.0) || !length.is_finite() {
        return Err(ConfigError::invalid("range_length", "range length must be positive"));
    }
    Ok(length)
}

fn validate_running_average_factor(factor: f64) -> Result<f64, ConfigError> {
    if !(factor > 0.0 && factor < 1.0) {
        return Err(ConfigError::invalid(
            "running_average_factor",
            "running average factor must be between 0 and 1",
        ));
    }
    Ok(factor)
}

// ============================================================================
// 公共字段（组合）
// ============================================================================

/// 所有会话共有的字段
#[derive(Debug, Clone, PartialEq)]
pub struct CommonFields {
    pub(crate) sensors: Vec<u32>,
    pub(crate) sweep_rate: Option<f64>,
}

impl Default for CommonFields {
    fn default() -> Self {
        Self {
            sensors: vec![1],
            sweep_rate: None,
        }
    }
}

/// 服务配置共有的字段
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ServiceFields {
    pub(crate) gain: Option<f64>,
    pub(crate) range_start: Option<f64>,
    pub(crate) range_length: Option<f64>,
    pub(crate) experimental_stitching: Option<bool>,
}

/// 稠密服务（envelope / iq）共有的字段
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DenseFields {
    pub(crate) running_average_factor: Option<f64>,
}

/// 服务配置的共享读写接口
///
/// 所有 setter 先校验再写入；返回 `Err` 时配置保持原样。
pub trait ServiceSettings {
    /// 采集模式（只读）
    fn mode(&self) -> Mode;
    fn common(&self) -> &CommonFields;
    fn common_mut(&mut self) -> &mut CommonFields;
    fn service(&self) -> &ServiceFields;
    fn service_mut(&mut self) -> &mut ServiceFields;

    /// 是否允许负的测距起点
    fn allows_negative_range_start(&self) -> bool {
        false
    }

    fn sensors(&self) -> &[u32] {
        &self.common().sensors
    }

    fn set_sensors(&mut self, sensors: impl Into<SensorSelection>) -> Result<(), ConfigError> {
        let ids = validate_sensors(sensors.into().0)?;
        self.common_mut().sensors = ids;
        Ok(())
    }

    fn sweep_rate(&self) -> Option<f64> {
        self.common().sweep_rate
    }

    fn set_sweep_rate(&mut self, rate: f64) -> Result<(), ConfigError> {
        self.common_mut().sweep_rate = Some(validate_sweep_rate(rate)?);
        Ok(())
    }

    fn gain(&self) -> Option<f64> {
        self.service().gain
    }

    fn set_gain(&mut self, gain: f64) -> Result<(), ConfigError> {
        self.service_mut().gain = Some(validate_gain(gain)?);
        Ok(())
    }

    fn range_start(&self) -> Option<f64> {
        self.service().range_start
    }

    fn set_range_start(&mut self, start: f64) -> Result<(), ConfigError> {
        let start = self.check_range_start(start)?;
        self.service_mut().range_start = Some(start);
        Ok(())
    }

    fn range_length(&self) -> Option<f64> {
        self.service().range_length
    }

    fn set_range_length(&mut self, length: f64) -> Result<(), ConfigError> {
        self.service_mut().range_length = Some(validate_range_length(length)?);
        Ok(())
    }

    /// `[range_start, range_start + range_length]`，任一未设置时为 `None`
    fn range_interval(&self) -> Option<[f64; 2]> {
        let start = self.range_start()?;
        let end = self.range_end()?;
        Some([start, end])
    }

    /// 分解为起点和长度；两者都校验通过后才写入
    fn set_range_interval(&mut self, interval: [f64; 2]) -> Result<(), ConfigError> {
        let [start, end] = interval;
        let start = self.check_range_start(start)?;
        let length = validate_range_length(end - start).map_err(|_| {
            ConfigError::invalid("range_interval", "range end must not be before range start")
        })?;
        let service = self.service_mut();
        service.range_start = Some(start);
        service.range_length = Some(length);
        Ok(())
    }

    fn range_end(&self) -> Option<f64> {
        Some(self.range_start()? + self.range_length()?)
    }

    /// 保持起点不变，反推 `range_length`
    fn set_range_end(&mut self, end: f64) -> Result<(), ConfigError> {
        let start = self.range_start().ok_or_else(|| {
            ConfigError::InvalidCombination("range_end requires range_start to be set".into())
        })?;
        self.set_range_length(end - start)
    }

    fn experimental_stitching(&self) -> Option<bool> {
        self.service().experimental_stitching
    }

    fn set_experimental_stitching(&mut self, enabled: bool) {
        self.service_mut().experimental_stitching = Some(enabled);
    }

    #[doc(hidden)]
    fn check_range_start(&self, start: f64) -> Result<f64, ConfigError> {
        if !start.is_finite() {
            return Err(ConfigError::invalid("range_start", "range start must be finite"));
        }
        if start < 0.0 && !self.allows_negative_range_start() {
            // 只有 envelope 的负起点取决于配置档，其余模式是取值错误
            if self.mode() == Mode::Envelope {
                return Err(ConfigError::InvalidCombination(format!(
                    "range start {} is negative, only allowed with the DIRECT_LEAKAGE profile",
                    start
                )));
            }
            return Err(ConfigError::invalid(
                "range_start",
                format!("range start {} must not be negative", start),
            ));
        }
        Ok(start)
    }
}

/// 稠密服务的共享读写接口
pub trait DenseSettings: ServiceSettings {
    fn dense(&self) -> &DenseFields;
    fn dense_mut(&mut self) -> &mut DenseFields;

    fn running_average_factor(&self) -> Option<f64> {
        self.dense().running_average_factor
    }

    fn set_running_average_factor(&mut self, factor: f64) -> Result<(), ConfigError> {
        self.dense_mut().running_average_factor = Some(validate_running_average_factor(factor)?);
        Ok(())
    }
}

/// 按字段名读写（字段集合按模式封闭）
pub trait FieldAccess {
    /// 该模式可识别的全部字段名（按字母序）
    fn field_names(&self) -> &'static [&'static str];

    fn set_field(&mut self, name: &str, value: ConfigValue) -> Result<(), ConfigError>;

    /// `Ok(None)` 表示字段存在但未设置
    fn get_field(&self, name: &str) -> Result<Option<ConfigValue>, ConfigError>;

    fn set(&mut self, name: &str, value: impl Into<ConfigValue>) -> Result<(), ConfigError>
    where
        Self: Sized,
    {
        self.set_field(name, value.into())
    }

    fn get(&self, name: &str) -> Result<Option<ConfigValue>, ConfigError> {
        self.get_field(name)
    }
}

fn set_service_field<C: ServiceSettings>(
    cfg: &mut C,
    name: &str,
    value: &ConfigValue,
) -> Option<Result<(), ConfigError>> {
    let result = match name {
        "sensors" => value.as_sensors("sensors").and_then(|s| cfg.set_sensors(s)),
        "sweep_rate" => value.as_f64("sweep_rate").and_then(|v| cfg.set_sweep_rate(v)),
        "gain" => value.as_f64("gain").and_then(|v| cfg.set_gain(v)),
        "range_start" => value.as_f64("range_start").and_then(|v| cfg.set_range_start(v)),
        "range_length" => value.as_f64("range_length").and_then(|v| cfg.set_range_length(v)),
        "range_interval" => value
            .as_interval("range_interval")
            .and_then(|v| cfg.set_range_interval(v)),
        "range_end" => value.as_f64("range_end").and_then(|v| cfg.set_range_end(v)),
        "experimental_stitching" => value
            .as_bool("experimental_stitching")
            .map(|v| cfg.set_experimental_stitching(v)),
        _ => return None,
    };
    Some(result)
}

fn get_service_field<C: ServiceSettings>(cfg: &C, name: &str) -> Option<Option<ConfigValue>> {
    let value = match name {
        "mode" => Some(ConfigValue::Mode(cfg.mode())),
        "sensors" => Some(ConfigValue::Sensors(cfg.sensors().to_vec())),
        "sweep_rate" => cfg.sweep_rate().map(ConfigValue::Float),
        "gain" => cfg.gain().map(ConfigValue::Float),
        "range_start" => cfg.range_start().map(ConfigValue::Float),
        "range_length" => cfg.range_length().map(ConfigValue::Float),
        "range_interval" => cfg.range_interval().map(ConfigValue::Interval),
        "range_end" => cfg.range_end().map(ConfigValue::Float),
        "experimental_stitching" => cfg.experimental_stitching().map(ConfigValue::Bool),
        _ => return None,
    };
    Some(value)
}

fn set_dense_field<C: DenseSettings>(
    cfg: &mut C,
    name: &str,
    value: &ConfigValue,
) -> Option<Result<(), ConfigError>> {
    match name {
        "running_average_factor" => Some(
            value
                .as_f64("running_average_factor")
                .and_then(|v| cfg.set_running_average_factor(v)),
        ),
        _ => None,
    }
}

fn get_dense_field<C: DenseSettings>(cfg: &C, name: &str) -> Option<Option<ConfigValue>> {
    match name {
        "running_average_factor" => Some(cfg.running_average_factor().map(ConfigValue::Float)),
        _ => None,
    }
}

fn unknown_field(mode: Mode, name: &str) -> ConfigError {
    ConfigError::InvalidField {
        mode,
        field: name.to_string(),
    }
}

/// 打印为对齐的 `name ..... value` 表格，未设置的字段显示为 `-`
fn fmt_fields(f: &mut fmt::Formatter<'_>, title: &str, cfg: &impl FieldAccess) -> fmt::Result {
    write!(f, "{}", title)?;
    for name in cfg.field_names() {
        let value = match cfg.get_field(name) {
            Ok(Some(v)) => v.to_string(),
            _ => "-".to_string(),
        };
        write!(f, "\n  {:.<25} {}", format!("{} ", name), value)?;
    }
    Ok(())
}

macro_rules! impl_service_settings {
    ($ty:ty, $mode:expr) => {
        impl ServiceSettings for $ty {
            fn mode(&self) -> Mode {
                $mode
            }
            fn common(&self) -> &CommonFields {
                &self.common
            }
            fn common_mut(&mut self) -> &mut CommonFields {
                &mut self.common
            }
            fn service(&self) -> &ServiceFields {
                &self.service
            }
            fn service_mut(&mut self) -> &mut ServiceFields {
                &mut self.service
            }
        }
    };
}

macro_rules! impl_dense_settings {
    ($ty:ty) => {
        impl DenseSettings for $ty {
            fn dense(&self) -> &DenseFields {
                &self.dense
            }
            fn dense_mut(&mut self) -> &mut DenseFields {
                &mut self.dense
            }
        }
    };
}

// ============================================================================
// Power bin
// ============================================================================

/// Power bin 服务配置
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PowerBinConfig {
    common: CommonFields,
    service: ServiceFields,
    bin_count: Option<u32>,
}

impl_service_settings!(PowerBinConfig, Mode::PowerBin);

impl PowerBinConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// 请求的 bin 数量；未设置时由设备决定，实际值见 `SessionInfo::actual_bin_count`
    pub fn bin_count(&self) -> Option<u32> {
        self.bin_count
    }

    pub fn set_bin_count(&mut self, count: u32) -> Result<(), ConfigError> {
        if count == 0 {
            return Err(ConfigError::invalid("bin_count", "bin count must be > 0"));
        }
        self.bin_count = Some(count);
        Ok(())
    }
}

impl FieldAccess for PowerBinConfig {
    fn field_names(&self) -> &'static [&'static str] {
        &[
            "bin_count",
            "experimental_stitching",
            "gain",
            "mode",
            "range_end",
            "range_interval",
            "range_length",
            "range_start",
            "sensors",
            "sweep_rate",
        ]
    }

    fn set_field(&mut self, name: &str, value: ConfigValue) -> Result<(), ConfigError> {
        if name == "bin_count" {
            return value.as_u32("bin_count").and_then(|v| self.set_bin_count(v));
        }
        set_service_field(self, name, &value).unwrap_or_else(|| Err(unknown_field(self.mode(), name)))
    }

    fn get_field(&self, name: &str) -> Result<Option<ConfigValue>, ConfigError> {
        if name == "bin_count" {
            return Ok(self.bin_count.map(ConfigValue::from));
        }
        get_service_field(self, name).ok_or_else(|| unknown_field(self.mode(), name))
    }
}

impl fmt::Display for PowerBinConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_fields(f, "PowerBinConfig", self)
    }
}

// ============================================================================
// Envelope
// ============================================================================

/// Envelope 服务配置
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EnvelopeConfig {
    common: CommonFields,
    service: ServiceFields,
    dense: DenseFields,
    session_profile: SessionProfile,
    compensate_phase: Option<bool>,
}

impl ServiceSettings for EnvelopeConfig {
    fn mode(&self) -> Mode {
        Mode::Envelope
    }
    fn common(&self) -> &CommonFields {
        &self.common
    }
    fn common_mut(&mut self) -> &mut CommonFields {
        &mut self.common
    }
    fn service(&self) -> &ServiceFields {
        &self.service
    }
    fn service_mut(&mut self) -> &mut ServiceFields {
        &mut self.service
    }

    fn allows_negative_range_start(&self) -> bool {
        self.session_profile == SessionProfile::DirectLeakage
    }
}

impl_dense_settings!(EnvelopeConfig);

impl EnvelopeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session_profile(&self) -> SessionProfile {
        self.session_profile
    }

    /// 切换配置档
    ///
    /// 离开 `DirectLeakage` 时若 `range_start` 为负，返回 `InvalidCombination`。
    pub fn set_session_profile(&mut self, profile: SessionProfile) -> Result<(), ConfigError> {
        if profile != SessionProfile::DirectLeakage
            && self.service.range_start.is_some_and(|start| start < 0.0)
        {
            return Err(ConfigError::InvalidCombination(format!(
                "profile {} requires a non-negative range start",
                profile
            )));
        }
        self.session_profile = profile;
        Ok(())
    }

    pub fn compensate_phase(&self) -> Option<bool> {
        self.compensate_phase
    }

    pub fn set_compensate_phase(&mut self, enabled: bool) {
        self.compensate_phase = Some(enabled);
    }
}

impl FieldAccess for EnvelopeConfig {
    fn field_names(&self) -> &'static [&'static str] {
        &[
            "compensate_phase",
            "experimental_stitching",
            "gain",
            "mode",
            "range_end",
            "range_interval",
            "range_length",
            "range_start",
            "running_average_factor",
            "sensors",
            "session_profile",
            "sweep_rate",
        ]
    }

    fn set_field(&mut self, name: &str, value: ConfigValue) -> Result<(), ConfigError> {
        match name {
            "session_profile" => value
                .as_profile("session_profile")
                .and_then(|p| self.set_session_profile(p)),
            "compensate_phase" => value
                .as_bool("compensate_phase")
                .map(|v| self.set_compensate_phase(v)),
            _ => set_dense_field(self, name, &value)
                .or_else(|| set_service_field(self, name, &value))
                .unwrap_or_else(|| Err(unknown_field(Mode::Envelope, name))),
        }
    }

    fn get_field(&self, name: &str) -> Result<Option<ConfigValue>, ConfigError> {
        match name {
            "session_profile" => Ok(Some(ConfigValue::Profile(self.session_profile))),
            "compensate_phase" => Ok(self.compensate_phase.map(ConfigValue::Bool)),
            _ => get_dense_field(self, name)
                .or_else(|| get_service_field(self, name))
                .ok_or_else(|| unknown_field(Mode::Envelope, name)),
        }
    }
}

impl fmt::Display for EnvelopeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_fields(f, "EnvelopeConfig", self)
    }
}

// ============================================================================
// IQ
// ============================================================================

/// IQ 服务配置
#[derive(Debug, Clone, PartialEq, Default)]
pub struct IqConfig {
    common: CommonFields,
    service: ServiceFields,
    dense: DenseFields,
}

impl_service_settings!(IqConfig, Mode::Iq);
impl_dense_settings!(IqConfig);

impl IqConfig {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FieldAccess for IqConfig {
    fn field_names(&self) -> &'static [&'static str] {
        &[
            "experimental_stitching",
            "gain",
            "mode",
            "range_end",
            "range_interval",
            "range_length",
            "range_start",
            "running_average_factor",
            "sensors",
            "sweep_rate",
        ]
    }

    fn set_field(&mut self, name: &str, value: ConfigValue) -> Result<(), ConfigError> {
        set_dense_field(self, name, &value)
            .or_else(|| set_service_field(self, name, &value))
            .unwrap_or_else(|| Err(unknown_field(Mode::Iq, name)))
    }

    fn get_field(&self, name: &str) -> Result<Option<ConfigValue>, ConfigError> {
        get_dense_field(self, name)
            .or_else(|| get_service_field(self, name))
            .ok_or_else(|| unknown_field(Mode::Iq, name))
    }
}

impl fmt::Display for IqConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_fields(f, "IqConfig", self)
    }
}

// ============================================================================
// Sparse
// ============================================================================

/// Sparse 服务配置
#[derive(Debug, Clone, PartialEq)]
pub struct SparseConfig {
    common: CommonFields,
    service: ServiceFields,
    number_of_subsweeps: u32,
}

impl_service_settings!(SparseConfig, Mode::Sparse);

impl Default for SparseConfig {
    fn default() -> Self {
        Self {
            common: CommonFields::default(),
            service: ServiceFields::default(),
            number_of_subsweeps: Self::MAX_SUBSWEEPS,
        }
    }
}

impl SparseConfig {
    pub const MAX_SUBSWEEPS: u32 = 16;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn number_of_subsweeps(&self) -> u32 {
        self.number_of_subsweeps
    }

    pub fn set_number_of_subsweeps(&mut self, count: u32) -> Result<(), ConfigError> {
        if count < 1 {
            return Err(ConfigError::invalid(
                "number_of_subsweeps",
                "number of subsweeps must be > 0",
            ));
        }
        if count > Self::MAX_SUBSWEEPS {
            return Err(ConfigError::invalid(
                "number_of_subsweeps",
                "number of subsweeps must be <= 16",
            ));
        }
        self.number_of_subsweeps = count;
        Ok(())
    }
}

impl FieldAccess for SparseConfig {
    fn field_names(&self) -> &'static [&'static str] {
        &[
            "experimental_stitching",
            "gain",
            "mode",
            "number_of_subsweeps",
            "range_end",
            "range_interval",
            "range_length",
            "range_start",
            "sensors",
            "sweep_rate",
        ]
    }

    fn set_field(&mut self, name: &str, value: ConfigValue) -> Result<(), ConfigError> {
        if name == "number_of_subsweeps" {
            return value
                .as_u32("number_of_subsweeps")
                .and_then(|v| self.set_number_of_subsweeps(v));
        }
        set_service_field(self, name, &value).unwrap_or_else(|| Err(unknown_field(Mode::Sparse, name)))
    }

    fn get_field(&self, name: &str) -> Result<Option<ConfigValue>, ConfigError> {
        if name == "number_of_subsweeps" {
            return Ok(Some(ConfigValue::from(self.number_of_subsweeps)));
        }
        get_service_field(self, name).ok_or_else(|| unknown_field(Mode::Sparse, name))
    }
}

impl fmt::Display for SparseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_fields(f, "SparseConfig", self)
    }
}

// ============================================================================
// Distance peak (fixed threshold)
// ============================================================================

/// 固定阈值距离峰值检测配置
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DistancePeakConfig {
    common: CommonFields,
    service: ServiceFields,
}

impl_service_settings!(DistancePeakConfig, Mode::DistancePeakFixThreshold);

impl DistancePeakConfig {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FieldAccess for DistancePeakConfig {
    fn field_names(&self) -> &'static [&'static str] {
        &[
            "experimental_stitching",
            "gain",
            "mode",
            "range_end",
            "range_interval",
            "range_length",
            "range_start",
            "sensors",
            "sweep_rate",
        ]
    }

    fn set_field(&mut self, name: &str, value: ConfigValue) -> Result<(), ConfigError> {
        set_service_field(self, name, &value)
            .unwrap_or_else(|| Err(unknown_field(Mode::DistancePeakFixThreshold, name)))
    }

    fn get_field(&self, name: &str) -> Result<Option<ConfigValue>, ConfigError> {
        get_service_field(self, name)
            .ok_or_else(|| unknown_field(Mode::DistancePeakFixThreshold, name))
    }
}

impl fmt::Display for DistancePeakConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_fields(f, "DistancePeakConfig", self)
    }
}

// ============================================================================
// 封闭的配置和类型
// ============================================================================

/// 任一模式的配置（客户端接受的类型）
#[derive(Debug, Clone, PartialEq)]
pub enum RadarConfig {
    PowerBin(PowerBinConfig),
    Envelope(EnvelopeConfig),
    Iq(IqConfig),
    Sparse(SparseConfig),
    DistancePeak(DistancePeakConfig),
}

macro_rules! dispatch {
    ($value:expr, $cfg:ident => $body:expr) => {
        match $value {
            RadarConfig::PowerBin($cfg) => $body,
            RadarConfig::Envelope($cfg) => $body,
            RadarConfig::Iq($cfg) => $body,
            RadarConfig::Sparse($cfg) => $body,
            RadarConfig::DistancePeak($cfg) => $body,
        }
    };
}

impl RadarConfig {
    /// 创建指定模式的默认配置
    pub fn new(mode: Mode) -> Self {
        match mode {
            Mode::PowerBin => PowerBinConfig::default().into(),
            Mode::Envelope => EnvelopeConfig::default().into(),
            Mode::Iq => IqConfig::default().into(),
            Mode::Sparse => SparseConfig::default().into(),
            Mode::DistancePeakFixThreshold => DistancePeakConfig::default().into(),
        }
    }

    /// 按字段名批量构造，任一字段失败即返回错误
    pub fn with_fields<'a, I>(mode: Mode, fields: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (&'a str, ConfigValue)>,
    {
        let mut config = Self::new(mode);
        for (name, value) in fields {
            config.set_field(name, value)?;
        }
        Ok(config)
    }

    /// 会话建立前的完整性检查：必需字段必须已设置
    pub fn check_complete(&self) -> Result<(), ConfigError> {
        if self.sweep_rate().is_none() {
            return Err(ConfigError::MissingField("sweep_rate"));
        }
        if self.range_start().is_none() {
            return Err(ConfigError::MissingField("range_start"));
        }
        if self.range_length().is_none() {
            return Err(ConfigError::MissingField("range_length"));
        }
        Ok(())
    }

    pub fn bin_count(&self) -> Option<u32> {
        match self {
            RadarConfig::PowerBin(cfg) => cfg.bin_count(),
            _ => None,
        }
    }

    pub fn session_profile(&self) -> Option<SessionProfile> {
        match self {
            RadarConfig::Envelope(cfg) => Some(cfg.session_profile()),
            _ => None,
        }
    }

    pub fn compensate_phase(&self) -> Option<bool> {
        match self {
            RadarConfig::Envelope(cfg) => cfg.compensate_phase(),
            _ => None,
        }
    }

    pub fn running_average_factor(&self) -> Option<f64> {
        match self {
            RadarConfig::Envelope(cfg) => cfg.running_average_factor(),
            RadarConfig::Iq(cfg) => cfg.running_average_factor(),
            _ => None,
        }
    }

    pub fn number_of_subsweeps(&self) -> Option<u32> {
        match self {
            RadarConfig::Sparse(cfg) => Some(cfg.number_of_subsweeps()),
            _ => None,
        }
    }
}

impl ServiceSettings for RadarConfig {
    fn mode(&self) -> Mode {
        dispatch!(self, cfg => cfg.mode())
    }
    fn common(&self) -> &CommonFields {
        dispatch!(self, cfg => cfg.common())
    }
    fn common_mut(&mut self) -> &mut CommonFields {
        dispatch!(self, cfg => cfg.common_mut())
    }
    fn service(&self) -> &ServiceFields {
        dispatch!(self, cfg => cfg.service())
    }
    fn service_mut(&mut self) -> &mut ServiceFields {
        dispatch!(self, cfg => cfg.service_mut())
    }
    fn allows_negative_range_start(&self) -> bool {
        dispatch!(self, cfg => cfg.allows_negative_range_start())
    }
}

impl FieldAccess for RadarConfig {
    fn field_names(&self) -> &'static [&'static str] {
        dispatch!(self, cfg => cfg.field_names())
    }

    fn set_field(&mut self, name: &str, value: ConfigValue) -> Result<(), ConfigError> {
        dispatch!(self, cfg => cfg.set_field(name, value))
    }

    fn get_field(&self, name: &str) -> Result<Option<ConfigValue>, ConfigError> {
        dispatch!(self, cfg => cfg.get_field(name))
    }
}

impl fmt::Display for RadarConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        dispatch!(self, cfg => fmt::Display::fmt(cfg, f))
    }
}

impl From<PowerBinConfig> for RadarConfig {
    fn from(cfg: PowerBinConfig) -> Self {
        RadarConfig::PowerBin(cfg)
    }
}

impl From<EnvelopeConfig> for RadarConfig {
    fn from(cfg: EnvelopeConfig) -> Self {
        RadarConfig::Envelope(cfg)
    }
}

impl From<IqConfig> for RadarConfig {
    fn from(cfg: IqConfig) -> Self {
        RadarConfig::Iq(cfg)
    }
}

impl From<SparseConfig> for RadarConfig {
    fn from(cfg: SparseConfig) -> Self {
        RadarConfig::Sparse(cfg)
    }
}

impl From<DistancePeakConfig> for RadarConfig {
    fn from(cfg: DistancePeakConfig) -> Self {
        RadarConfig::DistancePeak(cfg)
    }
}
